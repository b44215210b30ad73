// dbsynctool/src/backup/archive.rs
use flate2::read::GzDecoder;
use std::fs::File;
use std::path::Path;
use tar::Archive;
use tracing::{debug, info};

use crate::config::Endpoint;
use crate::errors::{Result, SyncError};
use crate::exec::RunOptions;
use crate::sync::logic::SyncSession;
use crate::utils::get_command;
use crate::utils::quote::quote_shell_arg;

/// Archive name for a dump file: `<dump>.sql.tar.gz`.
pub fn archive_name(dump_file: &str) -> String {
    format!("{}.tar.gz", dump_file)
}

/// `tar czf <dir><dump>.tar.gz -C <dir> <dump>`
pub fn compress_command(tar: &str, dump_dir: &str, dump_file: &str) -> String {
    format!(
        "{} czf {} -C {} {}",
        tar,
        quote_shell_arg(&format!("{}{}", dump_dir, archive_name(dump_file))),
        quote_shell_arg(dump_dir),
        quote_shell_arg(dump_file)
    )
}

/// `tar xzf <dir><dump>.tar.gz -C <dir>`
pub fn extract_command(tar: &str, dump_dir: &str, dump_file: &str) -> String {
    format!(
        "{} xzf {} -C {}",
        tar,
        quote_shell_arg(&format!("{}{}", dump_dir, archive_name(dump_file))),
        quote_shell_arg(dump_dir)
    )
}

/// Packs the origin dump into its `.tar.gz` sibling.
pub fn prepare_origin_database_dump(session: &mut SyncSession, dump_file: &str) -> Result<()> {
    let role = Endpoint::Origin;
    info!(endpoint = %role, "🗜️ Compressing database dump");
    let command = compress_command(
        &get_command(&session.config, role, "tar"),
        &session.config.origin.dump_dir,
        dump_file,
    );
    session.gateway.run(&command, role, RunOptions::default())?;
    Ok(())
}

/// Unpacks the transferred archive in the target dump directory.
pub fn prepare_target_database_dump(session: &mut SyncSession, dump_file: &str) -> Result<()> {
    let role = Endpoint::Target;
    info!(endpoint = %role, "📦 Extracting database dump");
    let command = extract_command(
        &get_command(&session.config, role, "tar"),
        &session.config.target.dump_dir,
        dump_file,
    );
    session.gateway.run(&command, role, RunOptions::default())?;
    Ok(())
}

/// Checks that a downloaded archive is a readable gzip'd tar holding exactly `dump_file`.
pub fn verify_local_archive(archive_path: &Path, dump_file: &str) -> Result<()> {
    let file = File::open(archive_path)
        .map_err(|e| SyncError::FileAccess(format!("Cannot open archive {}: {}", archive_path.display(), e)))?;
    let mut archive = Archive::new(GzDecoder::new(file));
    let corrupt = |e: std::io::Error| {
        SyncError::Database(format!("Archive {} is corrupted: {}", archive_path.display(), e))
    };

    let mut members = Vec::new();
    for entry in archive.entries().map_err(corrupt)? {
        let entry = entry.map_err(corrupt)?;
        members.push(entry.path().map_err(corrupt)?.to_string_lossy().into_owned());
    }
    debug!("Archive {} contains {:?}", archive_path.display(), members);

    if members.len() != 1 || members[0].trim_start_matches("./") != dump_file {
        return Err(SyncError::Database(format!(
            "Archive {} should contain only {}, found {:?}",
            archive_path.display(),
            dump_file,
            members
        )));
    }
    Ok(())
}
