// dbsynctool/src/transfer/mod.rs
use std::path::{Path, PathBuf};
use tempfile::Builder as TempFileBuilder;
use tracing::info;

use crate::backup::archive::{archive_name, verify_local_archive};
use crate::config::Endpoint;
use crate::errors::Result;
use crate::exec::RunOptions;
use crate::sync::logic::SyncSession;
use crate::utils::quote::quote_shell_arg;
use crate::utils::{check_and_create_dump_dir, get_command};

/// Moves `<dump>.tar.gz` from the origin dump directory to the target dump directory.
///
/// Remote legs go over SFTP; a remote-to-remote run stages the archive in a
/// private local directory. Archives landing locally are checked before use.
pub fn transfer_origin_database_dump(session: &mut SyncSession, dump_file: &str) -> Result<()> {
    let archive = archive_name(dump_file);
    let origin_path = format!("{}{}", session.config.origin.dump_dir, archive);
    let target_dir = session.config.target.dump_dir.clone();
    let target_path = format!("{}{}", target_dir, archive);
    let origin_remote = session.gateway.is_remote(Endpoint::Origin);
    let target_remote = session.gateway.is_remote(Endpoint::Target);

    check_and_create_dump_dir(&mut session.gateway, Endpoint::Target, &target_dir)?;

    match (origin_remote, target_remote) {
        (true, false) => {
            let local = PathBuf::from(&target_path);
            download(session, &origin_path, &local, dump_file)?;
        }
        (true, true) => {
            let staging = TempFileBuilder::new().prefix("db_sync_tool_").tempdir()?;
            let local = staging.path().join(&archive);
            session.staging = Some(staging);
            download(session, &origin_path, &local, dump_file)?;
            upload(session, &local, &target_path)?;
        }
        (false, true) => {
            upload(session, &PathBuf::from(&origin_path), &target_path)?;
        }
        (false, false) => {
            info!(endpoint = %Endpoint::Local, "📋 Copying database dump to {}", target_path);
            let command = format!(
                "{} {} {}",
                get_command(&session.config, Endpoint::Target, "cp"),
                quote_shell_arg(&origin_path),
                quote_shell_arg(&target_path)
            );
            session.gateway.run(&command, Endpoint::Local, RunOptions::default())?;
        }
    }
    Ok(())
}

fn download(session: &mut SyncSession, remote: &str, local: &Path, dump_file: &str) -> Result<()> {
    info!(endpoint = %Endpoint::Origin, "⬇️ Downloading database dump");
    session.gateway.download(Endpoint::Origin, remote, local)?;
    if !session.gateway.is_dry_run() {
        verify_local_archive(local, dump_file)?;
    }
    Ok(())
}

fn upload(session: &mut SyncSession, local: &Path, remote: &str) -> Result<()> {
    info!(endpoint = %Endpoint::Target, "⬆️ Uploading database dump");
    session.gateway.upload(Endpoint::Target, local, remote)
}
