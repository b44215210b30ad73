// dbsynctool/src/cleanup/mod.rs
use tracing::{debug, info};

use crate::backup::archive::archive_name;
use crate::config::{Endpoint, SyncConfig};
use crate::errors::Result;
use crate::exec::RunOptions;
use crate::sync::logic::SyncSession;
use crate::utils::quote::quote_shell_arg;
use crate::utils::{check_and_create_dump_dir, check_os, get_command};

/// Lists `.sql`/`.gz` files under `dump_dir`, newest first, one `<mtime> <path>` per line.
///
/// `stat` differs between Darwin and GNU, so the OS reported by `uname -s` picks the format.
pub fn list_dumps_command(config: &SyncConfig, role: Endpoint, os: &str, dump_dir: &str) -> String {
    let format = if os.trim() == "Darwin" { "-f \"%m %N\"" } else { "-c \"%Y %n\"" };
    format!(
        "{} {} {}* | {} -rn | {} -E \"\\.gz$|\\.sql$\"",
        get_command(config, role, "stat"),
        format,
        quote_shell_arg(dump_dir),
        get_command(config, role, "sort"),
        get_command(config, role, "grep")
    )
}

/// Paths from a [`list_dumps_command`] listing that fall outside the newest `keep`.
pub fn outdated_dumps(listing: &str, keep: usize) -> Vec<String> {
    listing
        .lines()
        .filter_map(|line| line.trim().split_once(' ').map(|(_, path)| path.to_string()))
        .filter(|path| !path.is_empty())
        .skip(keep)
        .collect()
}

/// Keeps the `keep` newest dump files in `dump_dir` on `role` and removes the rest.
pub fn clean_old_dumps(session: &mut SyncSession, role: Endpoint, dump_dir: &str, keep: usize) -> Result<usize> {
    let os = check_os(&mut session.gateway, &session.config, role)?;
    let command = list_dumps_command(&session.config, role, &os, dump_dir);
    let listing = session
        .gateway
        .run(&command, role, RunOptions::output().allow_fail().skip_dry_run())?
        .unwrap_or_default();

    let outdated = outdated_dumps(&listing, keep);
    info!(endpoint = %role, "🗑️ Cleaning up {} old dump file(s), keeping {}", outdated.len(), keep);
    for path in &outdated {
        let command = format!("{} -f {}", get_command(&session.config, role, "rm"), quote_shell_arg(path));
        session.gateway.run(&command, role, RunOptions::default())?;
    }
    Ok(outdated.len())
}

fn remove_files(session: &mut SyncSession, role: Endpoint, paths: &[String]) -> Result<()> {
    let quoted: Vec<String> = paths.iter().map(|path| quote_shell_arg(path)).collect();
    let command = format!("{} -f {}", get_command(&session.config, role, "rm"), quoted.join(" "));
    session.gateway.run(&command, role, RunOptions::default())?;
    Ok(())
}

/// Dump-only runs keep the archive on the origin, drop the plain `.sql`
/// and apply the origin's `keep_dumps` retention. Returns the archive path.
pub fn finish_dump_only(session: &mut SyncSession, dump_file: &str) -> Result<String> {
    let role = Endpoint::Origin;
    let dump_dir = session.config.origin.dump_dir.clone();
    remove_files(session, role, &[format!("{}{}", dump_dir, dump_file)])?;

    if let Some(keep) = session.config.origin.keep_dumps {
        clean_old_dumps(session, role, &dump_dir, keep)?;
    }
    let archive = format!("{}{}", dump_dir, archive_name(dump_file));
    info!(endpoint = %role, "💾 Database dump file is saved to: {}", archive);
    Ok(archive)
}

/// Copies the transferred archive into `keep_dir` on the target. Returns the copy's path.
pub fn keep_transferred_dump(session: &mut SyncSession, keep_dir: &str, dump_file: &str) -> Result<String> {
    let role = Endpoint::Target;
    let source_dir = if session.is_same_client {
        session.config.origin.dump_dir.clone()
    } else {
        session.config.target.dump_dir.clone()
    };
    let archive = archive_name(dump_file);
    let kept = format!("{}{}", keep_dir, archive);

    check_and_create_dump_dir(&mut session.gateway, role, keep_dir)?;
    let command = format!(
        "{} {} {}",
        get_command(&session.config, role, "cp"),
        quote_shell_arg(&format!("{}{}", source_dir, archive)),
        quote_shell_arg(&kept)
    );
    session.gateway.run(&command, role, RunOptions::default())?;
    info!(endpoint = %role, "💾 Database dump file is saved to: {}", kept);
    Ok(kept)
}

/// Removes the `.sql` and `.tar.gz` a sync left in the dump directories.
/// Import runs leave the given file alone.
pub fn remove_transferred_dumps(session: &mut SyncSession, dump_file: &str) -> Result<()> {
    if session.mode.is_import() {
        return Ok(());
    }
    info!(endpoint = %Endpoint::Target, "🧹 Cleaning up");
    let mut roles = vec![Endpoint::Origin];
    if !session.is_same_client {
        roles.push(Endpoint::Target);
    }
    for role in roles {
        let Some(dump_dir) = session.config.endpoint(role).map(|endpoint| endpoint.dump_dir.clone()) else {
            continue;
        };
        debug!(endpoint = %role, "Removing dump files from {}", dump_dir);
        let paths = [format!("{}{}", dump_dir, dump_file), format!("{}{}", dump_dir, archive_name(dump_file))];
        remove_files(session, role, &paths)?;
    }
    Ok(())
}
