// dbsynctool/src/restore/verification.rs
use tracing::{debug, info};

use crate::config::Endpoint;
use crate::errors::{Result, SyncError};
use crate::exec::RunOptions;
use crate::sync::logic::SyncSession;
use crate::utils::get_command;
use crate::utils::quote::quote_shell_arg;

pub const DUMP_COMPLETED_MARKER: &str = "-- Dump completed on";

/// Dump checks never abort a dry run, where the dump file may not exist.
fn check_options(session: &SyncSession) -> RunOptions {
    let options = RunOptions::output().skip_dry_run();
    if session.gateway.is_dry_run() { options.allow_fail() } else { options }
}

/// Fails with a database error unless the dump's last non-empty line carries the
/// mysqldump completion marker. An empty dump counts as corrupted.
///
/// Does nothing when dump checking is disabled. A dry run only logs what it finds,
/// since the dump was never written.
pub fn check_database_dump(session: &mut SyncSession, role: Endpoint, path: &str) -> Result<()> {
    if !session.config.dump.check_dump {
        return Ok(());
    }
    let command = last_line_command(session, role, path);
    let options = check_options(session);
    let line = session.gateway.run(&command, role, options)?.unwrap_or_default();

    if line.contains(DUMP_COMPLETED_MARKER) {
        debug!(endpoint = %role, "Dump file is valid");
        return Ok(());
    }
    if session.gateway.is_dry_run() {
        debug!(endpoint = %role, "No completed dump to check in {}", path);
        return Ok(());
    }
    Err(SyncError::Database(format!("Dump file is corrupted: {}", path)))
}

/// Last non-empty line of `path`. Trailing blank lines are skipped.
fn last_line_command(session: &SyncSession, role: Endpoint, path: &str) -> String {
    let tail = get_command(&session.config, role, "tail");
    format!(
        "{} -n 10 {} | {} -v '^[[:space:]]*$' | {} -n 1",
        tail,
        quote_shell_arg(path),
        get_command(&session.config, role, "grep"),
        tail
    )
}

/// Counts `CREATE TABLE` statements in a dump file.
pub fn count_tables(session: &mut SyncSession, role: Endpoint, path: &str) -> Result<Option<usize>> {
    let command = format!(
        "{} -ao \"CREATE TABLE\" {} | wc -l | xargs",
        get_command(&session.config, role, "grep"),
        quote_shell_arg(path)
    );
    let options = check_options(session);
    let count = session
        .gateway
        .run(&command, role, options)?
        .and_then(|output| output.trim().parse::<usize>().ok());
    if let Some(count) = count {
        info!(endpoint = %role, "✓ {} table(s) exported", count);
    }
    Ok(count)
}
