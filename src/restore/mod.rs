pub(crate) mod db_restore;
pub(crate) mod verification;

use tracing::info;

use crate::backup::archive;
use crate::config::Endpoint;
use crate::errors::Result;
use crate::sync::logic::SyncSession;
use crate::utils::{databases, host_name};

/// Path of the `.sql` file to import on the target.
fn import_path(session: &SyncSession, dump_file: &str) -> String {
    match &session.config.import_file {
        Some(path) if session.mode.is_import() => path.clone(),
        _ if session.is_same_client => format!("{}{}", session.config.origin.dump_dir, dump_file),
        _ => format!("{}{}", session.config.target.dump_dir, dump_file),
    }
}

/// Target side of a run: unpack, confirm, clear/truncate, import, after_dump, post_sql.
///
/// Returns `false` when the user declined the import.
pub fn run_restore_flow(
    session: &mut SyncSession,
    dump_file: &str,
    confirm: &mut dyn FnMut(&str) -> Result<bool>,
) -> Result<bool> {
    let role = Endpoint::Target;
    if !session.is_same_client && !session.mode.is_import() {
        archive::prepare_target_database_dump(session, dump_file)?;
    }

    if !session.config.yes && !session.gateway.is_dry_run() {
        let prompt = format!(
            "Are you sure, you want to import the dump file into {} database?",
            host_name(&session.config, role)
        );
        if !confirm(&prompt)? {
            info!(endpoint = %role, "🛑 Import declined");
            return Ok(false);
        }
    }

    if session.config.dump.clear_database {
        db_restore::clear_database(session, role)?;
    }
    db_restore::truncate_tables(session, role)?;

    databases::get_database_version(session, role)?;
    let dump_path = import_path(session, dump_file);
    verification::check_database_dump(session, role, &dump_path)?;
    info!(endpoint = %role, "📥 Importing database dump");
    db_restore::import_database_dump_file(session, role, &dump_path)?;
    db_restore::run_after_import(session)?;
    Ok(true)
}
