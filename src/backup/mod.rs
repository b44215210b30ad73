pub(crate) mod archive;
pub(crate) mod db_dump;

use crate::errors::Result;
use crate::sync::logic::SyncSession;

/// Origin side of a run: dumps the database and packs the dump.
///
/// Returns the name of the `.sql` file inside the origin dump directory.
pub fn run_backup_flow(session: &mut SyncSession) -> Result<String> {
    let dump_file = db_dump::create_origin_database_dump(session)?;
    archive::prepare_origin_database_dump(session, &dump_file)?;
    Ok(dump_file)
}
