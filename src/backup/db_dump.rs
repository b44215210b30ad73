// dbsynctool/src/backup/db_dump.rs
use chrono::{DateTime, Local};
use tracing::{info, warn};

use crate::config::{DumpOptions, Endpoint, SyncConfig};
use crate::errors::{Result, SyncError};
use crate::exec::RunOptions;
use crate::restore::verification;
use crate::sync::logic::SyncSession;
use crate::utils::databases::{self, DatabaseVersion};
use crate::utils::quote::{quote_shell_arg, sanitize_identifier};
use crate::utils::{check_and_create_dump_dir, get_command};

/// `<dump_name>.sql`, or `_<db>_<YYYY-mm-dd_HH-MM>.sql` when no name was given.
pub fn generate_dump_filename(config: &SyncConfig, now: DateTime<Local>) -> Result<String> {
    if let Some(name) = &config.dump.dump_name {
        return Ok(format!("{}.sql", name));
    }
    let db = config.origin.db(Endpoint::Origin)?;
    Ok(format!("_{}_{}.sql", db.name, now.format("%Y-%m-%d_%H-%M")))
}

/// Options placed between the credentials and the database name.
pub fn mysqldump_options(version: Option<&DatabaseVersion>, dump: &DumpOptions) -> String {
    let mut options = Vec::new();
    if version.is_none_or(|v| v.supports_no_tablespaces()) {
        options.push("--no-tablespaces".to_string());
    }
    if let Some(clause) = &dump.where_clause {
        options.push(format!("--where={}", quote_shell_arg(clause)));
    }
    if let Some(additional) = &dump.additional_mysqldump_options {
        options.push(additional.trim().to_string());
    }
    options.join(" ")
}

/// `--ignore-table=<db>.<table>` for every resolved table.
pub fn ignore_table_options(db_name: &str, tables: &[String]) -> Result<Vec<String>> {
    tables
        .iter()
        .map(|table| {
            let safe = sanitize_identifier(table)?;
            Ok(format!(
                "--ignore-table={}",
                quote_shell_arg(&format!("{}.{}", db_name, safe.trim_matches('`')))
            ))
        })
        .collect()
}

/// Table arguments for a partial dump.
pub fn table_arguments(tables: &[String]) -> Result<Vec<String>> {
    tables
        .iter()
        .map(|table| Ok(quote_shell_arg(sanitize_identifier(table)?.trim_matches('`'))))
        .collect()
}

pub struct DumpCommand<'a> {
    pub mysqldump: &'a str,
    pub credentials: &'a str,
    pub options: &'a str,
    pub db_name: &'a str,
    pub ignore: &'a [String],
    pub tables: &'a [String],
    pub dump_path: &'a str,
}

impl DumpCommand<'_> {
    /// `mysqldump <credentials> [options] <db> [--ignore-table ...] [tables ...] > <path>`
    pub fn render(&self) -> String {
        let mut parts = vec![self.mysqldump.to_string(), self.credentials.to_string()];
        if !self.options.is_empty() {
            parts.push(self.options.to_string());
        }
        parts.push(quote_shell_arg(self.db_name));
        parts.extend(self.ignore.iter().cloned());
        parts.extend(self.tables.iter().cloned());
        parts.push(">".to_string());
        parts.push(quote_shell_arg(self.dump_path));
        parts.join(" ")
    }
}

/// Dumps the origin database into `<dump_dir><dump file>`, validates it and counts its tables.
pub fn create_origin_database_dump(session: &mut SyncSession) -> Result<String> {
    let role = Endpoint::Origin;
    let db = session.config.origin.db(role)?.clone();
    let file_name = generate_dump_filename(&session.config, Local::now())?;
    let dump_dir = session.config.origin.dump_dir.clone();
    check_and_create_dump_dir(&mut session.gateway, role, &dump_dir)?;

    let dump_path = format!("{}{}", dump_dir, file_name);
    let version = databases::get_database_version(session, role)?;
    info!(endpoint = %role, "💾 Creating database dump {}", dump_path);

    let options = mysqldump_options(version.as_ref(), &session.config.dump);
    let ignore_patterns = session.config.dump.ignore_tables.clone();
    let ignored = databases::expand_tables(session, role, &ignore_patterns, false)?;
    let ignore = ignore_table_options(&db.name, &ignored)?;
    let include_patterns = session.config.dump.tables.clone();
    let included = databases::expand_tables(session, role, &include_patterns, false)?;
    if !include_patterns.is_empty() && included.is_empty() {
        warn!(endpoint = %role, "⚠️ No table matches {}, dumping the whole database", include_patterns.join(", "));
    }
    let tables = table_arguments(&included)?;
    let credentials = session.vault.credentials_argument(&mut session.gateway, role, &db)?;
    let mysqldump = get_command(&session.config, role, "mysqldump");

    let command = DumpCommand {
        mysqldump: &mysqldump,
        credentials: &credentials,
        options: &options,
        db_name: &db.name,
        ignore: &ignore,
        tables: &tables,
        dump_path: &dump_path,
    }
    .render();
    session.gateway.run(&command, role, RunOptions::default())?;

    verification::check_database_dump(session, role, &dump_path)?;
    verification::count_tables(session, role, &dump_path)?;
    Ok(file_name)
}

/// Dump file name given on the command line for an import run.
pub fn import_file_name(path: &str) -> Result<&str> {
    path.rsplit('/')
        .next()
        .filter(|name| !name.is_empty())
        .ok_or_else(|| SyncError::FileAccess(format!("Invalid import file path: {}", path)))
}
