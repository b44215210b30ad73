// dbsynctool/src/restore/db_restore.rs
use tracing::{info, warn};

use crate::config::Endpoint;
use crate::errors::Result;
use crate::exec::RunOptions;
use crate::sync::logic::SyncSession;
use crate::utils::databases::{self, run_database_command};
use crate::utils::quote::{quote_shell_arg, sanitize_identifier};
use crate::utils::{check_file_exists, get_command};

/// `SET FOREIGN_KEY_CHECKS=0; DROP TABLE ...; SET FOREIGN_KEY_CHECKS=1;` for the given tables.
pub fn drop_tables_statement(tables: &[String]) -> Result<Option<String>> {
    if tables.is_empty() {
        return Ok(None);
    }
    let mut sql = String::from("SET FOREIGN_KEY_CHECKS=0;");
    for table in tables {
        sql.push_str(&format!(" DROP TABLE {};", sanitize_identifier(table)?));
    }
    sql.push_str(" SET FOREIGN_KEY_CHECKS=1;");
    Ok(Some(sql))
}

/// Drops every table of the endpoint's database.
pub fn clear_database(session: &mut SyncSession, role: Endpoint) -> Result<()> {
    info!(endpoint = %role, "🧹 Clearing database before import");
    let tables = databases::get_database_tables_like(session, role, "%")?;
    match drop_tables_statement(&tables)? {
        Some(sql) => run_database_command(session, role, &sql),
        None => Ok(()),
    }
}

/// Truncates the configured tables. Wildcards are expanded, missing tables skipped.
pub fn truncate_tables(session: &mut SyncSession, role: Endpoint) -> Result<()> {
    let configured = session.config.dump.truncate_tables.clone();
    if configured.is_empty() {
        return Ok(());
    }
    info!(endpoint = %role, "✂️ Truncating tables before import");
    for table in databases::expand_tables(session, role, &configured, true)? {
        let sql = format!("TRUNCATE TABLE {}", sanitize_identifier(&table)?);
        run_database_command(session, role, &sql)?;
    }
    Ok(())
}

/// Imports one SQL file into the endpoint's database if the file exists there.
pub fn import_database_dump_file(session: &mut SyncSession, role: Endpoint, path: &str) -> Result<bool> {
    if !check_file_exists(&mut session.gateway, role, path)? {
        warn!(endpoint = %role, "⚠️ File {} not found, skipping import", path);
        return Ok(false);
    }
    let db = session.config.db(role)?.clone();
    let credentials = session.vault.credentials_argument(&mut session.gateway, role, &db)?;
    let command = format!(
        "{} {} {} < {}",
        get_command(&session.config, role, "mysql"),
        credentials,
        quote_shell_arg(&db.name),
        quote_shell_arg(path)
    );
    session.gateway.run(&command, role, RunOptions::default())?;
    Ok(true)
}

/// Runs the target's `after_dump` file and `post_sql` statements.
pub fn run_after_import(session: &mut SyncSession) -> Result<()> {
    let role = Endpoint::Target;
    if let Some(after_dump) = session.config.target.after_dump.clone() {
        info!(endpoint = %role, "📥 Importing after_dump file {}", after_dump);
        import_database_dump_file(session, role, &after_dump)?;
    }
    let post_sql = session.config.target.post_sql.clone();
    if !post_sql.is_empty() {
        info!(endpoint = %role, "⚙️ Running {} post sql command(s)", post_sql.len());
        for sql in &post_sql {
            run_database_command(session, role, sql)?;
        }
    }
    Ok(())
}
