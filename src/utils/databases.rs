// MySQL client helpers shared by the dump and import stages
use std::fmt;
use tracing::info;

use super::get_command;
use super::quote::{quote_shell_arg, sanitize_identifier};
use crate::config::Endpoint;
use crate::errors::Result;
use crate::exec::RunOptions;
use crate::sync::logic::SyncSession;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseSystem {
    MySql,
    MariaDb,
}

impl fmt::Display for DatabaseSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatabaseSystem::MySql => write!(f, "MySQL"),
            DatabaseSystem::MariaDb => write!(f, "MariaDB"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseVersion {
    pub system: DatabaseSystem,
    pub version: (u32, u32, u32),
}

impl DatabaseVersion {
    /// Parses the output of `SELECT VERSION();`.
    pub fn parse(raw: &str) -> Option<Self> {
        let version = super::parse_version(raw)?;
        let system = if raw.to_ascii_lowercase().contains("mariadb") {
            DatabaseSystem::MariaDb
        } else {
            DatabaseSystem::MySql
        };
        Some(DatabaseVersion { system, version })
    }

    /// `--no-tablespaces` is unknown to MySQL before 5.6.
    pub fn supports_no_tablespaces(&self) -> bool {
        self.system == DatabaseSystem::MariaDb || self.version >= (5, 6, 0)
    }
}

impl fmt::Display for DatabaseVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (major, minor, patch) = self.version;
        write!(f, "{} v{}.{}.{}", self.system, major, minor, patch)
    }
}

fn mysql_command(session: &mut SyncSession, role: Endpoint, sql: &str, with_database: bool) -> Result<String> {
    let db = session.config.db(role)?.clone();
    let credentials = session.vault.credentials_argument(&mut session.gateway, role, &db)?;
    let database = if with_database {
        format!(" {}", quote_shell_arg(&db.name))
    } else {
        String::new()
    };
    Ok(format!(
        "{} {} -N -B{} -e {}",
        get_command(&session.config, role, "mysql"),
        credentials,
        database,
        quote_shell_arg(sql)
    ))
}

/// Runs a statement that changes the database. Skipped under dry-run.
pub fn run_database_command(session: &mut SyncSession, role: Endpoint, sql: &str) -> Result<()> {
    let command = mysql_command(session, role, sql, true)?;
    session.gateway.run(&command, role, RunOptions::default())?;
    Ok(())
}

/// Runs a read-only query and returns its rows, one per line, without header.
pub fn run_database_query(session: &mut SyncSession, role: Endpoint, sql: &str) -> Result<String> {
    let command = mysql_command(session, role, sql, false)?;
    Ok(session
        .gateway
        .run(&command, role, RunOptions::output().skip_dry_run())?
        .unwrap_or_default())
}

pub fn get_database_version(session: &mut SyncSession, role: Endpoint) -> Result<Option<DatabaseVersion>> {
    let raw = run_database_query(session, role, "SELECT VERSION();")?;
    let version = raw.lines().find(|line| !line.trim().is_empty()).and_then(DatabaseVersion::parse);
    if let Some(version) = &version {
        info!(endpoint = %role, "🗄️ Database version: {}", version);
    }
    Ok(version)
}

/// Tables of the endpoint's database matching a `LIKE` pattern.
pub fn get_database_tables_like(session: &mut SyncSession, role: Endpoint, pattern: &str) -> Result<Vec<String>> {
    let db = session.config.db(role)?.clone();
    let sql = format!(
        "SHOW TABLES FROM {} LIKE '{}';",
        sanitize_identifier(&db.name)?,
        pattern.replace('\\', "\\\\").replace('\'', "''")
    );
    let output = run_database_query(session, role, &sql)?;
    Ok(output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

/// Resolves configured table names. Entries with `*` are looked up as wildcards,
/// plain names are kept as given unless `existing_only` is set.
pub fn expand_tables(
    session: &mut SyncSession,
    role: Endpoint,
    tables: &[String],
    existing_only: bool,
) -> Result<Vec<String>> {
    let mut resolved = Vec::new();
    for table in tables.iter().map(|t| t.trim()).filter(|t| !t.is_empty()) {
        if table.contains('*') {
            resolved.extend(get_database_tables_like(session, role, &table.replace('*', "%"))?);
        } else if !existing_only || !get_database_tables_like(session, role, table)?.is_empty() {
            resolved.push(table.to_string());
        }
    }
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_parsing() {
        let mysql = DatabaseVersion::parse("8.0.36-0ubuntu0.22.04.1").unwrap();
        assert_eq!(mysql.system, DatabaseSystem::MySql);
        assert!(mysql.supports_no_tablespaces());
        assert_eq!(mysql.to_string(), "MySQL v8.0.36");

        let mariadb = DatabaseVersion::parse("10.11.6-MariaDB-0+deb12u1").unwrap();
        assert_eq!(mariadb.system, DatabaseSystem::MariaDb);

        let old = DatabaseVersion::parse("5.5.62-log").unwrap();
        assert!(!old.supports_no_tablespaces());
        assert!(DatabaseVersion::parse("").is_none());
    }
}
