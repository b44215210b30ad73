// dbsynctool/src/config/mod.rs
pub mod database_url;

use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::errors::{Result, SyncError};

pub const DEFAULT_DUMP_DIR: &str = "/tmp/";
pub const DEFAULT_SSH_PORT: u16 = 22;

/// A named side of the sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Origin,
    Target,
    Local,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Origin => write!(f, "origin"),
            Endpoint::Target => write!(f, "target"),
            Endpoint::Local => write!(f, "local"),
        }
    }
}

// Structs for deserializing the configuration file
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum PortValue {
    Number(u16),
    Text(String),
}

impl PortValue {
    fn resolve(&self, field: &str) -> Result<u16> {
        match self {
            PortValue::Number(port) => Ok(*port),
            PortValue::Text(text) => text
                .trim()
                .parse()
                .map_err(|_| SyncError::Config(format!("{} must be a port number, got {:?}", field, text))),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawDbConfig {
    pub name: Option<String>,
    pub host: Option<String>,
    pub port: Option<PortValue>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub ssl: Option<bool>,
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawJumpHost {
    pub host: Option<String>,
    pub user: Option<String>,
    pub port: Option<PortValue>,
    pub password: Option<String>,
    pub ssh_key: Option<PathBuf>,
    pub private: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Scripts {
    pub before: Option<String>,
    pub after: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawEndpointConfig {
    pub name: Option<String>,
    pub host: Option<String>,
    pub port: Option<PortValue>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub ssh_key: Option<PathBuf>,
    pub jump_host: Option<RawJumpHost>,
    pub path: Option<String>,
    pub db: Option<RawDbConfig>,
    pub dump_dir: Option<String>,
    pub keep_dumps: Option<usize>,
    #[serde(default)]
    pub protect: bool,
    pub scripts: Option<Scripts>,
    pub after_dump: Option<String>,
    #[serde(default)]
    pub post_sql: Vec<String>,
    #[serde(default)]
    pub console: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawConfig {
    #[serde(default)]
    pub origin: RawEndpointConfig,
    #[serde(default)]
    pub target: RawEndpointConfig,
    pub verbose: Option<bool>,
    pub mute: Option<bool>,
    pub dry_run: Option<bool>,
    pub yes: Option<bool>,
    pub import: Option<String>,
    pub dump_name: Option<String>,
    pub clear_database: Option<bool>,
    pub check_dump: Option<bool>,
    pub tables: Option<String>,
    #[serde(rename = "where")]
    pub where_clause: Option<String>,
    pub additional_mysqldump_options: Option<String>,
    #[serde(default, alias = "ignore_table")]
    pub ignore_tables: Vec<String>,
    #[serde(default, alias = "truncate_table")]
    pub truncate_tables: Vec<String>,
    pub ssh_agent: Option<bool>,
    pub scripts: Option<Scripts>,
    pub log_file: Option<PathBuf>,
    pub keep_dump: Option<String>,
    pub reverse: Option<bool>,
}

// Application's internal configuration structs
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DbConfig {
    pub name: String,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: String,
    pub password: String,
    pub ssl: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JumpHostConfig {
    pub host: String,
    pub user: Option<String>,
    pub port: Option<u16>,
    pub password: Option<String>,
    pub ssh_key: Option<PathBuf>,
    pub private: Option<String>,
    pub name: Option<String>,
}

/// How an SSH endpoint authenticates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SshAuth {
    Key(PathBuf),
    Password(String),
    Agent,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EndpointConfig {
    pub name: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub ssh_key: Option<PathBuf>,
    pub jump_host: Option<JumpHostConfig>,
    pub path: Option<String>,
    pub db: Option<DbConfig>,
    pub dump_dir: String,
    pub keep_dumps: Option<usize>,
    pub protect: bool,
    pub scripts: Scripts,
    pub after_dump: Option<String>,
    pub post_sql: Vec<String>,
    pub console: HashMap<String, String>,
}

impl EndpointConfig {
    pub fn ssh_port(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_SSH_PORT)
    }

    /// Picks the SSH authentication method: key, then password, then agent.
    pub fn ssh_auth(&self, ssh_agent: bool) -> Result<SshAuth> {
        if let Some(key) = &self.ssh_key {
            Ok(SshAuth::Key(key.clone()))
        } else if let Some(password) = &self.password {
            Ok(SshAuth::Password(password.clone()))
        } else if ssh_agent {
            Ok(SshAuth::Agent)
        } else {
            Err(SyncError::Config(
                "Missing SSH authentication. Neither ssh key nor ssh password given.".to_string(),
            ))
        }
    }

    /// Human readable host label, e.g. `live (deploy@example.com)`.
    pub fn host_label(&self, with_user: bool) -> String {
        let Some(host) = &self.host else {
            return "local".to_string();
        };
        let address = match (&self.user, with_user) {
            (Some(user), true) => format!("{}@{}", user, host),
            _ => host.clone(),
        };
        match &self.name {
            Some(name) => format!("{} ({})", name, address),
            None => address,
        }
    }

    /// Returns the overridden binary for `command` if the endpoint configures one.
    pub fn command(&self, command: &str) -> String {
        self.console.get(command).cloned().unwrap_or_else(|| command.to_string())
    }

    pub fn db(&self, role: Endpoint) -> Result<&DbConfig> {
        self.db
            .as_ref()
            .ok_or_else(|| SyncError::Database(format!("Database configuration not found for {}", role)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DumpOptions {
    pub dump_name: Option<String>,
    pub check_dump: bool,
    pub clear_database: bool,
    pub tables: Vec<String>,
    pub where_clause: Option<String>,
    pub additional_mysqldump_options: Option<String>,
    pub ignore_tables: Vec<String>,
    pub truncate_tables: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SyncConfig {
    pub origin: EndpointConfig,
    pub target: EndpointConfig,
    pub verbose: bool,
    pub mute: bool,
    pub dry_run: bool,
    pub yes: bool,
    pub import_file: Option<String>,
    pub dump: DumpOptions,
    pub ssh_agent: bool,
    pub scripts: Scripts,
    pub log_file: Option<PathBuf>,
    /// Directory that receives a copy of the transferred archive instead of importing it.
    pub keep_dump: Option<String>,
    /// Origin and target of the file were swapped for this run.
    pub reverse: bool,
}

/// Values given on the command line. Anything set here wins over the file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub verbose: bool,
    pub mute: bool,
    pub dry_run: bool,
    pub yes: bool,
    pub import: Option<String>,
    pub dump_name: Option<String>,
    pub clear_database: bool,
    pub skip_check_dump: bool,
    pub tables: Option<String>,
    pub where_clause: Option<String>,
    pub additional_mysqldump_options: Option<String>,
    pub ssh_agent: bool,
    pub log_file: Option<PathBuf>,
    pub keep_dump: Option<String>,
    pub reverse: bool,
    pub origin: EndpointOverrides,
    pub target: EndpointOverrides,
}

#[derive(Debug, Clone, Default)]
pub struct EndpointOverrides {
    pub host: Option<String>,
    pub user: Option<String>,
    pub port: Option<u16>,
    pub ssh_key: Option<PathBuf>,
    pub path: Option<String>,
    pub db_name: Option<String>,
}

impl SyncConfig {
    /// Loads the optional configuration file, applies CLI overrides and validates the result.
    pub fn load(config_path: Option<&Path>, overrides: &Overrides) -> Result<Self> {
        let mut raw = match config_path {
            Some(path) => RawConfig::load_from_file(path)?,
            None => RawConfig::default(),
        };
        if overrides.reverse {
            raw.reverse = Some(true);
        }
        if raw.reverse.unwrap_or(false) {
            std::mem::swap(&mut raw.origin, &mut raw.target);
        }
        raw.apply_overrides(overrides);
        let config = SyncConfig::try_from(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn endpoint(&self, role: Endpoint) -> Option<&EndpointConfig> {
        match role {
            Endpoint::Origin => Some(&self.origin),
            Endpoint::Target => Some(&self.target),
            Endpoint::Local => None,
        }
    }

    pub fn db(&self, role: Endpoint) -> Result<&DbConfig> {
        self.endpoint(role)
            .and_then(|endpoint| endpoint.db.as_ref())
            .ok_or_else(|| SyncError::Database(format!("Database configuration not found for {}", role)))
    }

    fn validate(&self) -> Result<()> {
        for (role, endpoint) in [(Endpoint::Origin, &self.origin), (Endpoint::Target, &self.target)] {
            if endpoint.host.is_none() {
                continue;
            }
            if endpoint.user.is_none() {
                return Err(SyncError::Config(format!("Missing SSH user for {} host", role)));
            }
            if let SshAuth::Key(key) = endpoint.ssh_auth(self.ssh_agent)? {
                if !key.is_file() {
                    return Err(SyncError::FileAccess(format!(
                        "SSH key file not found for {}: {}",
                        role,
                        key.display()
                    )));
                }
            }
        }
        if matches!(self.import_file.as_deref(), Some(path) if path.trim().is_empty()) {
            return Err(SyncError::Config("Import file path cannot be empty".to_string()));
        }
        if self.import_file.is_some() && self.keep_dump.is_some() {
            return Err(SyncError::Config("keep_dump cannot be combined with an import file".to_string()));
        }
        Ok(())
    }
}

impl RawConfig {
    pub fn load_from_file(config_path: &Path) -> Result<Self> {
        if !config_path.is_file() {
            return Err(SyncError::FileAccess(format!(
                "Configuration file not found: {}",
                config_path.display()
            )));
        }
        let content = fs::read_to_string(config_path)?;
        let extension = config_path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase());
        match extension.as_deref() {
            Some("json") => Ok(serde_json::from_str(&content)?),
            Some("yml") | Some("yaml") => Ok(serde_yaml::from_str(&content)?),
            _ => Err(SyncError::Config(format!(
                "Unsupported configuration file type: {} (expected .json, .yml or .yaml)",
                config_path.display()
            ))),
        }
    }

    pub fn apply_overrides(&mut self, overrides: &Overrides) {
        fn flag(target: &mut Option<bool>, value: bool) {
            if value {
                *target = Some(true);
            }
        }
        flag(&mut self.verbose, overrides.verbose);
        flag(&mut self.mute, overrides.mute);
        flag(&mut self.dry_run, overrides.dry_run);
        flag(&mut self.yes, overrides.yes);
        flag(&mut self.clear_database, overrides.clear_database);
        flag(&mut self.ssh_agent, overrides.ssh_agent);
        if overrides.skip_check_dump {
            self.check_dump = Some(false);
        }
        if overrides.import.is_some() {
            self.import = overrides.import.clone();
        }
        if overrides.dump_name.is_some() {
            self.dump_name = overrides.dump_name.clone();
        }
        if overrides.tables.is_some() {
            self.tables = overrides.tables.clone();
        }
        if overrides.where_clause.is_some() {
            self.where_clause = overrides.where_clause.clone();
        }
        if overrides.additional_mysqldump_options.is_some() {
            self.additional_mysqldump_options = overrides.additional_mysqldump_options.clone();
        }
        if overrides.log_file.is_some() {
            self.log_file = overrides.log_file.clone();
        }
        if overrides.keep_dump.is_some() {
            self.keep_dump = overrides.keep_dump.clone();
        }
        self.origin.apply_overrides(&overrides.origin);
        self.target.apply_overrides(&overrides.target);
    }
}

impl RawEndpointConfig {
    fn apply_overrides(&mut self, overrides: &EndpointOverrides) {
        if overrides.host.is_some() {
            self.host = overrides.host.clone();
        }
        if overrides.user.is_some() {
            self.user = overrides.user.clone();
        }
        if let Some(port) = overrides.port {
            self.port = Some(PortValue::Number(port));
        }
        if overrides.ssh_key.is_some() {
            self.ssh_key = overrides.ssh_key.clone();
        }
        if overrides.path.is_some() {
            self.path = overrides.path.clone();
        }
        if let Some(name) = &overrides.db_name {
            self.db.get_or_insert_with(RawDbConfig::default).name = Some(name.clone());
        }
    }
}

impl TryFrom<RawConfig> for SyncConfig {
    type Error = SyncError;

    fn try_from(raw: RawConfig) -> Result<Self> {
        let tables = raw
            .tables
            .as_deref()
            .map(|tables| {
                tables
                    .split(',')
                    .map(str::trim)
                    .filter(|table| !table.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Ok(SyncConfig {
            origin: EndpointConfig::try_from(raw.origin)?,
            target: EndpointConfig::try_from(raw.target)?,
            verbose: raw.verbose.unwrap_or(false),
            mute: raw.mute.unwrap_or(false),
            dry_run: raw.dry_run.unwrap_or(false),
            yes: raw.yes.unwrap_or(false),
            import_file: raw.import.filter(|path| !path.is_empty()),
            dump: DumpOptions {
                dump_name: raw.dump_name.filter(|name| !name.is_empty()),
                check_dump: raw.check_dump.unwrap_or(true),
                clear_database: raw.clear_database.unwrap_or(false),
                tables,
                where_clause: raw.where_clause.filter(|clause| !clause.is_empty()),
                additional_mysqldump_options: raw.additional_mysqldump_options.filter(|opts| !opts.is_empty()),
                ignore_tables: raw.ignore_tables,
                truncate_tables: raw.truncate_tables,
            },
            ssh_agent: raw.ssh_agent.unwrap_or(false),
            scripts: raw.scripts.unwrap_or_default(),
            log_file: raw.log_file,
            keep_dump: raw.keep_dump.filter(|dir| !dir.trim().is_empty()).map(|dir| directory(&dir)),
            reverse: raw.reverse.unwrap_or(false),
        })
    }
}

/// Directory paths are joined with file names by concatenation, so they end in `/`.
fn directory(dir: &str) -> String {
    if dir.ends_with('/') { dir.to_string() } else { format!("{}/", dir) }
}

impl TryFrom<RawEndpointConfig> for EndpointConfig {
    type Error = SyncError;

    fn try_from(raw: RawEndpointConfig) -> Result<Self> {
        let dump_dir = match raw.dump_dir.filter(|dir| !dir.is_empty()) {
            Some(dir) => directory(&dir),
            None => DEFAULT_DUMP_DIR.to_string(),
        };

        Ok(EndpointConfig {
            name: raw.name,
            host: raw.host.filter(|host| !host.is_empty()),
            port: raw.port.as_ref().map(|port| port.resolve("port")).transpose()?,
            user: raw.user,
            password: raw.password,
            ssh_key: raw.ssh_key,
            jump_host: raw.jump_host.map(JumpHostConfig::try_from).transpose()?,
            path: raw.path,
            db: raw.db.map(DbConfig::try_from).transpose()?,
            dump_dir,
            keep_dumps: raw.keep_dumps,
            protect: raw.protect,
            scripts: raw.scripts.unwrap_or_default(),
            after_dump: raw.after_dump,
            post_sql: raw.post_sql,
            console: raw.console,
        })
    }
}

impl TryFrom<RawDbConfig> for DbConfig {
    type Error = SyncError;

    fn try_from(raw: RawDbConfig) -> Result<Self> {
        let mut db = match &raw.url {
            Some(url) => database_url::parse_database_url(url)?,
            None => DbConfig::default(),
        };
        if let Some(name) = raw.name {
            db.name = name;
        }
        if raw.host.is_some() {
            db.host = raw.host;
        }
        if let Some(port) = &raw.port {
            db.port = Some(port.resolve("db.port")?);
        }
        if let Some(user) = raw.user {
            db.user = user;
        }
        if let Some(password) = raw.password {
            db.password = password;
        }
        db.ssl = raw.ssl.unwrap_or(db.ssl);
        Ok(db)
    }
}

impl TryFrom<RawJumpHost> for JumpHostConfig {
    type Error = SyncError;

    fn try_from(raw: RawJumpHost) -> Result<Self> {
        let host = raw
            .host
            .filter(|host| !host.is_empty())
            .ok_or_else(|| SyncError::Config("jump_host requires a host".to_string()))?;
        Ok(JumpHostConfig {
            host,
            user: raw.user,
            port: raw.port.as_ref().map(|port| port.resolve("jump_host.port")).transpose()?,
            password: raw.password,
            ssh_key: raw.ssh_key,
            private: raw.private,
            name: raw.name,
        })
    }
}
