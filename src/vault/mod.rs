// dbsynctool/src/vault/mod.rs
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use std::collections::{HashMap, HashSet};
use std::io::Write;
use tempfile::{Builder as TempFileBuilder, TempPath};
use tracing::{debug, warn};

use crate::config::{DbConfig, Endpoint};
use crate::errors::{Result, SyncError};
use crate::exec::{Gateway, RunOptions};
use crate::utils::quote::quote_shell_arg;

enum CredentialsFile {
    Local(TempPath),
    Remote(String),
}

impl CredentialsFile {
    fn path(&self) -> String {
        match self {
            CredentialsFile::Local(path) => path.display().to_string(),
            CredentialsFile::Remote(path) => path.clone(),
        }
    }
}

/// Keeps database passwords out of process listings by handing the MySQL
/// clients a `--defaults-file` instead of `-p<password>`.
///
/// One file per endpoint, created on first use and removed by [`CredentialVault::cleanup_all`].
#[derive(Default)]
pub struct CredentialVault {
    files: HashMap<Endpoint, CredentialsFile>,
    legacy: HashSet<Endpoint>,
}

impl CredentialVault {
    pub fn new() -> Self {
        Self::default()
    }

    /// Path of the credentials file for `role`, creating it when needed.
    ///
    /// Returns `None` when the file could not be created on a remote endpoint;
    /// callers then fall back to inline credentials.
    pub fn ensure_credentials_file(
        &mut self,
        gateway: &mut Gateway,
        role: Endpoint,
        db: &DbConfig,
    ) -> Result<Option<String>> {
        if let Some(file) = self.files.get(&role) {
            return Ok(Some(file.path()));
        }
        if self.legacy.contains(&role) {
            return Ok(None);
        }

        let content = client_config(db)?;
        let file = if gateway.is_remote(role) {
            match create_remote(gateway, role, &content)? {
                Some(path) => CredentialsFile::Remote(path),
                None => {
                    self.legacy.insert(role);
                    return Ok(None);
                }
            }
        } else {
            CredentialsFile::Local(create_local(&content)?)
        };

        let path = file.path();
        debug!(endpoint = %role, "Using secure credentials file {}", path);
        self.files.insert(role, file);
        Ok(Some(path))
    }

    /// Credentials option for `mysql`/`mysqldump`. Must come first among the client options.
    pub fn credentials_argument(&mut self, gateway: &mut Gateway, role: Endpoint, db: &DbConfig) -> Result<String> {
        match self.ensure_credentials_file(gateway, role, db)? {
            // mysql parses --defaults-file itself, so the path stays unquoted
            Some(path) => Ok(format!("--defaults-file={}", path)),
            None => {
                warn!(endpoint = %role, "⚠️ Falling back to inline database credentials");
                Ok(legacy_credentials(db))
            }
        }
    }

    /// Removes every credentials file. Never fails; problems are logged.
    pub fn cleanup_all(&mut self, gateway: &mut Gateway) {
        for (role, file) in self.files.drain() {
            match file {
                CredentialsFile::Local(path) => {
                    let shown = path.display().to_string();
                    if let Err(e) = path.close() {
                        debug!(endpoint = %role, "Failed to remove credentials file {}: {}", shown, e);
                    }
                }
                CredentialsFile::Remote(path) => {
                    let command = format!("rm -f {}", quote_shell_arg(&path));
                    if let Err(e) = gateway.run(&command, role, RunOptions::default().allow_fail().skip_dry_run()) {
                        debug!(endpoint = %role, "Failed to remove credentials file {}: {}", path, e);
                    }
                }
            }
        }
        self.legacy.clear();
    }
}

/// `[client]` option file content for `db`.
fn client_config(db: &DbConfig) -> Result<String> {
    let mut content = String::from("[client]\n");
    content.push_str(&format!("user={}\n", option_value(&db.user)?));
    content.push_str(&format!("password={}\n", option_value(&db.password)?));
    if let Some(host) = &db.host {
        content.push_str(&format!("host={}\n", option_value(host)?));
    }
    if let Some(port) = db.port {
        content.push_str(&format!("port={}\n", port));
    }
    if !db.ssl {
        content.push_str("ssl=0\n");
    }
    Ok(content)
}

/// Escapes a value for a MySQL option file. Values with `#`, `"` or surrounding
/// blanks are double-quoted.
fn option_value(value: &str) -> Result<String> {
    if value.contains(['\n', '\r']) {
        return Err(SyncError::Database("Database credentials must not contain line breaks".to_string()));
    }
    let escaped = value.replace('\\', "\\\\");
    let needs_quotes = escaped.contains(['#', '"', '\'']) || escaped.trim() != escaped;
    if needs_quotes {
        Ok(format!("\"{}\"", escaped.replace('"', "\\\"")))
    } else {
        Ok(escaped)
    }
}

fn create_local(content: &str) -> Result<TempPath> {
    let mut file = TempFileBuilder::new().prefix(".my_").suffix(".cnf").tempfile()?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.as_file().set_permissions(std::fs::Permissions::from_mode(0o600))?;
    }
    file.write_all(content.as_bytes())?;
    file.flush()?;
    Ok(file.into_temp_path())
}

fn create_remote(gateway: &mut Gateway, role: Endpoint, content: &str) -> Result<Option<String>> {
    let path = format!("/tmp/.my_{}.cnf", hex::encode(rand::random::<[u8; 8]>()));
    let command = format!(
        "umask 077 && echo '{}' | base64 -d > {} && chmod 600 {} && echo 'OK'",
        BASE64.encode(content),
        path,
        path
    );
    let result = gateway.run(&command, role, RunOptions::output().allow_fail().skip_dry_run())?;
    if result.as_deref() == Some("OK") {
        Ok(Some(path))
    } else {
        warn!(
            endpoint = %role,
            "⚠️ Failed to create credentials file on remote: {}",
            result.unwrap_or_default()
        );
        Ok(None)
    }
}

/// Inline `-u/-p/-h/-P` flags. Exposes the password in process listings.
fn legacy_credentials(db: &DbConfig) -> String {
    let mut credentials = format!("-u{}", quote_shell_arg(&db.user));
    if !db.password.is_empty() {
        credentials.push_str(&format!(" -p{}", quote_shell_arg(&db.password)));
    }
    if let Some(host) = &db.host {
        credentials.push_str(&format!(" -h{}", quote_shell_arg(host)));
    }
    if let Some(port) = db.port {
        credentials.push_str(&format!(" -P{}", port));
    }
    credentials
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::redact::sanitize_command_for_logging;
    use crate::exec::testing::{Recorder, gateway_for};
    use crate::sync::mode::SyncMode;
    use std::path::Path;

    fn db() -> DbConfig {
        DbConfig {
            name: "shop".to_string(),
            host: Some("127.0.0.1".to_string()),
            port: Some(3306),
            user: "app".to_string(),
            password: "p@ss word".to_string(),
            ssl: false,
        }
    }

    #[test]
    fn test_client_config_content() -> anyhow::Result<()> {
        assert_eq!(
            client_config(&db())?,
            "[client]\nuser=app\npassword=p@ss word\nhost=127.0.0.1\nport=3306\nssl=0\n"
        );
        let plain = DbConfig { password: "secret".to_string(), host: None, port: None, ssl: true, ..db() };
        assert_eq!(client_config(&plain)?, "[client]\nuser=app\npassword=secret\n");
        Ok(())
    }

    #[test]
    fn test_option_value_escaping() -> anyhow::Result<()> {
        assert_eq!(option_value("a\\b")?, "a\\\\b");
        assert_eq!(option_value("x#y")?, "\"x#y\"");
        assert_eq!(option_value("say \"hi\"")?, "\"say \\\"hi\\\"\"");
        assert!(option_value("evil\nhost=attacker").is_err());
        Ok(())
    }

    #[test]
    fn test_local_file_lifecycle() -> anyhow::Result<()> {
        let recorder = Recorder::default();
        let mut gateway = gateway_for(SyncMode::SyncLocal, false, &recorder);
        let mut vault = CredentialVault::new();

        let path = vault.ensure_credentials_file(&mut gateway, Endpoint::Origin, &db())?.unwrap();
        let again = vault.ensure_credentials_file(&mut gateway, Endpoint::Origin, &db())?.unwrap();
        assert_eq!(path, again);
        assert!(Path::new(&path).file_name().unwrap().to_string_lossy().starts_with(".my_"));
        assert!(std::fs::read_to_string(&path)?.contains("user=app"));
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            assert_eq!(std::fs::metadata(&path)?.permissions().mode() & 0o777, 0o600);
        }

        let argument = vault.credentials_argument(&mut gateway, Endpoint::Origin, &db())?;
        assert_eq!(argument, format!("--defaults-file={}", path));
        assert!(recorder.commands().is_empty());

        vault.cleanup_all(&mut gateway);
        assert!(!Path::new(&path).exists());
        Ok(())
    }

    #[test]
    fn test_remote_file_created_over_gateway_even_in_dry_run() -> anyhow::Result<()> {
        let recorder = Recorder::default();
        recorder.respond("umask 077", 0, "OK\n", "");
        let mut gateway = gateway_for(SyncMode::Receiver, true, &recorder);
        let mut vault = CredentialVault::new();

        let argument = vault.credentials_argument(&mut gateway, Endpoint::Origin, &db())?;
        let path = argument.trim_start_matches("--defaults-file=").to_string();
        assert!(path.starts_with("/tmp/.my_") && path.ends_with(".cnf"));
        assert_eq!(path.len(), "/tmp/.my_".len() + 16 + ".cnf".len());

        let commands = recorder.remote_commands(Endpoint::Origin);
        assert_eq!(commands.len(), 1);
        assert!(!commands[0].contains("p@ss word"));
        assert!(commands[0].ends_with(&format!("chmod 600 {} && echo 'OK'", path)));
        assert!(!sanitize_command_for_logging(&commands[0]).contains(&BASE64.encode(client_config(&db())?)));

        vault.cleanup_all(&mut gateway);
        assert_eq!(recorder.remote_commands(Endpoint::Origin).last(), Some(&format!("rm -f {}", path)));
        Ok(())
    }

    #[test]
    fn test_remote_failure_falls_back_to_inline_credentials_once() -> anyhow::Result<()> {
        let recorder = Recorder::default();
        recorder.respond("umask 077", 1, "", "base64: not found\n");
        let mut gateway = gateway_for(SyncMode::Sender, false, &recorder);
        let mut vault = CredentialVault::new();

        let argument = vault.credentials_argument(&mut gateway, Endpoint::Target, &db())?;
        assert_eq!(argument, "-uapp -p'p@ss word' -h127.0.0.1 -P3306");
        vault.credentials_argument(&mut gateway, Endpoint::Target, &db())?;
        assert_eq!(recorder.remote_commands(Endpoint::Target).len(), 1);

        vault.cleanup_all(&mut gateway);
        assert_eq!(recorder.remote_commands(Endpoint::Target).len(), 1);
        Ok(())
    }

    #[test]
    fn test_cleanup_survives_failed_remote_removal() -> anyhow::Result<()> {
        let recorder = Recorder::default();
        recorder.respond("umask 077", 0, "OK\n", "");
        recorder.respond("rm -f", 1, "", "rm: cannot remove: Permission denied\n");
        let mut gateway = gateway_for(SyncMode::Sender, false, &recorder)
            .with_error_script(Some("notify-failure".to_string()));
        let mut vault = CredentialVault::new();

        let local = vault.ensure_credentials_file(&mut gateway, Endpoint::Origin, &db())?.unwrap();
        let remote = vault.ensure_credentials_file(&mut gateway, Endpoint::Target, &db())?.unwrap();

        vault.cleanup_all(&mut gateway);
        assert!(vault.files.is_empty());
        assert!(!Path::new(&local).exists());
        assert_eq!(recorder.remote_commands(Endpoint::Target).last(), Some(&format!("rm -f {}", remote)));
        assert!(!recorder.local_commands().contains(&"notify-failure".to_string()));

        vault.cleanup_all(&mut gateway);
        assert_eq!(recorder.remote_commands(Endpoint::Target).len(), 2);
        Ok(())
    }

    #[test]
    fn test_cleanup_survives_lost_remote_session() -> anyhow::Result<()> {
        let recorder = Recorder::default();
        recorder.respond("umask 077", 0, "OK\n", "");
        let mut gateway = gateway_for(SyncMode::Receiver, false, &recorder);
        let mut vault = CredentialVault::new();
        vault.ensure_credentials_file(&mut gateway, Endpoint::Origin, &db())?;
        assert_eq!(recorder.connections(), 1);

        gateway.close_all();
        recorder.refuse_connections(true);
        vault.cleanup_all(&mut gateway);

        assert!(vault.files.is_empty());
        assert_eq!(recorder.connections(), 1);
        assert_eq!(recorder.remote_commands(Endpoint::Origin).len(), 1);
        Ok(())
    }
}
