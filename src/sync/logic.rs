// dbsynctool/src/sync/logic.rs
use tempfile::TempDir;
use tracing::debug;

use crate::backup::{self, db_dump};
use crate::cleanup;
use crate::config::{Endpoint, SyncConfig};
use crate::errors::Result;
use crate::exec::Gateway;
use crate::restore;
use crate::sync::mode::{Classification, SyncMode};
use crate::transfer;
use crate::utils::{ScriptHook, find_executable, run_script};
use crate::vault::CredentialVault;

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Imported { mode: SyncMode },
    /// Dump-only run; the archive stays on the origin.
    Dumped { archive: String },
    /// The user declined the import prompt.
    Declined,
}

/// Everything one run owns: the classified mode, the gateway with its open
/// sessions, the credentials files and the local staging directory.
///
/// [`SyncSession::teardown`] releases all of it and also runs on drop.
pub struct SyncSession {
    pub(crate) config: SyncConfig,
    pub(crate) mode: SyncMode,
    pub(crate) is_same_client: bool,
    pub(crate) gateway: Gateway,
    pub(crate) vault: CredentialVault,
    pub(crate) staging: Option<TempDir>,
    torn_down: bool,
}

impl SyncSession {
    pub fn new(config: SyncConfig, classification: Classification, gateway: Gateway) -> Self {
        SyncSession {
            config,
            mode: classification.mode,
            is_same_client: classification.is_same_client,
            gateway,
            vault: CredentialVault::new(),
            staging: None,
            torn_down: false,
        }
    }

    /// Runs the whole pipeline and tears down afterwards, whatever the result.
    pub fn run(&mut self, confirm: &mut dyn FnMut(&str) -> Result<bool>) -> Result<SyncOutcome> {
        let result = self.run_pipeline(confirm);
        if result.is_err() {
            for role in [Endpoint::Origin, Endpoint::Target] {
                if let Err(e) = run_script(&mut self.gateway, &self.config, Some(role), ScriptHook::Error) {
                    debug!(endpoint = %role, "Error script failed: {}", e);
                }
            }
        }
        self.teardown();
        result
    }

    fn run_pipeline(&mut self, confirm: &mut dyn FnMut(&str) -> Result<bool>) -> Result<SyncOutcome> {
        run_script(&mut self.gateway, &self.config, None, ScriptHook::Before)?;
        for role in [Endpoint::Origin, Endpoint::Target] {
            run_script(&mut self.gateway, &self.config, Some(role), ScriptHook::Before)?;
        }
        self.check_client_tools()?;

        let dump_file = if self.mode.is_import() {
            self.import_dump_file()?
        } else {
            backup::run_backup_flow(self)?
        };

        if self.mode.is_dump() {
            let archive = cleanup::finish_dump_only(self, &dump_file)?;
            return Ok(SyncOutcome::Dumped { archive });
        }

        if !self.is_same_client && !self.mode.is_import() {
            transfer::transfer_origin_database_dump(self, &dump_file)?;
        }

        if let Some(keep_dir) = self.config.keep_dump.clone() {
            let archive = cleanup::keep_transferred_dump(self, &keep_dir, &dump_file)?;
            cleanup::remove_transferred_dumps(self, &dump_file)?;
            return Ok(SyncOutcome::Dumped { archive });
        }

        if !restore::run_restore_flow(self, &dump_file, confirm)? {
            cleanup::remove_transferred_dumps(self, &dump_file)?;
            return Ok(SyncOutcome::Declined);
        }
        cleanup::remove_transferred_dumps(self, &dump_file)?;
        Ok(SyncOutcome::Imported { mode: self.mode })
    }

    fn import_dump_file(&self) -> Result<String> {
        let path = self.config.import_file.as_deref().unwrap_or_default();
        Ok(db_dump::import_file_name(path)?.to_string())
    }

    /// Local client tools must be on the PATH unless the endpoint names its own binary.
    fn check_client_tools(&self) -> Result<()> {
        let mut required: Vec<(Endpoint, &str)> = Vec::new();
        if !self.mode.is_import() {
            required.extend([(Endpoint::Origin, "mysqldump"), (Endpoint::Origin, "mysql"), (Endpoint::Origin, "tar")]);
        }
        if self.mode.writes_target() && self.config.keep_dump.is_none() {
            required.push((Endpoint::Target, "mysql"));
            if !self.mode.is_import() && !self.is_same_client {
                required.push((Endpoint::Target, "tar"));
            }
        }
        for (role, tool) in required {
            if self.gateway.is_remote(role) {
                continue;
            }
            if self.config.endpoint(role).is_some_and(|endpoint| endpoint.console.contains_key(tool)) {
                continue;
            }
            let path = find_executable(tool)?;
            debug!(endpoint = %role, "Found {} at {}", tool, path.display());
        }
        Ok(())
    }

    /// Removes credentials files, runs the `after` scripts and closes remote
    /// sessions. Safe to call more than once; failures are only logged.
    pub fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;

        self.vault.cleanup_all(&mut self.gateway);
        for role in [Endpoint::Origin, Endpoint::Target] {
            if let Err(e) = run_script(&mut self.gateway, &self.config, Some(role), ScriptHook::After) {
                debug!(endpoint = %role, "After script failed: {}", e);
            }
        }
        if let Err(e) = run_script(&mut self.gateway, &self.config, None, ScriptHook::After) {
            debug!(endpoint = %Endpoint::Local, "After script failed: {}", e);
        }
        self.gateway.close_all();
        if let Some(staging) = self.staging.take() {
            let shown = staging.path().display().to_string();
            if let Err(e) = staging.close() {
                debug!(endpoint = %Endpoint::Local, "Failed to remove staging directory {}: {}", shown, e);
            }
        }
    }
}

impl Drop for SyncSession {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::{DbConfig, EndpointConfig, Scripts};
    use crate::errors::SyncError;
    use crate::exec::testing::{Recorder, gateway_for};
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::collections::HashMap;

    fn endpoint(db_name: &str, user: &str, password: &str) -> EndpointConfig {
        let console = ["mysqldump", "mysql", "tar"]
            .into_iter()
            .map(|tool| (tool.to_string(), tool.to_string()))
            .collect::<HashMap<_, _>>();
        EndpointConfig {
            db: Some(DbConfig {
                name: db_name.to_string(),
                user: user.to_string(),
                password: password.to_string(),
                ..Default::default()
            }),
            dump_dir: "/tmp/".to_string(),
            console,
            ..Default::default()
        }
    }

    /// A session over recording fakes with `origin_db` on the origin and
    /// `target_db` (user `app`, password `target_pw`) on the target.
    pub fn session_for(mode: SyncMode, dry_run: bool, recorder: &Recorder) -> SyncSession {
        let config = SyncConfig {
            origin: endpoint("origin_db", "app", "origin_pw"),
            target: endpoint("target_db", "app", "target_pw"),
            dry_run,
            yes: true,
            dump: crate::config::DumpOptions { check_dump: true, ..Default::default() },
            ..Default::default()
        };
        let is_same_client = matches!(
            mode,
            SyncMode::SyncLocal | SyncMode::SyncRemote | SyncMode::DumpLocal | SyncMode::DumpRemote
        );
        SyncSession::new(config, Classification { mode, is_same_client }, gateway_for(mode, dry_run, recorder))
    }

    fn healthy(recorder: &Recorder) {
        recorder.respond("SELECT VERSION", 0, "8.0.36\n", "");
        recorder.respond("tail", 0, "-- Dump completed on 2024-03-09  7:05:00\n", "");
        recorder.respond("grep -ao", 0, "3\n", "");
        recorder.respond("[ -f", 0, "1\n", "");
        recorder.respond("base64 -d", 0, "OK\n", "");
    }

    fn archive_bytes(member: &str) -> anyhow::Result<Vec<u8>> {
        let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
        let data = b"-- Dump completed on 2024-03-09\n";
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, member, &data[..])?;
        Ok(builder.into_inner()?.finish()?)
    }

    fn never_asked(_: &str) -> Result<bool> {
        panic!("confirmation prompt should not be shown")
    }

    #[test]
    fn test_sync_local_runs_dump_then_import() -> anyhow::Result<()> {
        let recorder = Recorder::default();
        healthy(&recorder);
        let mut session = session_for(SyncMode::SyncLocal, false, &recorder);
        session.config.dump.dump_name = Some("nightly".to_string());

        let outcome = session.run(&mut never_asked)?;
        assert_eq!(outcome, SyncOutcome::Imported { mode: SyncMode::SyncLocal });

        let commands = recorder.local_commands();
        let position = |needle: &str| commands.iter().position(|c| c.contains(needle));
        let dump = position("mysqldump --defaults-file=").unwrap();
        let compress = position("tar czf /tmp/nightly.sql.tar.gz").unwrap();
        let import = position("target_db < /tmp/nightly.sql").unwrap();
        let cleanup = position("rm -f /tmp/nightly.sql /tmp/nightly.sql.tar.gz").unwrap();
        assert!(dump < compress && compress < import && import < cleanup);
        assert!(position("tar xzf").is_none());
        assert!(recorder.transfers().is_empty());
        assert!(commands.iter().all(|c| !c.contains("origin_pw") && !c.contains("target_pw")));
        Ok(())
    }

    #[test]
    fn test_receiver_downloads_and_verifies_archive() -> anyhow::Result<()> {
        let recorder = Recorder::default();
        healthy(&recorder);
        recorder.download_content(archive_bytes("nightly.sql")?);
        let target_dir = tempfile::tempdir()?;
        let mut session = session_for(SyncMode::Receiver, false, &recorder);
        session.config.dump.dump_name = Some("nightly".to_string());
        session.config.target.dump_dir = format!("{}/", target_dir.path().display());

        session.run(&mut never_asked)?;

        assert_eq!(recorder.connections(), 1);
        assert_eq!(recorder.closed(), 1);
        let transfers = recorder.transfers();
        assert_eq!(transfers.len(), 1);
        assert!(transfers[0].starts_with("download origin /tmp/nightly.sql.tar.gz -> "));
        let origin = recorder.remote_commands(Endpoint::Origin);
        assert!(origin.iter().any(|c| c.contains("mysqldump --defaults-file=/tmp/.my_")));
        assert!(origin.iter().any(|c| c.starts_with("rm -f /tmp/.my_")));
        assert!(recorder.local_commands().iter().any(|c| c.starts_with("tar xzf")));
        Ok(())
    }

    #[test]
    fn test_dry_run_issues_only_read_only_commands() -> anyhow::Result<()> {
        let recorder = Recorder::default();
        healthy(&recorder);
        let mut session = session_for(SyncMode::Sender, true, &recorder);
        session.config.yes = false;
        session.config.dump.dump_name = Some("nightly".to_string());

        assert_eq!(session.run(&mut never_asked)?, SyncOutcome::Imported { mode: SyncMode::Sender });
        let commands = recorder.commands();
        assert!(commands.iter().all(|(_, c)| !c.starts_with("mysqldump") && !c.contains("tar czf")));
        assert!(commands.iter().all(|(_, c)| !c.contains(" < ")));
        assert!(recorder.transfers().is_empty());
        Ok(())
    }

    #[test]
    fn test_declined_import_stops_before_import() -> anyhow::Result<()> {
        let recorder = Recorder::default();
        healthy(&recorder);
        let mut session = session_for(SyncMode::SyncLocal, false, &recorder);
        session.config.yes = false;
        session.config.dump.clear_database = true;

        let mut prompts = Vec::new();
        let outcome = session.run(&mut |prompt: &str| -> Result<bool> {
            prompts.push(prompt.to_string());
            Ok(false)
        })?;
        assert_eq!(outcome, SyncOutcome::Declined);
        assert_eq!(prompts.len(), 1);
        assert!(recorder.local_commands().iter().all(|c| !c.contains("DROP TABLE") && !c.contains(" < ")));
        Ok(())
    }

    #[test]
    fn test_dump_only_keeps_archive_and_applies_retention() -> anyhow::Result<()> {
        let recorder = Recorder::default();
        healthy(&recorder);
        recorder.respond("uname -s", 0, "Linux\n", "");
        recorder.respond(
            "stat -c",
            0,
            "1710000300 /tmp/c.sql.tar.gz\n1710000200 /tmp/b.sql.tar.gz\n1710000100 /tmp/a.sql.tar.gz\n",
            "",
        );
        let mut session = session_for(SyncMode::DumpRemote, false, &recorder);
        session.config.dump.dump_name = Some("nightly".to_string());
        session.config.origin.keep_dumps = Some(2);

        let outcome = session.run(&mut never_asked)?;
        assert_eq!(outcome, SyncOutcome::Dumped { archive: "/tmp/nightly.sql.tar.gz".to_string() });

        let origin = recorder.remote_commands(Endpoint::Origin);
        assert!(origin.iter().any(|c| c == "rm -f /tmp/nightly.sql"));
        assert!(origin.iter().any(|c| c == "rm -f /tmp/a.sql.tar.gz"));
        assert!(origin.iter().all(|c| !c.contains("/tmp/b.sql.tar.gz") || c.contains("stat")));
        assert!(origin.iter().all(|c| !c.contains(" < ")));
        assert!(recorder.remote_commands(Endpoint::Target).is_empty());
        Ok(())
    }

    #[test]
    fn test_keep_dump_copies_archive_instead_of_importing() -> anyhow::Result<()> {
        let recorder = Recorder::default();
        healthy(&recorder);
        recorder.download_content(archive_bytes("nightly.sql")?);
        let target_dir = tempfile::tempdir()?;
        let target = format!("{}/", target_dir.path().display());
        let mut session = session_for(SyncMode::Receiver, false, &recorder);
        session.config.dump.dump_name = Some("nightly".to_string());
        session.config.target.dump_dir = target.clone();
        session.config.keep_dump = Some("/srv/backups/".to_string());
        session.config.dump.clear_database = true;

        let outcome = session.run(&mut never_asked)?;
        assert_eq!(outcome, SyncOutcome::Dumped { archive: "/srv/backups/nightly.sql.tar.gz".to_string() });

        let local = recorder.local_commands();
        let position = |needle: &str| local.iter().position(|c| c == needle);
        let keep = position(&format!("cp {}nightly.sql.tar.gz /srv/backups/nightly.sql.tar.gz", target)).unwrap();
        let cleanup = position(&format!("rm -f {0}nightly.sql {0}nightly.sql.tar.gz", target)).unwrap();
        assert!(keep < cleanup);
        assert!(local.iter().all(|c| !c.starts_with("tar xzf") && !c.contains("DROP TABLE") && !c.contains(" < ")));
        Ok(())
    }

    #[test]
    fn test_import_mode_uses_given_file() -> anyhow::Result<()> {
        let recorder = Recorder::default();
        healthy(&recorder);
        let mut session = session_for(SyncMode::ImportLocal, false, &recorder);
        session.config.import_file = Some("/srv/backups/prod.sql".to_string());

        session.run(&mut never_asked)?;
        let commands = recorder.local_commands();
        assert!(commands.iter().all(|c| !c.starts_with("mysqldump") && !c.contains("tar ")));
        assert!(commands.iter().any(|c| c.ends_with("target_db < /srv/backups/prod.sql")));
        assert!(commands.iter().all(|c| !c.starts_with("rm -f /srv")));
        Ok(())
    }

    #[test]
    fn test_failure_still_tears_down() -> anyhow::Result<()> {
        let recorder = Recorder::default();
        healthy(&recorder);
        recorder.respond("mysqldump", 2, "", "mysqldump: Got error: 1045: Access denied\n");
        let mut session = session_for(SyncMode::Receiver, false, &recorder);
        session.config.scripts = Scripts { error: None, after: Some("echo done".to_string()), before: None };

        let result = session.run(&mut never_asked);
        assert!(matches!(result, Err(SyncError::Command { stderr }) if stderr.contains("Access denied")));
        assert!(recorder.remote_commands(Endpoint::Origin).iter().any(|c| c.starts_with("rm -f /tmp/.my_")));
        assert_eq!(recorder.local_commands().last().map(String::as_str), Some("echo done"));
        assert_eq!(recorder.closed(), 1);

        session.teardown();
        assert_eq!(recorder.closed(), 1);
        Ok(())
    }
}
