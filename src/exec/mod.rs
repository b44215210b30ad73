// dbsynctool/src/exec/mod.rs
pub mod local;
pub mod redact;
pub mod ssh;
#[cfg(test)]
pub mod testing;

use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::config::Endpoint;
use crate::errors::{Result, SyncError};
use crate::sync::mode::SyncMode;

/// Captured result of one shell command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

/// Runs a shell command line on the machine the tool runs on.
pub trait CommandRunner {
    fn execute(&mut self, command: &str) -> Result<CommandOutput>;
}

/// An authenticated channel to one remote endpoint.
pub trait RemoteSession {
    fn execute(&mut self, command: &str) -> Result<CommandOutput>;
    fn download(&mut self, remote: &str, local: &Path) -> Result<u64>;
    fn upload(&mut self, local: &Path, remote: &str) -> Result<u64>;
    fn close(&mut self) -> Result<()>;
}

/// Opens remote sessions on demand.
pub trait Connector {
    fn connect(&self, role: Endpoint) -> Result<Box<dyn RemoteSession>>;
}

/// Per-call switches for [`Gateway::run`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    pub force_output: bool,
    pub allow_fail: bool,
    pub skip_dry_run: bool,
}

impl RunOptions {
    /// Options asking for the trimmed stdout.
    pub fn output() -> Self {
        RunOptions { force_output: true, ..Default::default() }
    }

    pub fn allow_fail(mut self) -> Self {
        self.allow_fail = true;
        self
    }

    pub fn skip_dry_run(mut self) -> Self {
        self.skip_dry_run = true;
        self
    }
}

/// The only way the tool touches the outside world.
///
/// Every command is tagged with the endpoint it belongs to. Whether that endpoint
/// is reached through a remote session or the local shell is decided by the
/// sync mode the gateway was built with. Remote sessions are opened lazily, once
/// per endpoint, and kept until [`Gateway::close_all`].
pub struct Gateway {
    mode: SyncMode,
    dry_run: bool,
    error_script: Option<String>,
    local: Box<dyn CommandRunner>,
    connector: Box<dyn Connector>,
    sessions: HashMap<Endpoint, Box<dyn RemoteSession>>,
}

impl Gateway {
    pub fn new(mode: SyncMode, dry_run: bool, local: Box<dyn CommandRunner>, connector: Box<dyn Connector>) -> Self {
        Gateway {
            mode,
            dry_run,
            error_script: None,
            local,
            connector,
            sessions: HashMap::new(),
        }
    }

    /// Script run locally right before a failing command is reported.
    pub fn with_error_script(mut self, script: Option<String>) -> Self {
        self.error_script = script.filter(|s| !s.trim().is_empty());
        self
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn is_remote(&self, role: Endpoint) -> bool {
        match role {
            Endpoint::Origin => self.mode.is_origin_remote(),
            Endpoint::Target => self.mode.is_target_remote(),
            Endpoint::Local => false,
        }
    }

    /// Runs `command` as `role`.
    ///
    /// Returns the trimmed stdout when `force_output` is set, `None` otherwise.
    /// Under dry-run nothing is executed unless `skip_dry_run` is set. A non-zero
    /// exit with output on stderr fails with [`SyncError::Command`] after the
    /// error script ran, unless `allow_fail` is set.
    pub fn run(&mut self, command: &str, role: Endpoint, options: RunOptions) -> Result<Option<String>> {
        let remote = self.is_remote(role);
        log_command(role, remote, command);

        if self.dry_run && !options.skip_dry_run {
            return Ok(None);
        }

        let output = if remote {
            self.session(role)?.execute(command)?
        } else {
            self.local.execute(command)?
        };

        if !output.success() && !output.stderr.trim().is_empty() && !options.allow_fail {
            self.run_error_script();
            return Err(SyncError::Command { stderr: output.stderr.trim().to_string() });
        }

        Ok(options.force_output.then(|| output.stdout.trim().to_string()))
    }

    /// Copies a file from a remote endpoint to the local machine.
    pub fn download(&mut self, role: Endpoint, remote: &str, local: &Path) -> Result<()> {
        if self.dry_run {
            info!(endpoint = %role, "Dry run: skipping download of {}", remote);
            return Ok(());
        }
        let bytes = self.session(role)?.download(remote, local)?;
        debug!(endpoint = %role, bytes, "Downloaded {} to {}", remote, local.display());
        Ok(())
    }

    /// Copies a local file to a remote endpoint.
    pub fn upload(&mut self, role: Endpoint, local: &Path, remote: &str) -> Result<()> {
        if self.dry_run {
            info!(endpoint = %role, "Dry run: skipping upload of {}", local.display());
            return Ok(());
        }
        let bytes = self.session(role)?.upload(local, remote)?;
        debug!(endpoint = %role, bytes, "Uploaded {} to {}", local.display(), remote);
        Ok(())
    }

    /// Closes every open remote session. Failures are logged and skipped.
    pub fn close_all(&mut self) {
        for (role, mut session) in self.sessions.drain() {
            match session.close() {
                Ok(()) => debug!(endpoint = %role, "Closed remote session"),
                Err(e) => debug!(endpoint = %role, "Failed to close remote session: {}", e),
            }
        }
    }

    fn session(&mut self, role: Endpoint) -> Result<&mut Box<dyn RemoteSession>> {
        if !self.sessions.contains_key(&role) {
            let session = self.connector.connect(role)?;
            self.sessions.insert(role, session);
        }
        self.sessions
            .get_mut(&role)
            .ok_or_else(|| SyncError::Remote(format!("No remote session for {}", role)))
    }

    fn run_error_script(&mut self) {
        let Some(script) = self.error_script.clone() else {
            return;
        };
        info!(endpoint = %Endpoint::Local, "📜 Running error script");
        log_command(Endpoint::Local, false, &script);
        match self.local.execute(&script) {
            Ok(output) if !output.success() => {
                warn!(endpoint = %Endpoint::Local, status = output.status, "Error script failed: {}", output.stderr.trim())
            }
            Ok(_) => {}
            Err(e) => warn!(endpoint = %Endpoint::Local, "Error script could not be started: {}", e),
        }
    }
}

fn log_command(role: Endpoint, remote: bool, command: &str) {
    debug!(endpoint = %role, remote, "$ {}", redact::sanitize_command_for_logging(command));
}

impl Drop for Gateway {
    fn drop(&mut self) {
        self.close_all();
    }
}
