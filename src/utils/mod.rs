pub mod databases;
pub mod quote;

use std::path::PathBuf;
use tracing::{debug, info};
use which::which;

use crate::config::{Endpoint, SyncConfig};
use crate::errors::{Result, SyncError};
use crate::exec::{Gateway, RunOptions};
use quote::quote_shell_arg;

/// Binary used for `command` on `role`, honouring the endpoint's `console` overrides.
pub fn get_command(config: &SyncConfig, role: Endpoint, command: &str) -> String {
    config
        .endpoint(role)
        .map(|endpoint| endpoint.command(command))
        .unwrap_or_else(|| command.to_string())
}

/// Label used in log lines for an endpoint, e.g. `origin [live (www1.example.com)]`.
pub fn host_name(config: &SyncConfig, role: Endpoint) -> String {
    match config.endpoint(role) {
        Some(endpoint) if endpoint.host.is_some() => format!("{} [{}]", role, endpoint.host_label(false)),
        _ => role.to_string(),
    }
}

/// Finds a client tool in the local PATH.
pub fn find_executable(tool: &str) -> Result<PathBuf> {
    which(tool).map_err(|_| {
        SyncError::Config(format!(
            "{} executable not found in PATH. Please ensure the MySQL client tools are installed and in your PATH.",
            tool
        ))
    })
}

/// Extracts `(major, minor, patch)` from a version string such as `8.0.36-0ubuntu0.22.04.1`
/// or `10.11.6-MariaDB`.
pub fn parse_version(raw: &str) -> Option<(u32, u32, u32)> {
    let mut parts = raw
        .trim()
        .split(|c: char| !c.is_ascii_digit())
        .filter(|part| !part.is_empty())
        .map(|part| part.parse::<u32>().ok());
    let major = parts.next()??;
    let minor = parts.next().flatten().unwrap_or(0);
    let patch = parts.next().flatten().unwrap_or(0);
    Some((major, minor, patch))
}

pub fn check_file_exists(gateway: &mut Gateway, role: Endpoint, path: &str) -> Result<bool> {
    let command = format!("[ -f {} ] && echo \"1\"", quote_shell_arg(path));
    let output = gateway.run(&command, role, RunOptions::output().allow_fail().skip_dry_run())?;
    Ok(output.as_deref() == Some("1"))
}

/// Creates `path` on the endpoint unless it already exists.
pub fn check_and_create_dump_dir(gateway: &mut Gateway, role: Endpoint, path: &str) -> Result<()> {
    let path = quote_shell_arg(path);
    gateway.run(&format!("[ -d {} ] || mkdir -p {}", path, path), role, RunOptions::default())?;
    Ok(())
}

/// `uname -s` of the endpoint (`Linux`, `Darwin`, ...).
pub fn check_os(gateway: &mut Gateway, config: &SyncConfig, role: Endpoint) -> Result<String> {
    let command = format!("{} -s", get_command(config, role, "uname"));
    let output = gateway.run(&command, role, RunOptions::output().skip_dry_run())?;
    Ok(output.unwrap_or_default())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptHook {
    Before,
    After,
    Error,
}

impl ScriptHook {
    fn as_str(&self) -> &'static str {
        match self {
            ScriptHook::Before => "before",
            ScriptHook::After => "after",
            ScriptHook::Error => "error",
        }
    }
}

/// Runs a configured script hook. `None` selects the global scripts, which run locally.
pub fn run_script(gateway: &mut Gateway, config: &SyncConfig, role: Option<Endpoint>, hook: ScriptHook) -> Result<()> {
    let (scripts, target) = match role.and_then(|role| config.endpoint(role).map(|e| (role, e))) {
        Some((role, endpoint)) => (&endpoint.scripts, role),
        None => (&config.scripts, Endpoint::Local),
    };
    let script = match hook {
        ScriptHook::Before => scripts.before.as_deref(),
        ScriptHook::After => scripts.after.as_deref(),
        ScriptHook::Error => scripts.error.as_deref(),
    };
    let Some(script) = script.filter(|s| !s.trim().is_empty()) else {
        debug!(endpoint = %target, hook = hook.as_str(), "No script configured");
        return Ok(());
    };
    info!(endpoint = %target, hook = hook.as_str(), "📜 Running {} script", hook.as_str());
    gateway.run(script, target, RunOptions::default())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EndpointConfig, Scripts};
    use crate::exec::testing::{Recorder, gateway_for};
    use crate::sync::mode::SyncMode;
    use std::collections::HashMap;

    #[test]
    fn test_parse_version() {
        assert_eq!(parse_version("8.0.36-0ubuntu0.22.04.1"), Some((8, 0, 36)));
        assert_eq!(parse_version("10.11.6-MariaDB-log"), Some((10, 11, 6)));
        assert_eq!(parse_version("5.5"), Some((5, 5, 0)));
        assert_eq!(parse_version("unknown"), None);
    }

    #[test]
    fn test_get_command_uses_console_override() {
        let config = SyncConfig {
            origin: EndpointConfig {
                console: HashMap::from([("mysql".to_string(), "/opt/mysql/bin/mysql".to_string())]),
                ..Default::default()
            },
            ..Default::default()
        };
        assert_eq!(get_command(&config, Endpoint::Origin, "mysql"), "/opt/mysql/bin/mysql");
        assert_eq!(get_command(&config, Endpoint::Origin, "tar"), "tar");
        assert_eq!(get_command(&config, Endpoint::Target, "mysql"), "mysql");
        assert_eq!(get_command(&config, Endpoint::Local, "mysql"), "mysql");
    }

    #[test]
    fn test_file_exists_check() -> anyhow::Result<()> {
        let recorder = Recorder::default();
        recorder.respond("[ -f '/tmp/my dump.sql' ]", 0, "1\n", "");
        let mut gateway = gateway_for(SyncMode::SyncLocal, false, &recorder);
        assert!(check_file_exists(&mut gateway, Endpoint::Target, "/tmp/my dump.sql")?);
        assert!(!check_file_exists(&mut gateway, Endpoint::Target, "/tmp/other.sql")?);
        Ok(())
    }

    #[test]
    fn test_run_script_picks_endpoint_or_global() -> anyhow::Result<()> {
        let recorder = Recorder::default();
        let mut gateway = gateway_for(SyncMode::Receiver, false, &recorder);
        let config = SyncConfig {
            origin: EndpointConfig {
                host: Some("www1".to_string()),
                scripts: Scripts { before: Some("echo origin".to_string()), ..Default::default() },
                ..Default::default()
            },
            scripts: Scripts { after: Some("echo global".to_string()), ..Default::default() },
            ..Default::default()
        };
        run_script(&mut gateway, &config, Some(Endpoint::Origin), ScriptHook::Before)?;
        run_script(&mut gateway, &config, None, ScriptHook::After)?;
        run_script(&mut gateway, &config, Some(Endpoint::Target), ScriptHook::Before)?;
        assert_eq!(recorder.remote_commands(Endpoint::Origin), vec!["echo origin"]);
        assert_eq!(recorder.local_commands(), vec!["echo global"]);
        Ok(())
    }
}
