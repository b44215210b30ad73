// dbsynctool/src/sync/mod.rs
pub(crate) mod logic;
pub mod mode;

use tracing::info;

use crate::config::SyncConfig;
use crate::errors::Result;
use crate::exec::Gateway;
use crate::exec::local::LocalShell;
use crate::exec::ssh::SshConnector;
pub use logic::SyncOutcome;

/// Public entry point for one sync run.
///
/// Classifies the topology (refusing protected targets before anything runs),
/// wires the local shell and SSH transport into a gateway and drives the pipeline.
pub fn run_sync_flow(config: SyncConfig, confirm: &mut dyn FnMut(&str) -> Result<bool>) -> Result<SyncOutcome> {
    if config.reverse {
        info!(endpoint = "local", "🔁 Reversed sync direction: origin and target are swapped");
    }
    let classification = mode::classify(&config)?;
    if config.dry_run {
        info!(endpoint = "local", "🧪 Dry run: no database or file will be changed");
    }

    let connector = SshConnector::new(config.origin.clone(), config.target.clone(), config.ssh_agent);
    let gateway = Gateway::new(classification.mode, config.dry_run, Box::new(LocalShell), Box::new(connector))
        .with_error_script(config.scripts.error.clone());

    let mut session = logic::SyncSession::new(config, classification, gateway);
    session.run(confirm)
}
