// dbsynctool/src/sync/mode.rs
use std::fmt;
use tracing::info;

use crate::config::{EndpointConfig, SyncConfig};
use crate::errors::{Result, SyncError};

/// The nine sync topologies, in evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SyncMode {
    #[default]
    Receiver,
    Sender,
    Proxy,
    DumpLocal,
    DumpRemote,
    ImportLocal,
    ImportRemote,
    SyncLocal,
    SyncRemote,
}

impl SyncMode {
    pub const ALL: [SyncMode; 9] = [
        SyncMode::Receiver,
        SyncMode::Sender,
        SyncMode::Proxy,
        SyncMode::DumpLocal,
        SyncMode::DumpRemote,
        SyncMode::ImportLocal,
        SyncMode::ImportRemote,
        SyncMode::SyncLocal,
        SyncMode::SyncRemote,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SyncMode::Receiver => "RECEIVER",
            SyncMode::Sender => "SENDER",
            SyncMode::Proxy => "PROXY",
            SyncMode::DumpLocal => "DUMP_LOCAL",
            SyncMode::DumpRemote => "DUMP_REMOTE",
            SyncMode::ImportLocal => "IMPORT_LOCAL",
            SyncMode::ImportRemote => "IMPORT_REMOTE",
            SyncMode::SyncLocal => "SYNC_LOCAL",
            SyncMode::SyncRemote => "SYNC_REMOTE",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            SyncMode::Receiver => "(REMOTE ➔ LOCAL)",
            SyncMode::Sender => "(LOCAL ➔ REMOTE)",
            SyncMode::Proxy => "(REMOTE ➔ LOCAL ➔ REMOTE)",
            SyncMode::DumpLocal => "(LOCAL, ONLY EXPORT)",
            SyncMode::DumpRemote => "(REMOTE, ONLY EXPORT)",
            SyncMode::ImportLocal => "(LOCAL, ONLY IMPORT)",
            SyncMode::ImportRemote => "(REMOTE, ONLY IMPORT)",
            SyncMode::SyncLocal => "(LOCAL ➔ LOCAL)",
            SyncMode::SyncRemote => "(REMOTE ➔ REMOTE)",
        }
    }

    pub fn is_origin_remote(&self) -> bool {
        matches!(
            self,
            SyncMode::Receiver | SyncMode::Proxy | SyncMode::DumpRemote | SyncMode::ImportRemote | SyncMode::SyncRemote
        )
    }

    pub fn is_target_remote(&self) -> bool {
        matches!(
            self,
            SyncMode::Sender | SyncMode::Proxy | SyncMode::DumpRemote | SyncMode::ImportRemote | SyncMode::SyncRemote
        )
    }

    pub fn is_import(&self) -> bool {
        matches!(self, SyncMode::ImportLocal | SyncMode::ImportRemote)
    }

    pub fn is_dump(&self) -> bool {
        matches!(self, SyncMode::DumpLocal | SyncMode::DumpRemote)
    }

    /// Modes in which the target database gets overwritten.
    pub fn writes_target(&self) -> bool {
        !self.is_dump()
    }
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Presence/equality view over the two endpoint configurations.
pub struct Topology<'a> {
    origin: &'a EndpointConfig,
    target: &'a EndpointConfig,
    import: bool,
}

fn available_both<T>(origin: &Option<T>, target: &Option<T>) -> bool {
    origin.is_some() && target.is_some()
}

fn unavailable_both<T>(origin: &Option<T>, target: &Option<T>) -> bool {
    origin.is_none() && target.is_none()
}

/// Both present and equal, or both absent.
fn same_both<T: PartialEq>(origin: &Option<T>, target: &Option<T>) -> bool {
    origin == target
}

impl<'a> Topology<'a> {
    pub fn new(origin: &'a EndpointConfig, target: &'a EndpointConfig, import: bool) -> Self {
        Topology { origin, target, import }
    }

    pub fn from_config(config: &'a SyncConfig) -> Self {
        Self::new(&config.origin, &config.target, config.import_file.is_some())
    }

    pub fn is_same_host(&self) -> bool {
        same_both(&self.origin.host, &self.target.host)
            && same_both(&self.origin.port, &self.target.port)
            && same_both(&self.origin.user, &self.target.user)
    }

    pub fn is_full_remote(&self) -> bool {
        available_both(&self.origin.host, &self.target.host)
    }

    pub fn is_full_local(&self) -> bool {
        unavailable_both(&self.origin.host, &self.target.host)
    }

    /// Same machine, but a different application path or database.
    pub fn is_same_sync(&self) -> bool {
        (available_both(&self.origin.path, &self.target.path) && self.origin.path != self.target.path)
            || (available_both(&self.origin.db, &self.target.db) && self.origin.db != self.target.db)
    }

    fn is_receiver(&self) -> bool {
        self.origin.host.is_some() && !self.is_proxy() && !self.is_sync_remote()
    }

    fn is_sender(&self) -> bool {
        self.target.host.is_some() && !self.is_proxy() && !self.is_sync_remote()
    }

    fn is_proxy(&self) -> bool {
        self.is_full_remote()
    }

    fn is_dump_local(&self) -> bool {
        self.is_full_local() && self.is_same_host() && !self.is_sync_local()
    }

    fn is_dump_remote(&self) -> bool {
        self.is_full_remote() && self.is_same_host() && !self.is_sync_remote()
    }

    fn is_import_local(&self) -> bool {
        self.import && self.target.host.is_none()
    }

    fn is_import_remote(&self) -> bool {
        self.import && self.target.host.is_some()
    }

    fn is_sync_local(&self) -> bool {
        self.is_full_local() && self.is_same_host() && self.is_same_sync()
    }

    fn is_sync_remote(&self) -> bool {
        self.is_full_remote() && self.is_same_host() && self.is_same_sync()
    }

    fn matches(&self, mode: SyncMode) -> bool {
        match mode {
            SyncMode::Receiver => self.is_receiver(),
            SyncMode::Sender => self.is_sender(),
            SyncMode::Proxy => self.is_proxy(),
            SyncMode::DumpLocal => self.is_dump_local(),
            SyncMode::DumpRemote => self.is_dump_remote(),
            SyncMode::ImportLocal => self.is_import_local(),
            SyncMode::ImportRemote => self.is_import_remote(),
            SyncMode::SyncLocal => self.is_sync_local(),
            SyncMode::SyncRemote => self.is_sync_remote(),
        }
    }

    /// The last mode in [`SyncMode::ALL`] whose predicate holds; `Receiver` if none does.
    pub fn mode(&self) -> SyncMode {
        SyncMode::ALL
            .into_iter()
            .filter(|mode| self.matches(*mode))
            .last()
            .unwrap_or_default()
    }
}

/// Result of classifying a configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub mode: SyncMode,
    pub is_same_client: bool,
}

/// Derives the sync mode and refuses to write into a protected target.
pub fn classify(config: &SyncConfig) -> Result<Classification> {
    let topology = Topology::from_config(config);
    let mode = topology.mode();

    if let Some(import) = &config.import_file {
        info!(endpoint = "local", "📥 Import file {}", import);
    }
    info!(endpoint = "local", "🧭 Sync mode: {} {}", mode, mode.description());

    check_for_protection(config, mode)?;
    Ok(Classification { mode, is_same_client: topology.is_same_host() })
}

fn check_for_protection(config: &SyncConfig, mode: SyncMode) -> Result<()> {
    if mode.writes_target() && config.target.protect {
        return Err(SyncError::Config(format!(
            "The host {} is protected against the import of a database dump. Please check synchronisation target or adjust the host configuration.",
            config.target.host_label(false)
        )));
    }
    Ok(())
}
