// dbsynctool/src/exec/ssh.rs
use ssh2::{Channel, CheckResult, KnownHostFileKind, Session};
use std::env;
use std::fs::File;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::{CommandOutput, Connector, RemoteSession};
use crate::config::{DEFAULT_SSH_PORT, Endpoint, EndpointConfig, JumpHostConfig, SshAuth};
use crate::errors::{Result, SyncError};

/// Ceiling for establishing a connection. Commands themselves are not timed out.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(600);
pub const KEEPALIVE_INTERVAL_SECS: u32 = 60;

/// Opens `ssh2` sessions for the origin and target endpoints.
pub struct SshConnector {
    origin: EndpointConfig,
    target: EndpointConfig,
    ssh_agent: bool,
}

impl SshConnector {
    pub fn new(origin: EndpointConfig, target: EndpointConfig, ssh_agent: bool) -> Self {
        SshConnector { origin, target, ssh_agent }
    }
}

impl Connector for SshConnector {
    fn connect(&self, role: Endpoint) -> Result<Box<dyn RemoteSession>> {
        let endpoint = match role {
            Endpoint::Origin => &self.origin,
            Endpoint::Target => &self.target,
            Endpoint::Local => {
                return Err(SyncError::Remote("The local endpoint has no remote session".to_string()));
            }
        };
        Ok(Box::new(SshSession::connect(endpoint, self.ssh_agent)?))
    }
}

pub struct SshSession {
    session: Session,
    label: String,
    tunnel: Option<JumpTunnel>,
}

impl SshSession {
    pub fn connect(endpoint: &EndpointConfig, ssh_agent: bool) -> Result<Self> {
        let host = endpoint
            .host
            .clone()
            .ok_or_else(|| SyncError::Config("SSH connection requested for an endpoint without host".to_string()))?;
        let user = endpoint
            .user
            .clone()
            .ok_or_else(|| SyncError::Config(format!("Missing SSH user for {}", host)))?;
        let port = endpoint.ssh_port();
        let auth = endpoint.ssh_auth(ssh_agent)?;
        let label = endpoint.host_label(true);

        info!("🔐 Connecting to {}", label);
        let (tcp, tunnel) = match &endpoint.jump_host {
            Some(jump) => {
                let plan = JumpPlan::new(jump, &user, &auth, &host, port);
                info!("🔀 Using jump host {}", plan.label());
                let tunnel = JumpTunnel::open(plan)?;
                (tunnel.connect()?, Some(tunnel))
            }
            None => (connect_tcp(&host, port)?, None),
        };

        let session = open_session(tcp, &host, port, &user, &auth)?;
        info!("✓ Connected to {}", label);
        Ok(SshSession { session, label, tunnel })
    }
}

impl RemoteSession for SshSession {
    fn execute(&mut self, command: &str) -> Result<CommandOutput> {
        let mut channel = self.session.channel_session()?;
        channel.exec(command)?;

        let mut stdout_stream = channel.stream(0);
        let mut stderr_stream = channel.stderr();
        self.session.set_blocking(false);
        let drained = drain_streams(&mut stdout_stream, &mut stderr_stream);
        self.session.set_blocking(true);
        let (stdout, stderr) = drained?;
        channel.wait_close()?;

        Ok(CommandOutput {
            status: channel.exit_status()?,
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
        })
    }

    fn download(&mut self, remote: &str, local: &Path) -> Result<u64> {
        let sftp = self.session.sftp()?;
        let mut source = sftp
            .open(Path::new(remote))
            .map_err(|e| SyncError::FileAccess(format!("Cannot open {} on {}: {}", remote, self.label, e)))?;
        let mut destination = File::create(local)?;
        Ok(io::copy(&mut source, &mut destination)?)
    }

    fn upload(&mut self, local: &Path, remote: &str) -> Result<u64> {
        let sftp = self.session.sftp()?;
        let mut source = File::open(local)
            .map_err(|e| SyncError::FileAccess(format!("Cannot open {}: {}", local.display(), e)))?;
        let mut destination = sftp
            .create(Path::new(remote))
            .map_err(|e| SyncError::FileAccess(format!("Cannot create {} on {}: {}", remote, self.label, e)))?;
        Ok(io::copy(&mut source, &mut destination)?)
    }

    fn close(&mut self) -> Result<()> {
        let result = self.session.disconnect(None, "db sync finished", None);
        if let Some(mut tunnel) = self.tunnel.take() {
            tunnel.shutdown();
        }
        debug!("Disconnected from {}", self.label);
        Ok(result?)
    }
}

/// Reads two non-blocking streams side by side until both report end of file,
/// so a full stderr window never stalls stdout (or the other way round).
fn drain_streams(stdout: &mut dyn Read, stderr: &mut dyn Read) -> io::Result<(Vec<u8>, Vec<u8>)> {
    let mut streams: [(&mut dyn Read, Vec<u8>, bool); 2] = [(stdout, Vec::new(), true), (stderr, Vec::new(), true)];
    let mut buffer = [0u8; 16 * 1024];
    while streams.iter().any(|(_, _, open)| *open) {
        let mut idle = true;
        for (stream, collected, open) in streams.iter_mut().filter(|(_, _, open)| *open) {
            match stream.read(&mut buffer) {
                Ok(0) => *open = false,
                Ok(n) => {
                    collected.extend_from_slice(&buffer[..n]);
                    idle = false;
                }
                Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted) => {}
                Err(e) => return Err(e),
            }
        }
        if idle {
            thread::sleep(Duration::from_millis(2));
        }
    }
    let [(_, stdout, _), (_, stderr, _)] = streams;
    Ok((stdout, stderr))
}

fn connect_tcp(host: &str, port: u16) -> Result<TcpStream> {
    let addresses: Vec<SocketAddr> = (host, port)
        .to_socket_addrs()
        .map_err(|e| SyncError::Remote(format!("Cannot resolve {}:{}: {}", host, port, e)))?
        .collect();
    let mut last_error = None;
    for address in addresses {
        match TcpStream::connect_timeout(&address, CONNECT_TIMEOUT) {
            Ok(stream) => return Ok(stream),
            Err(e) => last_error = Some(e),
        }
    }
    Err(SyncError::Remote(match last_error {
        Some(e) => format!("Cannot connect to {}:{}: {}", host, port, e),
        None => format!("No address found for {}:{}", host, port),
    }))
}

fn open_session(tcp: TcpStream, host: &str, port: u16, user: &str, auth: &SshAuth) -> Result<Session> {
    let mut session = Session::new()?;
    session.set_timeout(CONNECT_TIMEOUT.as_millis() as u32);
    session.set_tcp_stream(tcp);
    session
        .handshake()
        .map_err(|e| SyncError::Remote(format!("SSH handshake with {}:{} failed: {}", host, port, e)))?;
    verify_host_key(&session, host, port)?;
    authenticate(&session, user, auth)
        .map_err(|e| SyncError::Remote(format!("SSH authentication as {} on {} failed: {}", user, host, e)))?;
    session.set_keepalive(true, KEEPALIVE_INTERVAL_SECS);
    session.set_timeout(0);
    Ok(session)
}

fn verify_host_key(session: &Session, host: &str, port: u16) -> Result<()> {
    let Some((key, _)) = session.host_key() else {
        warn!("{} did not present a host key", host);
        return Ok(());
    };
    let mut known_hosts = session.known_hosts()?;
    if let Some(path) = known_hosts_path().filter(|path| path.is_file()) {
        if let Err(e) = known_hosts.read_file(&path, KnownHostFileKind::OpenSSH) {
            debug!("Could not read {}: {}", path.display(), e);
        }
    }
    match known_hosts.check_port(host, port, key) {
        CheckResult::Match => Ok(()),
        CheckResult::Mismatch => Err(SyncError::Remote(format!(
            "Host key for {}:{} does not match the known_hosts entry",
            host, port
        ))),
        CheckResult::NotFound | CheckResult::Failure => {
            warn!("⚠️ {}:{} is not a known host, continuing", host, port);
            Ok(())
        }
    }
}

fn known_hosts_path() -> Option<PathBuf> {
    env::var_os("HOME").map(|home| PathBuf::from(home).join(".ssh").join("known_hosts"))
}

fn authenticate(session: &Session, user: &str, auth: &SshAuth) -> std::result::Result<(), String> {
    match auth {
        SshAuth::Key(key) => session
            .userauth_pubkey_file(user, None, key, None)
            .map_err(|e| e.to_string())?,
        SshAuth::Password(password) => session.userauth_password(user, password).map_err(|e| e.to_string())?,
        SshAuth::Agent => {
            let mut agent = session.agent().map_err(|_| "SSH agent not available".to_string())?;
            agent.connect().map_err(|_| "Failed to connect to SSH agent".to_string())?;
            agent.list_identities().map_err(|e| e.to_string())?;
            let identities = agent.identities().map_err(|e| e.to_string())?;
            if identities.is_empty() {
                return Err("No identities found in SSH agent".to_string());
            }
            let accepted = identities.iter().any(|identity| agent.userauth(user, identity).is_ok());
            let _ = agent.disconnect();
            if !accepted {
                return Err("No SSH agent identity was accepted".to_string());
            }
        }
    }
    if session.authenticated() {
        Ok(())
    } else {
        Err("server did not accept the credentials".to_string())
    }
}

/// Where and how to reach the jump host, and what to forward to.
#[derive(Debug, Clone, PartialEq, Eq)]
struct JumpPlan {
    name: Option<String>,
    host: String,
    port: u16,
    user: String,
    auth: SshAuth,
    destination_host: String,
    destination_port: u16,
}

impl JumpPlan {
    /// The jump host falls back to the endpoint's user and credentials. `private`
    /// names the destination as seen from the jump host.
    fn new(jump: &JumpHostConfig, user: &str, auth: &SshAuth, host: &str, port: u16) -> Self {
        let auth = match (&jump.ssh_key, &jump.password) {
            (Some(key), _) => SshAuth::Key(key.clone()),
            (None, Some(password)) => SshAuth::Password(password.clone()),
            (None, None) => auth.clone(),
        };
        JumpPlan {
            name: jump.name.clone(),
            host: jump.host.clone(),
            port: jump.port.unwrap_or(DEFAULT_SSH_PORT),
            user: jump.user.clone().unwrap_or_else(|| user.to_string()),
            auth,
            destination_host: jump.private.clone().unwrap_or_else(|| host.to_string()),
            destination_port: port,
        }
    }

    fn label(&self) -> String {
        let address = format!("{}@{}:{}", self.user, self.host, self.port);
        match &self.name {
            Some(name) => format!("{} ({})", name, address),
            None => address,
        }
    }
}

/// Forwards a loopback port to the destination through a `direct-tcpip` channel
/// on the jump host. All `ssh2` objects of the jump session live on the forwarder thread.
struct JumpTunnel {
    local_addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl JumpTunnel {
    fn open(plan: JumpPlan) -> Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", 0))?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;
        let shutdown = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = mpsc::channel::<std::result::Result<(), String>>();

        let flag = Arc::clone(&shutdown);
        let handle = thread::spawn(move || {
            let (session, channel) = match open_jump_channel(&plan) {
                Ok(opened) => {
                    let _ = ready_tx.send(Ok(()));
                    opened
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e.to_string()));
                    return;
                }
            };
            if let Some(stream) = accept_one(&listener, &flag) {
                forward(&session, channel, stream, &flag);
            }
            let _ = session.disconnect(None, "jump tunnel closed", None);
        });

        let mut tunnel = JumpTunnel { local_addr, shutdown, handle: Some(handle) };
        match ready_rx.recv() {
            Ok(Ok(())) => Ok(tunnel),
            Ok(Err(message)) => {
                tunnel.shutdown();
                Err(SyncError::Remote(message))
            }
            Err(_) => {
                tunnel.shutdown();
                Err(SyncError::Remote("Jump host tunnel stopped unexpectedly".to_string()))
            }
        }
    }

    fn connect(&self) -> Result<TcpStream> {
        Ok(TcpStream::connect(self.local_addr)?)
    }

    fn shutdown(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for JumpTunnel {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn open_jump_channel(plan: &JumpPlan) -> Result<(Session, Channel)> {
    let tcp = connect_tcp(&plan.host, plan.port)?;
    let session = open_session(tcp, &plan.host, plan.port, &plan.user, &plan.auth)?;
    let channel = session
        .channel_direct_tcpip(&plan.destination_host, plan.destination_port, None)
        .map_err(|e| {
            SyncError::Remote(format!(
                "Jump host {} cannot reach {}:{}: {}",
                plan.label(),
                plan.destination_host,
                plan.destination_port,
                e
            ))
        })?;
    Ok((session, channel))
}

fn accept_one(listener: &TcpListener, shutdown: &AtomicBool) -> Option<TcpStream> {
    let deadline = Instant::now() + CONNECT_TIMEOUT;
    while !shutdown.load(Ordering::Relaxed) && Instant::now() < deadline {
        match listener.accept() {
            Ok((stream, _)) => return Some(stream),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => thread::sleep(Duration::from_millis(10)),
            Err(_) => return None,
        }
    }
    None
}

fn forward(session: &Session, mut channel: Channel, mut stream: TcpStream, shutdown: &AtomicBool) {
    session.set_blocking(false);
    if stream.set_nonblocking(true).is_err() {
        return;
    }
    let mut buf = vec![0u8; 32 * 1024];
    let mut to_channel: Vec<u8> = Vec::new();
    let mut to_stream: Vec<u8> = Vec::new();

    while !shutdown.load(Ordering::Relaxed) {
        let mut idle = true;

        if to_channel.is_empty() {
            match stream.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    to_channel.extend_from_slice(&buf[..n]);
                    idle = false;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(_) => break,
            }
        }
        if !to_channel.is_empty() {
            match channel.write(&to_channel) {
                Ok(n) => {
                    to_channel.drain(..n);
                    idle = false;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(_) => break,
            }
        }
        if to_stream.is_empty() {
            match channel.read(&mut buf) {
                Ok(0) if channel.eof() => break,
                Ok(0) => {}
                Ok(n) => {
                    to_stream.extend_from_slice(&buf[..n]);
                    idle = false;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(_) => break,
            }
        }
        if !to_stream.is_empty() {
            match stream.write(&to_stream) {
                Ok(n) => {
                    to_stream.drain(..n);
                    idle = false;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(_) => break,
            }
        }

        if idle {
            thread::sleep(Duration::from_millis(2));
        }
    }
    session.set_blocking(true);
    let _ = channel.close();
}
