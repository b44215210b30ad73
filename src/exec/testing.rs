//! Recording fakes for the execution layer.

use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;

use super::{CommandOutput, CommandRunner, Connector, Gateway, RemoteSession};
use crate::config::Endpoint;
use crate::errors::{Result, SyncError};
use crate::sync::mode::SyncMode;

#[derive(Debug, Default)]
struct State {
    responses: Vec<(String, CommandOutput)>,
    commands: Vec<(Endpoint, String)>,
    transfers: Vec<String>,
    download_content: Vec<u8>,
    connections: usize,
    closed: usize,
    refuse_connections: bool,
}

/// Shared log of everything the gateway asked for. Clones share the same state.
#[derive(Debug, Clone, Default)]
pub struct Recorder {
    state: Rc<RefCell<State>>,
}

impl Recorder {
    /// Commands containing `pattern` answer with the given output. Later rules win.
    pub fn respond(&self, pattern: &str, status: i32, stdout: &str, stderr: &str) {
        self.state.borrow_mut().responses.push((
            pattern.to_string(),
            CommandOutput { status, stdout: stdout.to_string(), stderr: stderr.to_string() },
        ));
    }

    /// Bytes written to the local file by every fake download.
    pub fn download_content(&self, content: Vec<u8>) {
        self.state.borrow_mut().download_content = content;
    }

    /// Makes every later connection attempt fail.
    pub fn refuse_connections(&self, refuse: bool) {
        self.state.borrow_mut().refuse_connections = refuse;
    }

    pub fn local_commands(&self) -> Vec<String> {
        self.commands_for(Endpoint::Local)
    }

    pub fn remote_commands(&self, role: Endpoint) -> Vec<String> {
        self.commands_for(role)
    }

    /// All commands in execution order; local ones are tagged `Endpoint::Local`.
    pub fn commands(&self) -> Vec<(Endpoint, String)> {
        self.state.borrow().commands.clone()
    }

    pub fn transfers(&self) -> Vec<String> {
        self.state.borrow().transfers.clone()
    }

    pub fn connections(&self) -> usize {
        self.state.borrow().connections
    }

    pub fn closed(&self) -> usize {
        self.state.borrow().closed
    }

    fn commands_for(&self, role: Endpoint) -> Vec<String> {
        self.state
            .borrow()
            .commands
            .iter()
            .filter(|(r, _)| *r == role)
            .map(|(_, c)| c.clone())
            .collect()
    }

    fn record(&self, role: Endpoint, command: &str) -> CommandOutput {
        let mut state = self.state.borrow_mut();
        state.commands.push((role, command.to_string()));
        state
            .responses
            .iter()
            .rev()
            .find(|(pattern, _)| command.contains(pattern.as_str()))
            .map(|(_, output)| output.clone())
            .unwrap_or_default()
    }
}

impl CommandRunner for Recorder {
    fn execute(&mut self, command: &str) -> Result<CommandOutput> {
        Ok(self.record(Endpoint::Local, command))
    }
}

impl Connector for Recorder {
    fn connect(&self, role: Endpoint) -> Result<Box<dyn RemoteSession>> {
        let mut state = self.state.borrow_mut();
        if state.refuse_connections {
            return Err(SyncError::Remote(format!("Connection to {} refused", role)));
        }
        state.connections += 1;
        Ok(Box::new(RecordingSession { role, recorder: self.clone() }))
    }
}

struct RecordingSession {
    role: Endpoint,
    recorder: Recorder,
}

impl RemoteSession for RecordingSession {
    fn execute(&mut self, command: &str) -> Result<CommandOutput> {
        Ok(self.recorder.record(self.role, command))
    }

    fn download(&mut self, remote: &str, local: &Path) -> Result<u64> {
        let content = self.recorder.state.borrow().download_content.clone();
        std::fs::write(local, &content)?;
        self.recorder
            .state
            .borrow_mut()
            .transfers
            .push(format!("download {} {} -> {}", self.role, remote, local.display()));
        Ok(content.len() as u64)
    }

    fn upload(&mut self, local: &Path, remote: &str) -> Result<u64> {
        self.recorder
            .state
            .borrow_mut()
            .transfers
            .push(format!("upload {} {} -> {}", self.role, local.display(), remote));
        Ok(0)
    }

    fn close(&mut self) -> Result<()> {
        self.recorder.state.borrow_mut().closed += 1;
        Ok(())
    }
}

pub fn gateway_for(mode: SyncMode, dry_run: bool, recorder: &Recorder) -> Gateway {
    Gateway::new(mode, dry_run, Box::new(recorder.clone()), Box::new(recorder.clone()))
}
