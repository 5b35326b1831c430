//! In-crate fake transport for the state-machine tests.

use crate::connection::ConnectionConfig;
use crate::error::TransportError;
use crate::transport::RemoteTransport;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Notify;

/// Pauses a scripted command until released.
#[derive(Clone, Default)]
pub struct Gate {
    pub entered: Arc<Notify>,
    pub release: Arc<Notify>,
}

#[derive(Default)]
struct Script {
    responses: HashMap<String, String>,
    failures: HashMap<String, TransportError>,
    gates: HashMap<String, Gate>,
    directory: String,
    directory_failure: Option<String>,
    open_failure: Option<TransportError>,
    close_failure: Option<TransportError>,
    opened: bool,
    alive: bool,
    open_calls: usize,
    last_opened: Option<ConnectionConfig>,
    dispatched: Vec<String>,
}

pub struct ScriptedTransport {
    script: Mutex<Script>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(Script {
                directory: "/root".to_string(),
                alive: true,
                ..Script::default()
            }),
        }
    }

    pub fn respond(&self, command: &str, output: &str) {
        self.script
            .lock()
            .responses
            .insert(command.to_string(), output.to_string());
    }

    pub fn fail(&self, command: &str, err: TransportError) {
        self.script.lock().failures.insert(command.to_string(), err);
    }

    pub fn gate(&self, command: &str) -> Gate {
        let gate = Gate::default();
        self.script
            .lock()
            .gates
            .insert(command.to_string(), gate.clone());
        gate
    }

    pub fn set_directory(&self, directory: &str) {
        let mut script = self.script.lock();
        script.directory = directory.to_string();
        script.directory_failure = None;
    }

    pub fn fail_directory(&self, message: &str) {
        self.script.lock().directory_failure = Some(message.to_string());
    }

    pub fn fail_next_open(&self, err: TransportError) {
        self.script.lock().open_failure = Some(err);
    }

    pub fn fail_close(&self, err: TransportError) {
        self.script.lock().close_failure = Some(err);
    }

    pub fn set_alive(&self, alive: bool) {
        self.script.lock().alive = alive;
    }

    pub fn open_calls(&self) -> usize {
        self.script.lock().open_calls
    }

    pub fn last_opened(&self) -> Option<ConnectionConfig> {
        self.script.lock().last_opened.clone()
    }

    pub fn dispatched(&self) -> Vec<String> {
        self.script.lock().dispatched.clone()
    }
}

#[async_trait]
impl RemoteTransport for ScriptedTransport {
    async fn open_session(&self, config: &ConnectionConfig) -> Result<(), TransportError> {
        let mut script = self.script.lock();
        script.open_calls += 1;
        if let Some(err) = script.open_failure.take() {
            return Err(err);
        }
        script.opened = true;
        script.last_opened = Some(config.clone());
        Ok(())
    }

    async fn close_session(&self) -> Result<(), TransportError> {
        let mut script = self.script.lock();
        if !script.opened {
            return Err(TransportError::NotConnected);
        }
        script.opened = false;
        match script.close_failure.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn is_alive(&self) -> bool {
        self.script.lock().alive
    }

    async fn run_command(&self, text: &str) -> Result<String, TransportError> {
        let gate = {
            let mut script = self.script.lock();
            script.dispatched.push(text.to_string());
            script.gates.get(text).cloned()
        };
        if let Some(gate) = gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }
        let script = self.script.lock();
        if let Some(err) = script.failures.get(text) {
            return Err(err.clone());
        }
        Ok(script.responses.get(text).cloned().unwrap_or_default())
    }

    async fn query_working_directory(&self) -> Result<String, TransportError> {
        let script = self.script.lock();
        match &script.directory_failure {
            Some(message) => Err(TransportError::Other(message.clone())),
            None => Ok(script.directory.clone()),
        }
    }
}
