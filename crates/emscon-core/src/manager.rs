use crate::activity::ActivityLog;
use crate::connection::{
    ConnectionConfig, ConnectionHistory, ConnectionHistoryEntry, ConnectionStatus,
};
use crate::error::{ConnectError, DisconnectError, TransportError};
use crate::events::{Event, EventBus, NotificationLevel};
use crate::store::{self, KvStore, Persisted, Persisting, CONNECTION_HISTORY_KEY};
use crate::transport::RemoteTransport;
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

struct ConnectionState {
    status: ConnectionStatus,
    config: Option<ConnectionConfig>,
    history: ConnectionHistory,
}

impl Persisted for ConnectionState {
    const KEY: &'static str = CONNECTION_HISTORY_KEY;

    fn to_record(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.history)
    }
}

/// Owner of the single remote session's lifecycle and of the saved
/// connection history. Clones share state.
#[derive(Clone)]
pub struct ConnectionManager {
    transport: Arc<dyn RemoteTransport>,
    store: Arc<dyn KvStore>,
    bus: EventBus,
    activity: ActivityLog,
    state: Arc<Mutex<ConnectionState>>,
}

impl ConnectionManager {
    pub fn new(
        transport: Arc<dyn RemoteTransport>,
        store: Arc<dyn KvStore>,
        bus: EventBus,
        activity: ActivityLog,
    ) -> Self {
        let history = match store::load_json::<ConnectionHistory>(&*store, CONNECTION_HISTORY_KEY)
        {
            Ok(Some(history)) => ConnectionHistory::from_entries(history.entries().to_vec()),
            Ok(None) => ConnectionHistory::default(),
            Err(err) => {
                warn!(error = %err, "failed to load connection history");
                ConnectionHistory::default()
            }
        };
        debug!(entries = history.len(), "connection history loaded");
        Self {
            transport,
            store,
            bus,
            activity,
            state: Arc::new(Mutex::new(ConnectionState {
                status: ConnectionStatus::Disconnected,
                config: None,
                history,
            })),
        }
    }

    pub fn transport(&self) -> Arc<dyn RemoteTransport> {
        self.transport.clone()
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub async fn connect(&self, config: ConnectionConfig, persist: bool) -> Result<(), ConnectError> {
        {
            let mut state = self.state.lock();
            match state.status {
                ConnectionStatus::Connected => return Err(ConnectError::AlreadyConnected),
                ConnectionStatus::Connecting => return Err(ConnectError::ConnectInProgress),
                _ => {}
            }
            state.status = ConnectionStatus::Connecting;
        }
        self.emit_status(ConnectionStatus::Connecting);
        self.activity.info(format!(
            "connecting to {}:{} as {}",
            config.host, config.port, config.username
        ));

        match self.transport.open_session(&config).await {
            Ok(()) => {
                let target = format!("{}:{}", config.host, config.port);
                if persist {
                    let mut state = self.persisting();
                    state.history.upsert(&config, None, Utc::now());
                    state.status = ConnectionStatus::Connected;
                    state.config = Some(config);
                } else {
                    let mut state = self.state.lock();
                    state.status = ConnectionStatus::Connected;
                    state.config = Some(config);
                }
                info!(target = %target, "session connected");
                self.activity.info(format!("connected to {target}"));
                self.emit_status(ConnectionStatus::Connected);
                self.bus
                    .notify(NotificationLevel::Success, format!("connected to {target}"));
                Ok(())
            }
            Err(err) => {
                let err = ConnectError::from(err);
                let failed = ConnectionStatus::Failed(err.to_string());
                {
                    let mut state = self.state.lock();
                    state.status = failed.clone();
                    state.config = None;
                }
                warn!(host = %config.host, port = config.port, error = %err, "session connect failed");
                self.activity.error(format!("connect failed: {err}"));
                self.emit_status(failed);
                self.bus.notify(NotificationLevel::Error, err.to_string());
                Err(err)
            }
        }
    }

    /// Connects with the entry's stored credentials after refreshing its
    /// `last_used_at`; never adds a second history entry.
    pub async fn connect_from_history(
        &self,
        entry: &ConnectionHistoryEntry,
    ) -> Result<(), ConnectError> {
        {
            let mut state = self.persisting();
            state.history.touch(&entry.id, Utc::now());
        }
        self.connect(entry.to_config(), false).await
    }

    /// Local state ends up disconnected whatever the remote close reports.
    pub async fn disconnect(&self) -> Result<(), DisconnectError> {
        let target = self.state.lock().config.as_ref().map(ConnectionConfig::label);
        let closed = self.transport.close_session().await;
        {
            let mut state = self.state.lock();
            state.status = ConnectionStatus::Disconnected;
            state.config = None;
        }
        self.emit_status(ConnectionStatus::Disconnected);

        let target = target.unwrap_or_else(|| "unknown host".to_string());
        match closed {
            Ok(()) => {
                self.activity.info(format!("disconnected from {target}"));
                self.bus
                    .notify(NotificationLevel::Success, "disconnected".to_string());
                Ok(())
            }
            Err(TransportError::NotConnected) => {
                self.activity
                    .warn("disconnect requested without an active session".to_string());
                Err(DisconnectError::NoActiveSession)
            }
            Err(err) => {
                self.activity
                    .warn(format!("remote close of {target} failed: {err}"));
                self.bus
                    .notify(NotificationLevel::Error, format!("disconnect failed: {err}"));
                Err(DisconnectError::Close(err.to_string()))
            }
        }
    }

    /// Asks the transport whether the session is alive. A dead session observed while connected flips
    /// local state to disconnected and emits [`Event::ConnectionLost`].
    pub async fn check_liveness(&self) -> bool {
        let alive = self.transport.is_alive().await;
        if alive {
            return true;
        }
        let lost = {
            let mut state = self.state.lock();
            if state.status == ConnectionStatus::Connected {
                state.status = ConnectionStatus::Disconnected;
                state.config.take()
            } else {
                None
            }
        };
        if let Some(config) = lost {
            warn!(host = %config.host, port = config.port, "connection lost");
            self.activity
                .warn(format!("connection to {}:{} lost", config.host, config.port));
            self.bus.send(Event::ConnectionLost {
                host: config.host.clone(),
                port: config.port,
            });
            self.emit_status(ConnectionStatus::Disconnected);
            self.bus
                .notify(NotificationLevel::Warning, "connection lost".to_string());
        }
        false
    }

    /// Periodic [`check_liveness`](Self::check_liveness) while connected.
    pub fn spawn_liveness_watch(&self, interval: Duration) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if manager.is_connected() {
                    manager.check_liveness().await;
                }
            }
        })
    }

    pub fn add_to_history(&self, config: &ConnectionConfig, name: Option<&str>) -> String {
        let mut state = self.persisting();
        state.history.upsert(config, name, Utc::now())
    }

    pub fn remove_from_history(&self, id: &str) -> bool {
        let mut state = self.persisting();
        state.history.remove(id)
    }

    pub fn clear_history(&self) {
        let mut state = self.persisting();
        state.history.clear();
    }

    pub fn history(&self) -> Vec<ConnectionHistoryEntry> {
        self.state.lock().history.entries().to_vec()
    }

    pub fn find_history(&self, id: &str) -> Option<ConnectionHistoryEntry> {
        self.state.lock().history.find(id).cloned()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.state.lock().status.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().status == ConnectionStatus::Connected
    }

    pub fn config(&self) -> Option<ConnectionConfig> {
        self.state.lock().config.clone()
    }

    pub fn connection_info(&self) -> String {
        let state = self.state.lock();
        match (&state.status, &state.config) {
            (ConnectionStatus::Connected, Some(config)) => {
                format!("Connected to {}:{}", config.host, config.port)
            }
            _ => "Not connected".to_string(),
        }
    }

    fn persisting(&self) -> Persisting<'_, ConnectionState> {
        Persisting::new(&self.state, &*self.store)
    }

    fn emit_status(&self, status: ConnectionStatus) {
        self.bus.send(Event::StatusChanged { status });
    }
}
