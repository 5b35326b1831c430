use crate::activity::ActivityLog;
use crate::connection::{ConnectionConfig, ConnectionHistoryEntry};
use crate::error::{ConnectError, DisconnectError};
use crate::events::EventBus;
use crate::manager::ConnectionManager;
use crate::network::NetworkControl;
use crate::services::ServiceControl;
use crate::store::KvStore;
use crate::terminal::TerminalSession;
use crate::transport::RemoteTransport;
use emscon_config::AppConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

const EVENT_CAPACITY: usize = 256;

/// The owned application state handed to front ends.
#[derive(Clone)]
pub struct Console {
    pub connection: ConnectionManager,
    pub terminal: TerminalSession,
    pub services: ServiceControl,
    pub network: NetworkControl,
    pub bus: EventBus,
    pub activity: ActivityLog,
    liveness_interval: Option<Duration>,
}

impl Console {
    pub fn new(
        transport: Arc<dyn RemoteTransport>,
        store: Arc<dyn KvStore>,
        config: &AppConfig,
    ) -> Self {
        let bus = EventBus::new(EVENT_CAPACITY);
        let activity = ActivityLog::default();
        let connection =
            ConnectionManager::new(transport.clone(), store.clone(), bus.clone(), activity.clone());
        let terminal = TerminalSession::restore(
            connection.clone(),
            store,
            activity.clone(),
            config.terminal.clone(),
        );
        let services = ServiceControl::new(transport.clone(), activity.clone());
        let network = NetworkControl::new(transport, activity.clone());
        let liveness_interval = match config.ssh.liveness_interval_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        Self {
            connection,
            terminal,
            services,
            network,
            bus,
            activity,
            liveness_interval,
        }
    }

    /// Connects and re-initializes the terminal against the new session.
    pub async fn connect(&self, config: ConnectionConfig, save: bool) -> Result<(), ConnectError> {
        self.connection.connect(config, save).await?;
        self.terminal.reset_for_reconnect().await;
        Ok(())
    }

    pub async fn connect_from_history(
        &self,
        entry: &ConnectionHistoryEntry,
    ) -> Result<(), ConnectError> {
        self.connection.connect_from_history(entry).await?;
        self.terminal.reset_for_reconnect().await;
        Ok(())
    }

    pub async fn disconnect(&self) -> Result<(), DisconnectError> {
        self.connection.disconnect().await
    }

    /// Starts the liveness watchdog unless disabled in configuration.
    pub fn spawn_watchdog(&self) -> Option<JoinHandle<()>> {
        self.liveness_interval
            .map(|interval| self.connection.spawn_liveness_watch(interval))
    }
}
