pub mod activity;
pub mod connection;
pub mod context;
pub mod error;
pub mod events;
pub mod manager;
pub mod network;
pub mod output;
pub mod services;
pub mod shell;
pub mod ssh_transport;
pub mod store;
pub mod terminal;
pub mod transport;

#[cfg(test)]
mod testing;

pub use activity::{ActivityEntry, ActivityLevel, ActivityLog};
pub use connection::{
    ConnectionConfig, ConnectionHistory, ConnectionHistoryEntry, ConnectionStatus,
    MAX_HISTORY_ENTRIES,
};
pub use context::Console;
pub use error::{
    ConnectError, DirectoryQueryError, DisconnectError, ExecError, NetworkError, ServiceError,
    StoreError, TransportError,
};
pub use events::{Event, EventBus, EventListener, NotificationLevel};
pub use manager::ConnectionManager;
pub use network::{InterfaceConfig, NetworkControl, NetworkInterface};
pub use output::{OutputLog, Segment, SegmentKind};
pub use services::{ServiceControl, ServiceStatus};
pub use ssh_transport::SshTransport;
pub use store::{KvStore, MemoryKvStore, SqliteKvStore};
pub use terminal::{BatchStep, TerminalSession};
pub use transport::RemoteTransport;
