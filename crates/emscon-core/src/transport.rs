use crate::connection::ConnectionConfig;
use crate::error::TransportError;
use async_trait::async_trait;

/// The remote side of the console: one authenticated session at a time.
///
/// Implementations own their timeouts and retries. The session handle
/// itself stays inside the implementation; callers only see the outcome.
#[async_trait]
pub trait RemoteTransport: Send + Sync {
    async fn open_session(&self, config: &ConnectionConfig) -> Result<(), TransportError>;

    async fn close_session(&self) -> Result<(), TransportError>;

    async fn is_alive(&self) -> bool;

    /// Output may be empty.
    async fn run_command(&self, text: &str) -> Result<String, TransportError>;

    async fn query_working_directory(&self) -> Result<String, TransportError>;
}
