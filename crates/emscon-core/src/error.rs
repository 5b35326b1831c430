use thiserror::Error;

/// Failures reported by a [`RemoteTransport`](crate::transport::RemoteTransport).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("no active session")]
    NotConnected,
    #[error("authentication failed: {0}")]
    Authentication(String),
    #[error("host unreachable: {0}")]
    Unreachable(String),
    #[error("{message}")]
    CommandFailed { code: i32, message: String },
    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectError {
    #[error("already connected")]
    AlreadyConnected,
    #[error("a connection attempt is already in progress")]
    ConnectInProgress,
    #[error("authentication failed: {0}")]
    Authentication(String),
    #[error("host unreachable: {0}")]
    Unreachable(String),
    #[error("connect failed: {0}")]
    Transport(String),
}

impl From<TransportError> for ConnectError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Authentication(msg) => ConnectError::Authentication(msg),
            TransportError::Unreachable(msg) => ConnectError::Unreachable(msg),
            other => ConnectError::Transport(other.to_string()),
        }
    }
}

/// Local state is already reset to disconnected when either variant is returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DisconnectError {
    #[error("no active session")]
    NoActiveSession,
    #[error("remote close failed: {0}")]
    Close(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecError {
    #[error("not connected")]
    NotConnected,
    #[error("a command is already executing")]
    Busy,
    #[error("unknown preset: {0}")]
    UnknownPreset(String),
    #[error("{0}")]
    Remote(String),
}

impl From<TransportError> for ExecError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::NotConnected => ExecError::NotConnected,
            other => ExecError::Remote(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("directory query failed: {0}")]
pub struct DirectoryQueryError(pub String);

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    #[error("invalid service name: {0:?}")]
    InvalidName(String),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("service {name} is {actual}, expected {expected}")]
    UnexpectedState {
        name: String,
        expected: &'static str,
        actual: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NetworkError {
    #[error("invalid interface name: {0:?}")]
    InvalidName(String),
    #[error("invalid IPv4 address: {0:?}")]
    InvalidAddress(String),
    #[error("invalid netmask: {0:?}")]
    InvalidNetmask(String),
    #[error("no IPv4 address configured on {0}")]
    NoAddress(String),
    #[error(transparent)]
    Transport(#[from] TransportError),
}
