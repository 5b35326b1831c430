pub mod client;
pub mod config;
pub mod known_hosts;
pub mod sftp;

pub use client::{ConnectFailure, SshClient, SshSession};
pub use config::{AuthMethod, HostKeyPolicy, SshConnectConfig};
pub use known_hosts::{HostKeyCheck, KnownHosts};
pub use sftp::SftpClient;
