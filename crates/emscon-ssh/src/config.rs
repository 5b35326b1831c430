use std::path::PathBuf;
use zeroize::Zeroizing;

#[derive(Clone, Debug)]
pub struct SshConnectConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub auth_method: AuthMethod,
    pub host_key_policy: HostKeyPolicy,
    pub known_hosts_path: Option<PathBuf>,
    pub keepalive_interval_secs: u64,
    pub connect_timeout_ms: u64,
}

#[derive(Clone, Debug)]
pub enum AuthMethod {
    Password {
        password: Zeroizing<String>,
    },
    /// Identities offered by the running ssh-agent.
    Agent,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HostKeyPolicy {
    Strict,
    AcceptNew,
    InsecureAcceptAny,
}
