use crate::config::{AuthMethod, HostKeyPolicy, SshConnectConfig};
use crate::known_hosts::{HostKeyCheck, KnownHosts};
use crate::sftp::SftpClient;
use anyhow::Result;
use russh::client::{Config as ClientConfig, Handle};
use russh::keys::Algorithm;
use russh::{client, ChannelMsg, Disconnect};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Connect failures callers may want to tell apart; everything else stays opaque.
#[derive(Debug, thiserror::Error)]
pub enum ConnectFailure {
    #[error("host unreachable: {0}")]
    Unreachable(String),
    #[error("authentication failed for {0}")]
    Authentication(String),
    #[error("host key rejected for {0}")]
    HostKeyRejected(String),
}

#[derive(Clone)]
pub struct SshClient;

#[derive(Clone)]
pub struct SshSession {
    inner: Arc<Mutex<SessionInner>>,
}

struct SessionInner {
    handle: Handle<ClientHandler>,
    config: SshConnectConfig,
}

impl SshClient {
    pub async fn connect(cfg: SshConnectConfig) -> Result<SshSession> {
        let client_config = Arc::new(build_client_config(&cfg));
        let known_hosts = match cfg.known_hosts_path.clone() {
            Some(path) => Some(Arc::new(Mutex::new(KnownHosts::load(path)?))),
            None => None,
        };
        let handler = ClientHandler {
            host: cfg.host.clone(),
            port: cfg.port,
            policy: cfg.host_key_policy,
            known_hosts,
        };

        let target = format!("{}:{}", cfg.host, cfg.port);
        let sock = connect_socket(&cfg.host, cfg.port, cfg.connect_timeout_ms)
            .await
            .map_err(|e| ConnectFailure::Unreachable(format!("{target}: {e}")))?;
        let mut handle = client::connect_stream(client_config, sock, handler)
            .await
            .map_err(|e| match e {
                russh::Error::UnknownKey => ConnectFailure::HostKeyRejected(target.clone()),
                other => ConnectFailure::Unreachable(format!("{target}: {other}")),
            })?;

        authenticate(&mut handle, &cfg.username, &cfg.auth_method).await?;
        debug!(host = %cfg.host, port = cfg.port, "ssh authenticated");

        Ok(SshSession {
            inner: Arc::new(Mutex::new(SessionInner {
                handle,
                config: cfg,
            })),
        })
    }
}

impl SshSession {
    /// Runs `command` on a fresh channel; returns exit status and merged stdout/stderr.
    pub async fn exec(&self, command: &str) -> Result<(i32, Vec<u8>)> {
        let inner = self.inner.lock().await;
        let channel = inner.handle.channel_open_session().await?;
        channel.exec(true, command).await?;
        let (mut reader, _) = channel.split();
        let mut output = Vec::new();
        let mut status = -1;
        while let Some(msg) = reader.wait().await {
            match msg {
                ChannelMsg::Data { data } => output.extend_from_slice(&data),
                ChannelMsg::ExtendedData { data, .. } => output.extend_from_slice(&data),
                ChannelMsg::ExitStatus { exit_status } => status = exit_status as i32,
                ChannelMsg::Close => break,
                _ => {}
            }
        }
        Ok((status, output))
    }

    pub async fn open_sftp(&self) -> Result<SftpClient> {
        let inner = self.inner.lock().await;
        let channel = inner.handle.channel_open_session().await?;
        channel.request_subsystem(true, "sftp").await?;
        SftpClient::new(channel.into_stream()).await
    }

    pub async fn is_closed(&self) -> bool {
        self.inner.lock().await.handle.is_closed()
    }

    pub async fn disconnect(&self) -> Result<()> {
        let inner = self.inner.lock().await;
        debug!(host = %inner.config.host, "ssh disconnect");
        inner
            .handle
            .disconnect(Disconnect::ByApplication, "user requested disconnection", "en")
            .await?;
        Ok(())
    }

}

struct ClientHandler {
    host: String,
    port: u16,
    policy: HostKeyPolicy,
    known_hosts: Option<Arc<Mutex<KnownHosts>>>,
}

impl client::Handler for ClientHandler {
    type Error = russh::Error;

    fn check_server_key(
        &mut self,
        server_public_key: &russh::keys::PublicKey,
    ) -> impl std::future::Future<Output = Result<bool, Self::Error>> + Send {
        let host = self.host.clone();
        let port = self.port;
        let policy = self.policy;
        let known_hosts = self.known_hosts.clone();
        let key = server_public_key.clone();
        async move {
            if policy == HostKeyPolicy::InsecureAcceptAny {
                warn!(host = %host, port, "accepting any host key");
                return Ok(true);
            }
            let Some(store) = known_hosts else {
                warn!(host = %host, port, "known_hosts not configured");
                return Ok(false);
            };
            let mut store = store.lock().await;
            match store.verify(&host, port, &key) {
                HostKeyCheck::Trusted => Ok(true),
                HostKeyCheck::Unknown if policy == HostKeyPolicy::AcceptNew => {
                    if let Err(err) = store.remember(&host, port, &key) {
                        warn!(host = %host, error = %err, "failed to record host key");
                    }
                    Ok(true)
                }
                verdict => {
                    warn!(host = %host, port, ?verdict, "host key rejected");
                    Ok(false)
                }
            }
        }
    }
}

fn build_client_config(cfg: &SshConnectConfig) -> ClientConfig {
    ClientConfig {
        keepalive_interval: Some(Duration::from_secs(cfg.keepalive_interval_secs)),
        keepalive_max: 3,
        ..Default::default()
    }
}

async fn connect_socket(host: &str, port: u16, timeout_ms: u64) -> Result<TcpStream> {
    let stream = tokio::time::timeout(
        Duration::from_millis(timeout_ms),
        TcpStream::connect((host, port)),
    )
    .await??;
    Ok(stream)
}

async fn authenticate(
    handle: &mut Handle<ClientHandler>,
    username: &str,
    auth: &AuthMethod,
) -> Result<()> {
    let user = username.to_string();
    let success = match auth {
        AuthMethod::Password { password } => is_success(
            &handle
                .authenticate_password(user.clone(), password.to_string())
                .await?,
        ),
        AuthMethod::Agent => authenticate_with_agent(handle, &user).await?,
    };
    if success {
        Ok(())
    } else {
        Err(ConnectFailure::Authentication(user).into())
    }
}

fn is_success(res: &client::AuthResult) -> bool {
    matches!(res, client::AuthResult::Success)
}

#[cfg(unix)]
async fn authenticate_with_agent(handle: &mut Handle<ClientHandler>, user: &str) -> Result<bool> {
    let mut agent = russh::keys::agent::client::AgentClient::connect_env().await?;
    for key in agent.request_identities().await? {
        let hash = if matches!(key.algorithm(), Algorithm::Rsa { .. }) {
            handle.best_supported_rsa_hash().await?.flatten()
        } else {
            None
        };
        let res = handle
            .authenticate_publickey_with(user.to_string(), key, hash, &mut agent)
            .await?;
        if is_success(&res) {
            return Ok(true);
        }
    }
    Ok(false)
}

#[cfg(not(unix))]
async fn authenticate_with_agent(_handle: &mut Handle<ClientHandler>, _user: &str) -> Result<bool> {
    Err(anyhow::anyhow!("ssh agent is only supported on unix"))
}
