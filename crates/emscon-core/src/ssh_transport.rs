use crate::connection::ConnectionConfig;
use crate::error::TransportError;
use crate::shell::{self, ShellCommand};
use crate::transport::RemoteTransport;
use anyhow::Context;
use async_trait::async_trait;
use emscon_config::{AppConfig, HostKeyPolicyName};
use emscon_ssh::{
    AuthMethod, ConnectFailure, HostKeyPolicy, SshClient, SshConnectConfig, SshSession,
};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

const LIVENESS_MARKER: &str = "connection_test";

#[derive(Clone, Debug)]
struct TransportSettings {
    connect_timeout_ms: u64,
    keepalive_interval_secs: u64,
    host_key_policy: HostKeyPolicy,
    known_hosts: PathBuf,
    default_directory: String,
}

struct ActiveSession {
    session: SshSession,
    cwd: String,
    home: String,
}

/// [`RemoteTransport`] over a russh session. Each command runs on its own
/// exec channel; the working directory is tracked here.
pub struct SshTransport {
    settings: TransportSettings,
    active: Mutex<Option<ActiveSession>>,
}

impl SshTransport {
    pub fn new(config: &AppConfig, known_hosts: PathBuf) -> Self {
        let host_key_policy = match config.ssh.host_key_policy {
            HostKeyPolicyName::Strict => HostKeyPolicy::Strict,
            HostKeyPolicyName::AcceptNew => HostKeyPolicy::AcceptNew,
            HostKeyPolicyName::InsecureAcceptAny => HostKeyPolicy::InsecureAcceptAny,
        };
        Self {
            settings: TransportSettings {
                connect_timeout_ms: config.ssh.connect_timeout_ms,
                keepalive_interval_secs: config.ssh.keepalive_interval_secs,
                host_key_policy,
                known_hosts,
                default_directory: config.terminal.default_directory.clone(),
            },
            active: Mutex::new(None),
        }
    }

    /// Copies a local file to `remote`, creating the remote parent directory
    /// first. Relative remote paths resolve against the tracked directory.
    pub async fn upload_file(&self, local: &Path, remote: &str) -> Result<u64, TransportError> {
        let (session, cwd) = self.current().await?;
        let remote = if remote.starts_with('/') {
            remote.to_string()
        } else {
            shell::resolve_directory(&cwd, Some(remote), &cwd)
        };
        let data = tokio::fs::read(local)
            .await
            .map_err(|e| TransportError::Other(format!("{}: {e}", local.display())))?;

        if let Some((parent, _)) = remote.rsplit_once('/') {
            if !parent.is_empty() {
                let mkdir = format!("mkdir -p {}", shell::quote(parent));
                let (code, output) = session.exec(&mkdir).await.map_err(other)?;
                if code != 0 {
                    return Err(TransportError::CommandFailed {
                        code,
                        message: shell::failure_message(&mkdir, code, &decode(&output)),
                    });
                }
            }
        }

        let sftp = session.open_sftp().await.map_err(other)?;
        let written = sftp.write_file(&remote, &data).await.map_err(other)?;
        if let Err(err) = sftp.close().await {
            debug!(error = %err, "sftp close failed");
        }
        info!(local = %local.display(), remote = %remote, bytes = written, "upload finished");
        Ok(written)
    }

    async fn current(&self) -> Result<(SshSession, String), TransportError> {
        let active = self.active.lock().await;
        let active = active.as_ref().ok_or(TransportError::NotConnected)?;
        Ok((active.session.clone(), active.cwd.clone()))
    }

    async fn change_directory(&self, target: Option<&str>) -> Result<String, TransportError> {
        let (session, cwd, home) = {
            let active = self.active.lock().await;
            let active = active.as_ref().ok_or(TransportError::NotConnected)?;
            (active.session.clone(), active.cwd.clone(), active.home.clone())
        };
        let next = shell::resolve_directory(&cwd, target, &home);
        let (_, output) = session
            .exec(&shell::directory_test(&next))
            .await
            .map_err(other)?;
        if decode(&output).trim() != "EXISTS" {
            return Err(TransportError::CommandFailed {
                code: 1,
                message: format!(
                    "bash: cd: {}: No such file or directory",
                    target.unwrap_or("~")
                ),
            });
        }

        if let Some(active) = self.active.lock().await.as_mut() {
            active.cwd = next.clone();
        }
        debug!(cwd = %next, "working directory changed");
        Ok(String::new())
    }
}

#[async_trait]
impl RemoteTransport for SshTransport {
    async fn open_session(&self, config: &ConnectionConfig) -> Result<(), TransportError> {
        let connect = SshConnectConfig {
            host: config.host.clone(),
            port: config.port,
            username: config.username.clone(),
            auth_method: if config.secret.is_empty() {
                AuthMethod::Agent
            } else {
                AuthMethod::Password {
                    password: Zeroizing::new(config.secret.clone()),
                }
            },
            host_key_policy: self.settings.host_key_policy,
            known_hosts_path: Some(self.settings.known_hosts.clone()),
            keepalive_interval_secs: self.settings.keepalive_interval_secs,
            connect_timeout_ms: self.settings.connect_timeout_ms,
        };
        let session = SshClient::connect(connect).await.map_err(classify_connect)?;

        let home = match session.exec("pwd").await {
            Ok((0, output)) if !decode(&output).trim().is_empty() => {
                decode(&output).trim().to_string()
            }
            _ => self.settings.default_directory.clone(),
        };

        let previous = self.active.lock().await.replace(ActiveSession {
            session,
            cwd: home.clone(),
            home,
        });
        if let Some(previous) = previous {
            if let Err(err) = previous.session.disconnect().await {
                debug!(error = %err, "closing replaced session failed");
            }
        }
        info!(host = %config.host, port = config.port, "ssh session opened");
        Ok(())
    }

    async fn close_session(&self) -> Result<(), TransportError> {
        let active = self
            .active
            .lock()
            .await
            .take()
            .ok_or(TransportError::NotConnected)?;
        active.session.disconnect().await.map_err(other)?;
        info!("ssh session closed");
        Ok(())
    }

    async fn is_alive(&self) -> bool {
        let Ok((session, _)) = self.current().await else {
            return false;
        };
        if session.is_closed().await {
            return false;
        }
        match session.exec(&format!("echo {LIVENESS_MARKER}")).await {
            Ok((_, output)) => decode(&output).trim() == LIVENESS_MARKER,
            Err(err) => {
                warn!(error = %err, "liveness check failed");
                false
            }
        }
    }

    async fn run_command(&self, text: &str) -> Result<String, TransportError> {
        let command = match shell::classify(text) {
            ShellCommand::ChangeDirectory(target) => {
                return self.change_directory(target.as_deref()).await;
            }
            ShellCommand::Run(command) => command,
        };
        let (session, cwd) = self.current().await?;
        let full = shell::in_directory(&cwd, &command);
        debug!(command = %full, "exec");

        let (code, output) = session
            .exec(&full)
            .await
            .with_context(|| format!("exec `{command}`"))
            .map_err(other)?;
        let output = decode(&output);
        // -1: the channel closed without reporting a status.
        if code != 0 && code != -1 {
            return Err(TransportError::CommandFailed {
                code,
                message: shell::failure_message(text, code, &output),
            });
        }
        Ok(output)
    }

    async fn query_working_directory(&self) -> Result<String, TransportError> {
        self.current().await.map(|(_, cwd)| cwd)
    }
}

fn classify_connect(err: anyhow::Error) -> TransportError {
    match err.downcast_ref::<ConnectFailure>() {
        Some(ConnectFailure::Authentication(user)) => {
            TransportError::Authentication(format!("{user}: password rejected"))
        }
        Some(ConnectFailure::Unreachable(reason)) => TransportError::Unreachable(reason.clone()),
        Some(ConnectFailure::HostKeyRejected(target)) => {
            TransportError::Other(format!("host key rejected for {target}"))
        }
        None => TransportError::Other(format!("{err:#}")),
    }
}

fn other(err: anyhow::Error) -> TransportError {
    TransportError::Other(format!("{err:#}"))
}

fn decode(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}
