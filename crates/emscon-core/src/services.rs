use crate::activity::ActivityLog;
use crate::error::ServiceError;
use crate::transport::RemoteTransport;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ServiceStatus {
    pub name: String,
    /// Summary line of `systemctl status`.
    pub status: String,
    pub enabled: bool,
    pub active: bool,
}

/// systemd unit control over the active session.
#[derive(Clone)]
pub struct ServiceControl {
    transport: Arc<dyn RemoteTransport>,
    activity: ActivityLog,
}

impl ServiceControl {
    pub fn new(transport: Arc<dyn RemoteTransport>, activity: ActivityLog) -> Self {
        Self {
            transport,
            activity,
        }
    }

    pub async fn start(&self, name: &str) -> Result<(), ServiceError> {
        validate_name(name)?;
        self.transport
            .run_command(&format!("sudo systemctl start {name}"))
            .await?;
        let state = self.active_state(name).await?;
        if state != "active" {
            return Err(ServiceError::UnexpectedState {
                name: name.to_string(),
                expected: "active",
                actual: state,
            });
        }
        self.activity.info(format!("service {name} started"));
        Ok(())
    }

    pub async fn stop(&self, name: &str) -> Result<(), ServiceError> {
        validate_name(name)?;
        self.transport
            .run_command(&format!("sudo systemctl stop {name}"))
            .await?;
        let state = self.active_state(name).await?;
        if state != "inactive" && state != "unknown" {
            return Err(ServiceError::UnexpectedState {
                name: name.to_string(),
                expected: "inactive",
                actual: state,
            });
        }
        self.activity.info(format!("service {name} stopped"));
        Ok(())
    }

    pub async fn set_enabled(&self, name: &str, enabled: bool) -> Result<(), ServiceError> {
        validate_name(name)?;
        let verb = if enabled { "enable" } else { "disable" };
        self.transport
            .run_command(&format!("sudo systemctl {verb} {name}"))
            .await?;
        self.activity.info(format!("service {name}: {verb}d"));
        Ok(())
    }

    pub async fn status(&self, name: &str) -> Result<ServiceStatus, ServiceError> {
        validate_name(name)?;
        let enabled = first_line(
            &self
                .transport
                .run_command(&format!("sudo systemctl is-enabled {name} || true"))
                .await?,
        );
        let active = self.active_state(name).await?;
        let summary = self
            .transport
            .run_command(&format!(
                "sudo systemctl status {name} 2>/dev/null | sed -n 3p || true"
            ))
            .await?;
        debug!(service = %name, enabled = %enabled, active = %active, "service status");
        Ok(ServiceStatus {
            name: name.to_string(),
            status: summary.trim().to_string(),
            enabled: enabled == "enabled",
            active: active == "active",
        })
    }

    async fn active_state(&self, name: &str) -> Result<String, ServiceError> {
        let output = self
            .transport
            .run_command(&format!("sudo systemctl is-active {name} || true"))
            .await?;
        Ok(first_line(&output))
    }
}

fn first_line(output: &str) -> String {
    output.lines().next().unwrap_or("").trim().to_string()
}

/// Unit names go into a shell command line unquoted.
fn validate_name(name: &str) -> Result<(), ServiceError> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '@' | '.' | '_' | ':' | '-'));
    if valid {
        Ok(())
    } else {
        Err(ServiceError::InvalidName(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::testing::ScriptedTransport;

    fn control(transport: &Arc<ScriptedTransport>) -> ServiceControl {
        ServiceControl::new(transport.clone(), ActivityLog::default())
    }

    #[tokio::test]
    async fn start_verifies_active_state() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond("sudo systemctl is-active ems-agent || true", "active\n");
        control(&transport).start("ems-agent").await.unwrap();
        assert_eq!(
            transport.dispatched(),
            vec![
                "sudo systemctl start ems-agent",
                "sudo systemctl is-active ems-agent || true"
            ]
        );
    }

    #[tokio::test]
    async fn start_that_does_not_stick_is_an_error() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond("sudo systemctl is-active ems-agent || true", "failed\n");
        let err = control(&transport).start("ems-agent").await.unwrap_err();
        assert_eq!(
            err,
            ServiceError::UnexpectedState {
                name: "ems-agent".into(),
                expected: "active",
                actual: "failed".into(),
            }
        );
    }

    #[tokio::test]
    async fn stop_accepts_inactive() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond("sudo systemctl is-active ems-agent || true", "inactive\n");
        control(&transport).stop("ems-agent").await.unwrap();
    }

    #[tokio::test]
    async fn status_collects_fields() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond("sudo systemctl is-enabled sshd || true", "enabled\n");
        transport.respond("sudo systemctl is-active sshd || true", "active\n");
        transport.respond(
            "sudo systemctl status sshd 2>/dev/null | sed -n 3p || true",
            "   Active: active (running) since Mon\n",
        );
        let status = control(&transport).status("sshd").await.unwrap();
        assert_eq!(
            status,
            ServiceStatus {
                name: "sshd".into(),
                status: "Active: active (running) since Mon".into(),
                enabled: true,
                active: true,
            }
        );
    }

    #[tokio::test]
    async fn transport_errors_propagate() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.fail("sudo systemctl disable sshd", TransportError::NotConnected);
        let err = control(&transport)
            .set_enabled("sshd", false)
            .await
            .unwrap_err();
        assert_eq!(err, ServiceError::Transport(TransportError::NotConnected));
    }

    #[tokio::test]
    async fn rejects_names_with_shell_syntax() {
        let transport = Arc::new(ScriptedTransport::new());
        let err = control(&transport).start("x; reboot").await.unwrap_err();
        assert_eq!(err, ServiceError::InvalidName("x; reboot".into()));
        assert!(transport.dispatched().is_empty());
    }
}
