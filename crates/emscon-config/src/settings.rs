use crate::paths::AppPaths;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("toml encode error: {0}")]
    Encode(#[from] toml::ser::Error),
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct AppConfig {
    pub ssh: SshDefaults,
    pub terminal: TerminalConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct AppConfigLayer {
    pub ssh: Option<SshDefaultsLayer>,
    pub terminal: Option<TerminalConfigLayer>,
    pub logging: Option<LoggingConfigLayer>,
}

impl AppConfigLayer {
    pub fn apply_to(self, cfg: &mut AppConfig) {
        if let Some(layer) = self.ssh {
            cfg.ssh.apply(layer);
        }
        if let Some(layer) = self.terminal {
            cfg.terminal.apply(layer);
        }
        if let Some(layer) = self.logging {
            cfg.logging.apply(layer);
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HostKeyPolicyName {
    Strict,
    AcceptNew,
    InsecureAcceptAny,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SshDefaults {
    pub port: u16,
    pub connect_timeout_ms: u64,
    pub keepalive_interval_secs: u64,
    /// Seconds between liveness checks; 0 disables the watchdog.
    pub liveness_interval_secs: u64,
    pub host_key_policy: HostKeyPolicyName,
}

impl Default for SshDefaults {
    fn default() -> Self {
        Self {
            port: 22,
            connect_timeout_ms: 15000,
            keepalive_interval_secs: 15,
            liveness_interval_secs: 30,
            host_key_policy: HostKeyPolicyName::AcceptNew,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct SshDefaultsLayer {
    pub port: Option<u16>,
    pub connect_timeout_ms: Option<u64>,
    pub keepalive_interval_secs: Option<u64>,
    pub liveness_interval_secs: Option<u64>,
    pub host_key_policy: Option<HostKeyPolicyName>,
}

impl SshDefaults {
    fn apply(&mut self, layer: SshDefaultsLayer) {
        if let Some(v) = layer.port {
            self.port = v;
        }
        if let Some(v) = layer.connect_timeout_ms {
            self.connect_timeout_ms = v;
        }
        if let Some(v) = layer.keepalive_interval_secs {
            self.keepalive_interval_secs = v;
        }
        if let Some(v) = layer.liveness_interval_secs {
            self.liveness_interval_secs = v;
        }
        if let Some(v) = layer.host_key_policy {
            self.host_key_policy = v;
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchStepConfig {
    pub command: String,
    #[serde(default)]
    pub delay_ms: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresetConfig {
    pub name: String,
    pub steps: Vec<BatchStepConfig>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TerminalConfig {
    pub welcome_banner: String,
    pub default_directory: String,
    pub presets: Vec<PresetConfig>,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            welcome_banner: "Welcome to the EMS terminal console".to_string(),
            default_directory: "/root".to_string(),
            presets: vec![modem_preset()],
        }
    }
}

impl TerminalConfig {
    pub fn preset(&self, name: &str) -> Option<&PresetConfig> {
        self.presets.iter().find(|p| p.name == name)
    }

    fn apply(&mut self, layer: TerminalConfigLayer) {
        if let Some(v) = layer.welcome_banner {
            self.welcome_banner = v;
        }
        if let Some(v) = layer.default_directory {
            self.default_directory = v;
        }
        if let Some(v) = layer.presets {
            self.presets = v;
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct TerminalConfigLayer {
    pub welcome_banner: Option<String>,
    pub default_directory: Option<String>,
    pub presets: Option<Vec<PresetConfig>>,
}

/// 4G modem bring-up over the AT serial port, then DHCP on the usb net device.
fn modem_preset() -> PresetConfig {
    let step = |command: &str, delay_ms: u64| BatchStepConfig {
        command: command.to_string(),
        delay_ms,
    };
    PresetConfig {
        name: "4g-connect".to_string(),
        steps: vec![
            step(r#"echo -e "AT+QCFG=\"usbnet\",1\r\n" > /dev/ttyUSB0"#, 0),
            step("echo out > /sys/class/gpio/gpio498/direction", 0),
            step("echo 1 > /sys/class/gpio/gpio498/value", 0),
            step("echo 0 > /sys/class/gpio/gpio498/value", 1000),
            step(r#"echo -e "AT+CGDCONT=1,\"IP\",\"CMNET\"\r\n" > /dev/ttyUSB0"#, 0),
            step(r#"echo -e "AT+QNETDEVCTL=1,1,1\r\n" > /dev/ttyUSB0"#, 0),
            step("dhclient -v usb0", 0),
        ],
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
    pub stdout: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            stdout: true,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct LoggingConfigLayer {
    pub level: Option<String>,
    pub json: Option<bool>,
    pub stdout: Option<bool>,
}

impl LoggingConfig {
    fn apply(&mut self, layer: LoggingConfigLayer) {
        if let Some(v) = layer.level {
            self.level = v;
        }
        if let Some(v) = layer.json {
            self.json = v;
        }
        if let Some(v) = layer.stdout {
            self.stdout = v;
        }
    }
}

#[derive(Clone, Debug)]
pub struct ConfigManager {
    pub paths: AppPaths,
}

impl ConfigManager {
    pub fn new(paths: AppPaths) -> Self {
        Self { paths }
    }

    /// Defaults, then the global file, then `.emscon.toml` in `cwd`, then `overrides`.
    pub fn load(
        &self,
        cwd: Option<&Path>,
        overrides: Option<AppConfigLayer>,
    ) -> Result<AppConfig, ConfigError> {
        let mut cfg = AppConfig::default();

        if self.paths.config_file.exists() {
            debug!(path = %self.paths.config_file.display(), "loading config");
            Self::load_layer(&self.paths.config_file)?.apply_to(&mut cfg);
        }

        if let Some(dir) = cwd {
            let project_path = AppPaths::project_config_path(dir);
            if project_path.exists() {
                debug!(path = %project_path.display(), "loading project config");
                Self::load_layer(&project_path)?.apply_to(&mut cfg);
            }
        }

        if let Some(layer) = overrides {
            layer.apply_to(&mut cfg);
        }

        Ok(cfg)
    }

    pub fn load_layer(path: &Path) -> Result<AppConfigLayer, ConfigError> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    pub fn save_default(&self) -> Result<(), ConfigError> {
        self.save_config(&AppConfig::default())
    }

    pub fn save_config(&self, cfg: &AppConfig) -> Result<(), ConfigError> {
        if let Some(parent) = self.paths.config_file.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(cfg)?;
        fs::write(&self.paths.config_file, content)?;
        Ok(())
    }
}
