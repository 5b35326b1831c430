pub mod paths;
pub mod settings;

pub use paths::AppPaths;
pub use settings::{
    AppConfig, AppConfigLayer, BatchStepConfig, ConfigError, ConfigManager, HostKeyPolicyName,
    LoggingConfig, PresetConfig, SshDefaults, TerminalConfig,
};
