use anyhow::Result;
use directories::ProjectDirs;
use std::path::{Path, PathBuf};

#[derive(Clone, Debug)]
pub struct AppPaths {
    pub config_dir: PathBuf,
    pub data_dir: PathBuf,
    pub log_dir: PathBuf,
    pub config_file: PathBuf,
    pub state_db: PathBuf,
    pub known_hosts: PathBuf,
}

impl AppPaths {
    pub fn new() -> Result<Self> {
        let proj = ProjectDirs::from("org", "emscon", "emscon")
            .ok_or_else(|| anyhow::anyhow!("project dirs unavailable"))?;
        Ok(Self::rooted(proj.config_dir(), proj.data_dir()))
    }

    /// Lays out every path under explicit config/data roots.
    pub fn rooted(config_dir: &Path, data_dir: &Path) -> Self {
        let config_dir = config_dir.to_path_buf();
        let data_dir = data_dir.to_path_buf();
        Self {
            log_dir: data_dir.join("logs"),
            config_file: config_dir.join("config.toml"),
            state_db: data_dir.join("state.db"),
            known_hosts: data_dir.join("known_hosts"),
            config_dir,
            data_dir,
        }
    }

    pub fn project_config_path(base: impl AsRef<Path>) -> PathBuf {
        base.as_ref().join(".emscon.toml")
    }
}
