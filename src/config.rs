//! # Store Configuration
//!
//! Configuration for a store instance. `data_root` is the only required
//! setting; everything else has defaults matching the on-disk conventions
//! (world-accessible schema directories, group-readable files).

use std::path::PathBuf;
use std::time::Duration;

/// Unix mode applied to schema directories.
pub const DIR_MODE: u32 = 0o777;
/// Unix mode applied to data, config, and sidecar files.
pub const FILE_MODE: u32 = 0o644;

#[derive(Debug, Clone)]
pub struct Config {
    /// Root directory holding all schema directories.
    pub data_root: PathBuf,

    /// How often the cleanup worker scans for compactable tables.
    pub cleanup_interval: Duration,
}

impl Config {
    pub fn new(data_root: impl Into<PathBuf>) -> Self {
        Self {
            data_root: data_root.into(),
            cleanup_interval: Duration::from_secs(1),
        }
    }

    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }
}

#[derive(Debug, Default)]
pub struct ConfigBuilder {
    data_root: Option<PathBuf>,
    cleanup_interval: Option<Duration>,
}

impl ConfigBuilder {
    pub fn data_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.data_root = Some(path.into());
        self
    }

    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = Some(interval);
        self
    }

    pub fn build(self) -> eyre::Result<Config> {
        let data_root = match self.data_root {
            Some(path) => path,
            None => eyre::bail!("config requires a data_root"),
        };
        let mut config = Config::new(data_root);
        if let Some(interval) = self.cleanup_interval {
            config.cleanup_interval = interval;
        }
        Ok(config)
    }
}
