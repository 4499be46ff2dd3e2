use std::path::{Path, PathBuf};

use clap::ValueEnum;

use mockalchemy_core::{GlobalConfig, StorageKind};

use crate::CliError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StorageArg {
    Memory,
    Local,
    Cloud,
}

impl From<StorageArg> for StorageKind {
    fn from(value: StorageArg) -> Self {
        match value {
            StorageArg::Memory => StorageKind::Memory,
            StorageArg::Local => StorageKind::Local,
            StorageArg::Cloud => StorageKind::Cloud,
        }
    }
}

/// Command-line overrides layered over `mockalchemy.toml`.
#[derive(Debug, Clone, Default)]
pub struct SettingsOverrides {
    pub storage: Option<StorageArg>,
    pub data_dir: Option<PathBuf>,
    pub seed: Option<u64>,
}

/// Load settings from `path` (defaults when absent) and apply overrides.
pub fn load_settings(path: &Path, overrides: &SettingsOverrides) -> Result<GlobalConfig, CliError> {
    let mut config = GlobalConfig::load_or_default(path)?;
    if let Some(storage) = overrides.storage {
        config.storage = storage.into();
    }
    if let Some(dir) = &overrides.data_dir {
        config.data_dir = dir.clone();
    }
    if overrides.seed.is_some() {
        config.seed = overrides.seed;
    }
    if config.storage == StorageKind::Cloud && config.cloud_url.is_none() {
        return Err(CliError::InvalidArgs(
            "cloud storage requires cloud_url in the settings file".to_string(),
        ));
    }
    Ok(config)
}
