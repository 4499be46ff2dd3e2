use std::path::{Path, PathBuf};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::Result;

const DEFAULT_SEED_COUNT: u32 = 10;
const DEFAULT_LIMIT: u32 = 20;

/// Where collection snapshots are mirrored.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum StorageKind {
    #[default]
    Memory,
    Local,
    Cloud,
}

impl StorageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageKind::Memory => "memory",
            StorageKind::Local => "local",
            StorageKind::Cloud => "cloud",
        }
    }
}

/// Process-wide settings, usually read from `mockalchemy.toml`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GlobalConfig {
    pub storage: StorageKind,
    /// Directory holding one JSON file per collection for `local` storage.
    pub data_dir: PathBuf,
    /// Base URL of the remote CRUD API used by `cloud` storage.
    pub cloud_url: Option<String>,
    pub cloud_token: Option<String>,
    pub default_seed_count: u32,
    /// Seed for deterministic generation; random when absent.
    pub seed: Option<u64>,
    pub delay_ms: u64,
    /// Probability in `[0, 1]` that an operation fails with a simulated error.
    pub error_rate: f64,
    pub default_limit: u32,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            storage: StorageKind::Memory,
            data_dir: PathBuf::from("data"),
            cloud_url: None,
            cloud_token: None,
            default_seed_count: DEFAULT_SEED_COUNT,
            seed: None,
            delay_ms: 0,
            error_rate: 0.0,
            default_limit: DEFAULT_LIMIT,
        }
    }
}

impl GlobalConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Read settings from `path`, falling back to defaults when the file is absent.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }
}

/// Partial override applied at collection or operation level.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, JsonSchema)]
#[serde(default, rename_all = "camelCase")]
pub struct ConfigLayer {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage: Option<StorageKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delay_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_rate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_limit: Option<u32>,
}

/// Fully resolved settings for one operation.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConfig {
    pub storage: StorageKind,
    pub delay_ms: u64,
    pub error_rate: f64,
    pub default_limit: u32,
}

/// Resolve settings with precedence operation > collection > global.
pub fn resolve_config(
    global: &GlobalConfig,
    collection: Option<&ConfigLayer>,
    operation: Option<&ConfigLayer>,
) -> ResolvedConfig {
    let layers = [operation, collection];

    let storage = first_set(&layers, |layer| layer.storage).unwrap_or(global.storage);
    let delay_ms = first_set(&layers, |layer| layer.delay_ms).unwrap_or(global.delay_ms);
    let error_rate = first_set(&layers, |layer| layer.error_rate).unwrap_or(global.error_rate);
    let default_limit =
        first_set(&layers, |layer| layer.default_limit).unwrap_or(global.default_limit);

    ResolvedConfig {
        storage,
        delay_ms,
        error_rate: if error_rate.is_nan() {
            0.0
        } else {
            error_rate.clamp(0.0, 1.0)
        },
        default_limit: default_limit.max(1),
    }
}

fn first_set<T>(
    layers: &[Option<&ConfigLayer>],
    select: impl Fn(&ConfigLayer) -> Option<T>,
) -> Option<T> {
    layers.iter().flatten().find_map(|layer| select(layer))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_layer_wins_over_collection_and_global() {
        let global = GlobalConfig {
            delay_ms: 5,
            error_rate: 0.1,
            ..GlobalConfig::default()
        };
        let collection = ConfigLayer {
            storage: Some(StorageKind::Local),
            delay_ms: Some(50),
            ..ConfigLayer::default()
        };
        let operation = ConfigLayer {
            delay_ms: Some(0),
            ..ConfigLayer::default()
        };

        let resolved = resolve_config(&global, Some(&collection), Some(&operation));
        assert_eq!(resolved.storage, StorageKind::Local);
        assert_eq!(resolved.delay_ms, 0);
        assert_eq!(resolved.error_rate, 0.1);
        assert_eq!(resolved.default_limit, 20);
    }

    #[test]
    fn clamps_rates_and_limits() {
        let global = GlobalConfig::default();
        let layer = ConfigLayer {
            error_rate: Some(3.0),
            default_limit: Some(0),
            ..ConfigLayer::default()
        };
        let resolved = resolve_config(&global, None, Some(&layer));
        assert_eq!(resolved.error_rate, 1.0);
        assert_eq!(resolved.default_limit, 1);
    }

    #[test]
    fn reads_partial_toml() {
        let config = GlobalConfig::from_toml_str(
            r#"
storage = "local"
data_dir = "fixtures"
seed = 7
"#,
        )
        .expect("parse settings");
        assert_eq!(config.storage, StorageKind::Local);
        assert_eq!(config.data_dir, PathBuf::from("fixtures"));
        assert_eq!(config.seed, Some(7));
        assert_eq!(config.default_seed_count, 10);
    }
}
