use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable that overrides the config file location.
pub const CONFIG_ENV_VAR: &str = "SPATIAL_ANCHORS_CONFIG";

/// Config file name looked up in the working directory and the platform config dir.
pub const DEFAULT_CONFIG_FILE: &str = "spatial-anchors.toml";

const STORE_FILE: &str = "anchors.json";

/// Top-level application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub store: StoreConfig,
    pub naming: NamingConfig,
    pub logging: LoggingConfig,
}

/// What to do when a persisted record fails to parse
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorruptRecordPolicy {
    /// Stop the read and surface the error
    #[default]
    Abort,
    /// Log the bad entry and keep reading
    Skip,
}

/// Persisted key layout and backend location
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// JSON file backing the key-value store. `None` uses the platform data dir.
    pub path: Option<PathBuf>,
    /// Key holding the number of stored records
    pub count_key: String,
    /// Prefix of the indexed record keys (`{prefix}{index}`)
    pub key_prefix: String,
    pub on_corrupt: CorruptRecordPolicy,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: None,
            count_key: "numUuids".to_string(),
            key_prefix: "uuid".to_string(),
            on_corrupt: CorruptRecordPolicy::default(),
        }
    }
}

impl StoreConfig {
    /// Key under which the record at `index` is stored
    pub fn record_key(&self, index: usize) -> String {
        format!("{}{}", self.key_prefix, index)
    }

    /// Index of a record key, or `None` if `key` is not one.
    ///
    /// Only the exact form written by [`record_key`](Self::record_key)
    /// matches, so `uuid07` or `uuid+7` are not record keys.
    pub fn record_index(&self, key: &str) -> Option<usize> {
        let digits = key.strip_prefix(&self.key_prefix)?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        if digits.len() > 1 && digits.starts_with('0') {
            return None;
        }
        digits.parse().ok()
    }

    /// Resolve the backing file, falling back to the platform data directory.
    pub fn resolved_path(&self) -> Option<PathBuf> {
        self.path
            .clone()
            .or_else(|| project_dirs().map(|dirs| dirs.data_dir().join(STORE_FILE)))
    }
}

/// How new anchors are named when the caller gives no hint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NamingConfig {
    pub prefix: String,
    /// `chrono` strftime format appended to the prefix
    pub timestamp_format: String,
}

impl Default for NamingConfig {
    fn default() -> Self {
        Self {
            prefix: "Anchor".to_string(),
            timestamp_format: "%Y%m%d_%H%M%S".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing` env-filter directive, used when `RUST_LOG` is unset
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the first location that exists.
    ///
    /// Order: `SPATIAL_ANCHORS_CONFIG`, `./spatial-anchors.toml`, then the
    /// platform config directory. Returns defaults when none is present.
    pub fn load() -> Result<Self> {
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            return Self::load_from_path(Path::new(&path));
        }

        let local = PathBuf::from(DEFAULT_CONFIG_FILE);
        if local.exists() {
            return Self::load_from_path(&local);
        }

        if let Some(dirs) = project_dirs() {
            let global = dirs.config_dir().join(DEFAULT_CONFIG_FILE);
            if global.exists() {
                return Self::load_from_path(&global);
            }
        }

        tracing::debug!("No configuration file found, using defaults");
        Ok(Self::default())
    }

    /// Load configuration from a specific file
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config = Self::from_toml_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        tracing::info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject layouts that would make record keys collide with the counter.
    pub fn validate(&self) -> Result<()> {
        if self.store.count_key.is_empty() {
            anyhow::bail!("store.count_key must not be empty");
        }
        if self.store.key_prefix.is_empty() {
            anyhow::bail!("store.key_prefix must not be empty");
        }
        let suffix = self.store.count_key.strip_prefix(&self.store.key_prefix);
        if suffix.is_some_and(|s| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())) {
            anyhow::bail!(
                "store.count_key '{}' collides with record keys prefixed '{}'",
                self.store.count_key,
                self.store.key_prefix
            );
        }
        Ok(())
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "spatial-anchors")
}
