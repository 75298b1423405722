//! Control-plane configuration loader.
//!
//! Reads `conductor.toml` and deserializes it into [`ControlPlaneConfig`].
//! An explicitly named file must exist and parse; the default location may
//! be absent, in which case the defaults apply.

use std::path::{Path, PathBuf};

use conductor_types::config::ControlPlaneConfig;
use thiserror::Error;

/// Overrides the default config location.
pub const CONFIG_PATH_ENV: &str = "CONDUCTOR_CONFIG";

/// Overrides the default data directory.
pub const DATA_DIR_ENV: &str = "CONDUCTOR_DATA_DIR";

const CONFIG_FILE: &str = "conductor.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Resolve the config file location.
///
/// Priority:
/// 1. `CONDUCTOR_CONFIG` environment variable
/// 2. `<platform config dir>/conductor/conductor.toml`
/// 3. `./conductor.toml`
pub fn default_config_path() -> PathBuf {
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        return PathBuf::from(path);
    }

    dirs::config_dir()
        .map(|dir| dir.join("conductor").join(CONFIG_FILE))
        .unwrap_or_else(|| PathBuf::from(CONFIG_FILE))
}

/// Resolve the data directory (snapshots live here).
///
/// Priority:
/// 1. `CONDUCTOR_DATA_DIR` environment variable
/// 2. `~/.conductor`
/// 3. `./.conductor`
pub fn resolve_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
        return PathBuf::from(dir);
    }

    if let Some(home) = dirs::home_dir() {
        return home.join(".conductor");
    }

    PathBuf::from(".conductor")
}

/// Parse a config document.
pub fn parse_config(content: &str, path: &Path) -> Result<ControlPlaneConfig, ConfigError> {
    toml::from_str(content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Load configuration from an explicit path. The file must exist.
pub async fn load_config(path: &Path) -> Result<ControlPlaneConfig, ConfigError> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
    let config = parse_config(&content, path)?;
    tracing::debug!(
        path = %path.display(),
        routes = config.routes.len(),
        systems = config.systems.len(),
        "loaded config"
    );
    Ok(config)
}

/// Load configuration from `path`, or from [`default_config_path`] when
/// `path` is `None`. A missing default file yields the default config.
pub async fn load_config_or_default(path: Option<&Path>) -> Result<ControlPlaneConfig, ConfigError> {
    if let Some(path) = path {
        return load_config(path).await;
    }

    let path = default_config_path();
    match tokio::fs::try_exists(&path).await {
        Ok(true) => load_config(&path).await,
        _ => {
            tracing::debug!("No config found at {}, using defaults", path.display());
            Ok(ControlPlaneConfig::default())
        }
    }
}
