/// Application configuration
///
/// Loaded once at startup from JSON:
/// - `$CVIEW_CONFIG` if set
/// - otherwise `<config dir>/cview/config.json`
///
/// A missing file yields defaults. `CVIEW_BACKEND` overrides the backend
/// choice with `sim` or `tcp://host:port`.
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::ConfigError;
use crate::state::settings::AppSettings;

pub const CONFIG_ENV: &str = "CVIEW_CONFIG";
pub const BACKEND_ENV: &str = "CVIEW_BACKEND";

/// Simulated detector parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub width: u32,
    pub height: u32,
    /// Time per simulated frame
    pub frame_delay_ms: u64,
    /// Exposures covered by generated dark maps
    pub dark_map_exposures: Vec<u32>,
    pub dark_map_frames: u32,
    /// Start with dark and defect maps already in place
    pub calibrated: bool,
    pub save_dir: Option<PathBuf>,
    /// Directory `open_images` reads PNG/TIFF files from
    pub import_dir: Option<PathBuf>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            width: 1031,
            height: 1536,
            frame_delay_ms: 100,
            dark_map_exposures: vec![1, 10, 100, 250, 500, 1000],
            dark_map_frames: 5,
            calibrated: false,
            save_dir: None,
            import_dir: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// `host:port` of the backend
    pub address: String,
    pub request_timeout_ms: u64,
    pub connect_timeout_ms: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:7878".to_string(),
            request_timeout_ms: 10_000,
            connect_timeout_ms: 3_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendConfig {
    Simulated(SimConfig),
    Remote(RemoteConfig),
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig::Simulated(SimConfig::default())
    }
}

impl BackendConfig {
    /// Parse a `CVIEW_BACKEND` value
    pub fn from_override(value: &str) -> Result<Self, ConfigError> {
        let value = value.trim();
        if value == "sim" {
            return Ok(BackendConfig::Simulated(SimConfig::default()));
        }
        match value.strip_prefix("tcp://") {
            Some(address) if !address.is_empty() => Ok(BackendConfig::Remote(RemoteConfig {
                address: address.to_string(),
                ..RemoteConfig::default()
            })),
            _ => Err(ConfigError::BackendOverride(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub backend: BackendConfig,
    /// Exposure used by the stream button
    pub live_exp_time: u32,
    /// Longest side of image list thumbnails
    pub thumbnail_size: u32,
    /// Initial values for the settings form
    pub settings: AppSettings,
    /// Fallback tracing filter when `RUST_LOG` is unset
    pub log_filter: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            backend: BackendConfig::default(),
            live_exp_time: 100,
            thumbnail_size: 300,
            settings: AppSettings::default(),
            log_filter: "cview=info".to_string(),
        }
    }
}

impl AppConfig {
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("cview").join("config.json"))
    }

    /// Read a config file; a missing file gives the defaults
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.display().to_string(),
                    source,
                })
            }
        };
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Load from the environment-selected path and apply overrides
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var_os(CONFIG_ENV)
            .map(PathBuf::from)
            .or_else(Self::default_path);
        let mut config = match path {
            Some(path) => {
                let config = Self::load_from(&path)?;
                info!("Configuration from {}", path.display());
                config
            }
            None => Self::default(),
        };
        if let Ok(value) = std::env::var(BACKEND_ENV) {
            config.backend = BackendConfig::from_override(&value)?;
        }
        Ok(config)
    }
}
