use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use trackbridge_core::{
    BridgeClientOptions, StudioConfig, diagnostics::DEFAULT_FILTER, history::DEFAULT_HISTORY_DEPTH,
};

pub const CONFIG_FILE_NAME: &str = "trackbridge.config.toml";
pub const CONFIG_PATH_ENV: &str = "TRACKBRIDGE_CONFIG_PATH";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub project: ProjectConfig,
    pub bridge: BridgeConfig,
    pub sync: SyncConfig,
    pub diagnostics: DiagnosticsConfig,
    pub paths: PathsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProjectConfig {
    pub default_title: String,
    pub default_bpm: f64,
    pub time_signature_numerator: u32,
    pub time_signature_denominator: u32,
    /// Opened at startup instead of an empty session when set.
    pub open_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BridgeConfig {
    pub socket_path: PathBuf,
    pub request_timeout_ms: u64,
    pub reconnect_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SyncConfig {
    pub media_root: PathBuf,
    pub history_depth: usize,
    pub broadcast_interval_ms: u64,
    pub autosave_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DiagnosticsConfig {
    pub rust_log_filter: String,
    pub trace_file_prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PathsConfig {
    pub logs_dir: PathBuf,
    pub autosave_dir: PathBuf,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            default_title: "Untitled".to_string(),
            default_bpm: 128.0,
            time_signature_numerator: 4,
            time_signature_denominator: 4,
            open_path: None,
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            socket_path: env::temp_dir().join("trackbridge-native.sock"),
            request_timeout_ms: 5_000,
            reconnect_interval_ms: 1_500,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            media_root: PathBuf::from("data/media"),
            history_depth: DEFAULT_HISTORY_DEPTH,
            broadcast_interval_ms: 40,
            autosave_interval_secs: 60,
        }
    }
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            rust_log_filter: DEFAULT_FILTER.to_string(),
            trace_file_prefix: "trackbridge".to_string(),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            logs_dir: PathBuf::from("logs"),
            autosave_dir: PathBuf::from("data/autosave"),
        }
    }
}

impl AppConfig {
    /// Loads the discovered config file, or defaults when there is none.
    ///
    /// The returned path is `None` when defaults were used.
    pub fn load() -> Result<(Self, Option<PathBuf>)> {
        match discover_config_path()? {
            Some(path) => Ok((Self::from_file(&path)?, Some(path))),
            None => Ok((Self::default(), None)),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("failed to parse config TOML from {}", path.display()))
    }

    #[must_use]
    pub fn bridge_options(&self) -> BridgeClientOptions {
        BridgeClientOptions {
            socket_path: self.bridge.socket_path.clone(),
            request_timeout: Duration::from_millis(self.bridge.request_timeout_ms.max(1)),
            reconnect_interval: Duration::from_millis(self.bridge.reconnect_interval_ms.max(10)),
        }
    }

    #[must_use]
    pub fn studio_config(&self) -> StudioConfig {
        StudioConfig {
            media_root: self.sync.media_root.clone(),
            history_depth: self.sync.history_depth,
        }
    }
}

fn discover_config_path() -> Result<Option<PathBuf>> {
    if let Some(path) = env::var_os(CONFIG_PATH_ENV) {
        let path = PathBuf::from(path);
        if path.is_file() {
            return Ok(Some(path));
        }
    }

    let cwd = env::current_dir().context("failed to resolve current directory")?;
    let candidates = [
        cwd.join(CONFIG_FILE_NAME),
        cwd.join("..").join(CONFIG_FILE_NAME),
    ];
    Ok(candidates.into_iter().find(|path| path.is_file()))
}
