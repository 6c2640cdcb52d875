use dash_sync_core::EngineConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Source of a configuration value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigSource {
    Default,
    File,
    Environment,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::Default => write!(f, "default"),
            ConfigSource::File => write!(f, "file"),
            ConfigSource::Environment => write!(f, "environment"),
        }
    }
}

/// A configuration value with its source
#[derive(Debug, Clone, Serialize)]
pub struct ConfigValue<T> {
    pub value: T,
    pub source: ConfigSource,
}

impl<T> ConfigValue<T> {
    pub fn new(value: T, source: ConfigSource) -> Self {
        Self { value, source }
    }
}

/// Application configuration with source tracking
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    /// Directory holding the local layout, queue and version files
    pub data_dir: ConfigValue<PathBuf>,
    /// Whose dashboard the CLI edits
    pub user_id: ConfigValue<String>,
    /// Stable id for this machine; generated per run when unset
    pub device_id: ConfigValue<Option<String>>,
    /// Base URL of a dashsync-server; offline-only when unset
    pub server_url: ConfigValue<Option<String>>,
    /// Config file path used (if any)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_file: Option<PathBuf>,
    /// Engine tuning (debounce, retries, caps, thresholds)
    pub engine: EngineConfig,
}

/// Internal struct for deserializing config file
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct ConfigFile {
    data_dir: Option<PathBuf>,
    user_id: Option<String>,
    device_id: Option<String>,
    server_url: Option<String>,
    engine: Option<EngineConfig>,
}

impl Config {
    /// Load configuration with priority: env vars > config file > defaults
    pub fn load(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let mut data_dir = ConfigValue::new(Self::default_data_dir(), ConfigSource::Default);
        let mut user_id = ConfigValue::new("default".to_string(), ConfigSource::Default);
        let mut device_id = ConfigValue::new(None, ConfigSource::Default);
        let mut server_url = ConfigValue::new(None, ConfigSource::Default);
        let mut config_file = None;
        let mut engine = EngineConfig::default();

        let path = config_path.unwrap_or_else(Self::default_config_path);
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadError(path.clone(), e))?;
            let file_config: ConfigFile = serde_yaml::from_str(&contents)
                .map_err(|e| ConfigError::ParseError(path.clone(), e))?;

            config_file = Some(path.clone());

            if let Some(dir) = file_config.data_dir {
                // Resolve relative paths against config file's directory
                let resolved = if dir.is_relative() {
                    path.parent().map(|p| p.join(&dir)).unwrap_or(dir)
                } else {
                    dir
                };
                data_dir = ConfigValue::new(resolved, ConfigSource::File);
            }
            if let Some(user) = file_config.user_id {
                user_id = ConfigValue::new(user, ConfigSource::File);
            }
            if let Some(device) = file_config.device_id {
                device_id = ConfigValue::new(Some(device), ConfigSource::File);
            }
            if let Some(url) = file_config.server_url {
                server_url = ConfigValue::new(Some(url), ConfigSource::File);
            }
            if let Some(engine_config) = file_config.engine {
                engine = engine_config;
            }
        }

        // Apply environment variable overrides
        if let Ok(dir) = std::env::var("DASHSYNC_DATA_DIR") {
            data_dir = ConfigValue::new(PathBuf::from(dir), ConfigSource::Environment);
        }
        if let Ok(user) = std::env::var("DASHSYNC_USER_ID") {
            user_id = ConfigValue::new(user, ConfigSource::Environment);
        }
        if let Ok(device) = std::env::var("DASHSYNC_DEVICE_ID") {
            device_id = ConfigValue::new(Some(device), ConfigSource::Environment);
        }
        if let Ok(url) = std::env::var("DASHSYNC_SERVER_URL") {
            server_url = ConfigValue::new(Some(url), ConfigSource::Environment);
        }

        Ok(Self {
            data_dir,
            user_id,
            device_id,
            server_url,
            config_file,
            engine,
        })
    }

    /// Default config directory (platform-specific):
    /// - Linux: ~/.config/dashsync/
    /// - macOS: ~/Library/Application Support/dashsync/
    /// - Windows: %APPDATA%/dashsync/
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("dashsync")
    }

    /// Default data directory (platform-specific):
    /// - Linux: ~/.local/share/dashsync/
    /// - macOS: ~/Library/Application Support/dashsync/
    /// - Windows: %APPDATA%/dashsync/
    pub fn default_data_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("dashsync")
    }

    /// Default config file path (platform-specific config dir + config.yaml)
    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join("config.yaml")
    }
}

#[derive(Debug)]
pub enum ConfigError {
    ReadError(PathBuf, std::io::Error),
    ParseError(PathBuf, serde_yaml::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::ReadError(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
