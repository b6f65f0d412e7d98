use color_eyre::eyre::eyre;
use color_eyre::Result;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::{CacheSettings, DEFAULT_MAX_ENTRIES, DEFAULT_MAX_IDLE_SECS};
use crate::descriptor::DEFAULT_LIMIT;
use crate::normalize::{HeaderPolicy, DEFAULT_LIST_SEPARATOR};
use crate::payload::CompressionFormat;

const CONFIG_FILE: &str = "config.toml";
const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error", "off"];

/// Manages config directory and config file operations
#[derive(Clone)]
pub struct ConfigManager {
    pub(crate) config_dir: PathBuf,
}

impl ConfigManager {
    /// Create a ConfigManager with a custom config directory (primarily for testing)
    pub fn with_dir(config_dir: PathBuf) -> Self {
        Self { config_dir }
    }

    /// Create a new ConfigManager for the given app name
    pub fn new(app_name: &str) -> Result<Self> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| eyre!("Could not determine config directory"))?
            .join(app_name);

        Ok(Self { config_dir })
    }

    /// Get the config directory path
    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// Get path to a specific config file
    pub fn config_path(&self, path: &str) -> PathBuf {
        self.config_dir.join(path)
    }

    /// Ensure the config directory exists
    pub fn ensure_config_dir(&self) -> Result<()> {
        if !self.config_dir.exists() {
            std::fs::create_dir_all(&self.config_dir)?;
        }
        Ok(())
    }

    /// Generate default configuration template as a string
    pub fn generate_default_config(&self) -> String {
        DEFAULT_CONFIG_TEMPLATE.to_string()
    }

    /// Write default configuration to config file
    pub fn write_default_config(&self, force: bool) -> Result<PathBuf> {
        let config_path = self.config_path(CONFIG_FILE);

        if config_path.exists() && !force {
            return Err(eyre!(
                "Config file already exists at {}. Use --force to overwrite.",
                config_path.display()
            ));
        }

        self.ensure_config_dir()?;
        std::fs::write(&config_path, DEFAULT_CONFIG_TEMPLATE)?;

        Ok(config_path)
    }
}

/// Complete application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Configuration format version (for future compatibility)
    pub version: String,
    pub cache: CacheConfig,
    pub table: TableConfig,
    pub payload: PayloadConfig,
    pub query: QueryConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub namespace: String,
    pub max_entries: usize,
    pub max_idle_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableConfig {
    pub header_detection: String,
    pub date_formats: Vec<String>,
    pub date_formats_separator: String,
    pub sorting: bool,
    pub filtering: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PayloadConfig {
    pub compression: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    pub default_limit: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            version: "0.1".to_string(),
            cache: CacheConfig::default(),
            table: TableConfig::default(),
            payload: PayloadConfig::default(),
            query: QueryConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            namespace: crate::APP_NAME.to_string(),
            max_entries: DEFAULT_MAX_ENTRIES,
            max_idle_secs: DEFAULT_MAX_IDLE_SECS,
        }
    }
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            header_detection: HeaderPolicy::default().as_str().to_string(),
            date_formats: Vec::new(),
            date_formats_separator: DEFAULT_LIST_SEPARATOR.to_string(),
            sorting: true,
            filtering: true,
        }
    }
}

impl Default for PayloadConfig {
    fn default() -> Self {
        Self {
            compression: CompressionFormat::default().name().to_string(),
        }
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            default_limit: DEFAULT_LIMIT,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
        }
    }
}

// Configuration loading and merging
impl AppConfig {
    /// Load configuration from all layers (default → user)
    pub fn load(app_name: &str) -> Result<Self> {
        Self::load_from(&ConfigManager::new(app_name)?)
    }

    /// Load configuration using the config file managed by `config_manager`
    pub fn load_from(config_manager: &ConfigManager) -> Result<Self> {
        let mut config = AppConfig::default();
        config.merge(Self::load_user_config(config_manager)?);
        config.validate()?;
        Ok(config)
    }

    /// Load user configuration from ~/.config/livetab/config.toml
    fn load_user_config(config_manager: &ConfigManager) -> Result<AppConfig> {
        let config_path = config_manager.config_path(CONFIG_FILE);

        if !config_path.exists() {
            return Ok(AppConfig::default());
        }

        let content = std::fs::read_to_string(&config_path).map_err(|e| {
            eyre!(
                "Failed to read config file at {}: {}",
                config_path.display(),
                e
            )
        })?;

        toml::from_str(&content).map_err(|e| {
            eyre!(
                "Failed to parse config file at {}: {}",
                config_path.display(),
                e
            )
        })
    }

    /// Merge another config into this one (other takes precedence)
    pub fn merge(&mut self, other: AppConfig) {
        if other.version != AppConfig::default().version {
            self.version = other.version;
        }

        self.cache.merge(other.cache);
        self.table.merge(other.table);
        self.payload.merge(other.payload);
        self.query.merge(other.query);
        self.logging.merge(other.logging);
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if !self.version.starts_with("0.1") {
            return Err(eyre!(
                "Unsupported config version: {}. Expected 0.1.x",
                self.version
            ));
        }

        if self.cache.namespace.trim().is_empty() {
            return Err(eyre!("cache.namespace must not be empty"));
        }
        if self.cache.max_entries == 0 {
            return Err(eyre!("cache.max_entries must be greater than 0"));
        }
        if self.cache.max_idle_secs == 0 {
            return Err(eyre!("cache.max_idle_secs must be greater than 0"));
        }

        self.table.header_policy()?;
        self.table.separator()?;

        self.payload.compression_format()?;

        if self.query.default_limit == 0 {
            return Err(eyre!("query.default_limit must be greater than 0"));
        }

        if !LOG_LEVELS.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(eyre!(
                "Invalid logging.level: {}. Must be one of {}",
                self.logging.level,
                LOG_LEVELS.join(", ")
            ));
        }

        Ok(())
    }
}

// Merge implementations for each config section
impl CacheConfig {
    pub fn merge(&mut self, other: Self) {
        let default = CacheConfig::default();
        if other.enabled != default.enabled {
            self.enabled = other.enabled;
        }
        if other.namespace != default.namespace {
            self.namespace = other.namespace;
        }
        if other.max_entries != default.max_entries {
            self.max_entries = other.max_entries;
        }
        if other.max_idle_secs != default.max_idle_secs {
            self.max_idle_secs = other.max_idle_secs;
        }
    }

    pub fn settings(&self) -> CacheSettings {
        CacheSettings {
            namespace: self.namespace.clone(),
            max_entries: self.max_entries,
            max_idle: Duration::from_secs(self.max_idle_secs),
        }
    }
}

impl TableConfig {
    pub fn merge(&mut self, other: Self) {
        let default = TableConfig::default();
        if other.header_detection != default.header_detection {
            self.header_detection = other.header_detection;
        }
        if other.date_formats != default.date_formats {
            self.date_formats = other.date_formats;
        }
        if other.date_formats_separator != default.date_formats_separator {
            self.date_formats_separator = other.date_formats_separator;
        }
        if other.sorting != default.sorting {
            self.sorting = other.sorting;
        }
        if other.filtering != default.filtering {
            self.filtering = other.filtering;
        }
    }

    pub fn header_policy(&self) -> Result<HeaderPolicy> {
        match self.header_detection.to_lowercase().as_str() {
            "remove" => Ok(HeaderPolicy::Remove),
            "keep" => Ok(HeaderPolicy::Keep),
            "ignore" => Ok(HeaderPolicy::Ignore),
            _ => Err(eyre!(
                "Invalid table.header_detection: {}. Must be 'remove', 'keep', or 'ignore'",
                self.header_detection
            )),
        }
    }

    pub fn separator(&self) -> Result<Regex> {
        Regex::new(&self.date_formats_separator).map_err(|e| {
            eyre!(
                "Invalid table.date_formats_separator '{}': {}",
                self.date_formats_separator,
                e
            )
        })
    }
}

impl PayloadConfig {
    pub fn merge(&mut self, other: Self) {
        let default = PayloadConfig::default();
        if other.compression != default.compression {
            self.compression = other.compression;
        }
    }

    pub fn compression_format(&self) -> Result<CompressionFormat> {
        CompressionFormat::from_name(&self.compression).ok_or_else(|| {
            eyre!(
                "Invalid payload.compression: {}. Must be 'gzip', 'zstd', 'bzip2', or 'xz'",
                self.compression
            )
        })
    }
}

impl QueryConfig {
    pub fn merge(&mut self, other: Self) {
        let default = QueryConfig::default();
        if other.default_limit != default.default_limit {
            self.default_limit = other.default_limit;
        }
    }
}

impl LoggingConfig {
    pub fn merge(&mut self, other: Self) {
        let default = LoggingConfig::default();
        if other.level != default.level {
            self.level = other.level;
        }
    }
}

const DEFAULT_CONFIG_TEMPLATE: &str = include_str!("../config/default.toml");
