use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::admin::AdminConfig;
use crate::error::RehabError;
use crate::logging::LogConfig;
use crate::metrics::MetricsConfig;
use crate::recommendation::RecommendationConfig;

/// Main application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Application metadata
    pub metadata: ConfigMetadata,

    /// Storage settings
    pub settings: AppSettings,

    /// Sample trimming policy
    pub metrics: MetricsConfig,

    /// Recommendation engine tunables
    pub recommendation: RecommendationConfig,

    /// Clinician quick-generate settings
    pub admin: AdminConfig,

    pub logging: LogConfig,
}

/// Configuration metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigMetadata {
    /// Configuration format version
    pub version: String,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last modification timestamp
    pub updated_at: DateTime<Utc>,
}

impl Default for ConfigMetadata {
    fn default() -> Self {
        let now = Utc::now();
        ConfigMetadata {
            version: "1.0".to_string(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Storage settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    /// Data directory path
    pub data_dir: PathBuf,

    /// SQLite database file; defaults to `rehabrs.db` inside `data_dir`
    pub database_path: Option<PathBuf>,

    /// How long a locked database is retried before failing
    pub busy_timeout_ms: u64,
}

impl Default for AppSettings {
    fn default() -> Self {
        AppSettings {
            data_dir: AppConfig::config_dir(),
            database_path: None,
            busy_timeout_ms: 5_000,
        }
    }
}

impl AppSettings {
    pub fn database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join("rehabrs.db"))
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            metadata: ConfigMetadata::default(),
            settings: AppSettings::default(),
            metrics: MetricsConfig::default(),
            recommendation: RecommendationConfig::default(),
            admin: AdminConfig::default(),
            logging: LogConfig::default(),
        }
    }
}

fn fraction_ok(value: f64) -> bool {
    (0.0..=1.0).contains(&value)
}

/// Configuration management implementation
impl AppConfig {
    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: AppConfig = toml::from_str(&content).with_context(|| "Failed to parse TOML configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        self.metadata.updated_at = Utc::now();

        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {}", parent.display()))?;
        }

        let toml_content =
            toml::to_string_pretty(self).with_context(|| "Failed to serialize configuration to TOML")?;

        fs::write(&path, toml_content)
            .with_context(|| format!("Failed to write config file: {}", path.as_ref().display()))?;

        Ok(())
    }

    /// `~/.rehabrs`
    pub fn config_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".rehabrs")
    }

    /// Get default configuration file path
    pub fn default_config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Load configuration with fallback to defaults
    pub fn load_or_default() -> Self {
        let config_path = Self::default_config_path();
        match Self::load_from_file(&config_path) {
            Ok(config) => config,
            Err(err) => {
                tracing::debug!(path = %config_path.display(), error = %err, "Using default configuration");
                Self::default()
            }
        }
    }

    /// Reject values the engines cannot work with
    pub fn validate(&self) -> crate::error::Result<()> {
        let invalid = |msg: String| Err(RehabError::Configuration(msg));

        let m = &self.metrics;
        for (name, value) in [
            ("metrics.lead_trim_fraction", m.lead_trim_fraction),
            ("metrics.extremes_tail_trim_fraction", m.extremes_tail_trim_fraction),
            ("metrics.average_tail_trim_fraction", m.average_tail_trim_fraction),
        ] {
            if !fraction_ok(value) {
                return invalid(format!("{} must be within 0..=1, got {}", name, value));
            }
        }

        let r = &self.recommendation;
        if r.full_confidence_peers == 0 || r.full_confidence_exercises == 0 {
            return invalid("recommendation full-confidence counts must be positive".to_string());
        }
        if r.max_neighbours == 0 {
            return invalid("recommendation.max_neighbours must be positive".to_string());
        }
        if r.confidence_threshold > 100 || self.admin.confidence_threshold > 100 {
            return invalid("confidence thresholds must be within 0..=100".to_string());
        }
        if r.knn_repetitions == 0 || r.self_best_repetitions == 0 {
            return invalid("recommendation repetitions must be positive".to_string());
        }
        if self.admin.full_confidence_samples == 0 {
            return invalid("admin.full_confidence_samples must be positive".to_string());
        }
        Ok(())
    }

    /// Read a setting by dotted key, e.g. `recommendation.max_neighbours`
    pub fn get(&self, key: &str) -> Result<toml::Value> {
        let root = toml::Value::try_from(self).context("Failed to serialize configuration")?;
        let mut current = &root;
        for part in key.split('.') {
            current = current
                .get(part)
                .ok_or_else(|| anyhow!("Unknown configuration key: {}", key))?;
        }
        Ok(current.clone())
    }

    /// Update a setting by dotted key
    ///
    /// The raw value is parsed according to the type of the current value,
    /// and the whole configuration is re-validated before it is applied.
    pub fn set(&mut self, key: &str, raw: &str) -> Result<()> {
        let mut root = toml::Value::try_from(&*self).context("Failed to serialize configuration")?;

        let (parent_path, leaf) = match key.rsplit_once('.') {
            Some((parent, leaf)) => (Some(parent), leaf),
            None => (None, key),
        };

        let mut table = &mut root;
        if let Some(parent_path) = parent_path {
            for part in parent_path.split('.') {
                table = table
                    .get_mut(part)
                    .ok_or_else(|| anyhow!("Unknown configuration key: {}", key))?;
            }
        }
        let table = table
            .as_table_mut()
            .ok_or_else(|| anyhow!("Configuration key is not a section: {}", key))?;

        let value = match table.get(leaf) {
            Some(existing) => parse_like(existing, raw).with_context(|| format!("Invalid value for {}", key))?,
            // Unset optional settings are serialized as absent
            None => toml::Value::String(raw.to_string()),
        };
        table.insert(leaf.to_string(), value);

        let updated: AppConfig = root
            .try_into()
            .with_context(|| format!("Invalid value for {}", key))?;
        updated.validate()?;

        *self = updated;
        self.metadata.updated_at = Utc::now();
        Ok(())
    }

    /// Every leaf setting as `(dotted key, value)`
    pub fn list(&self) -> Result<Vec<(String, String)>> {
        let root = toml::Value::try_from(self).context("Failed to serialize configuration")?;
        let mut entries = Vec::new();
        flatten("", &root, &mut entries);
        Ok(entries)
    }
}

fn parse_like(existing: &toml::Value, raw: &str) -> Result<toml::Value> {
    let value = match existing {
        toml::Value::String(_) => toml::Value::String(raw.to_string()),
        toml::Value::Integer(_) => toml::Value::Integer(raw.trim().parse()?),
        toml::Value::Float(_) => toml::Value::Float(raw.trim().parse()?),
        toml::Value::Boolean(_) => toml::Value::Boolean(raw.trim().parse()?),
        _ => return Err(anyhow!("only scalar settings can be set")),
    };
    Ok(value)
}

fn flatten(prefix: &str, value: &toml::Value, out: &mut Vec<(String, String)>) {
    match value {
        toml::Value::Table(table) => {
            for (key, child) in table {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", prefix, key)
                };
                flatten(&path, child, out);
            }
        }
        toml::Value::String(s) => out.push((prefix.to_string(), s.clone())),
        other => out.push((prefix.to_string(), other.to_string())),
    }
}
