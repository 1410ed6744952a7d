use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::models::ScoringWeights;

const ENV_PREFIX: &str = "LENDMATCH";

/// Application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerSettings,
    /// Absent means the in-memory repositories are used
    #[serde(default)]
    pub database: Option<DatabaseSettings>,
    #[serde(default)]
    pub matching: MatchingSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub workers: Option<usize>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            workers: None,
        }
    }
}

fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    pub url: String,
    pub max_connections: Option<u32>,
    pub min_connections: Option<u32>,
    pub acquire_timeout_secs: Option<u64>,
}

impl DatabaseSettings {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs.unwrap_or(5))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MatchingSettings {
    /// Concurrent project workers during a sweep
    #[serde(default = "default_sweep_workers")]
    pub workers: usize,
    #[serde(default)]
    pub weights: WeightsConfig,
    /// JSON file with projects and criteria loaded into the in-memory store
    pub seed_file: Option<PathBuf>,
}

impl Default for MatchingSettings {
    fn default() -> Self {
        Self {
            workers: default_sweep_workers(),
            weights: WeightsConfig::default(),
            seed_file: None,
        }
    }
}

fn default_sweep_workers() -> usize { 4 }

#[derive(Debug, Clone, Deserialize)]
pub struct WeightsConfig {
    #[serde(default = "default_loan_fit_weight")]
    pub loan_fit: f64,
    #[serde(default = "default_ltv_headroom_weight")]
    pub ltv_headroom: f64,
    #[serde(default = "default_location_bonus_weight")]
    pub location_bonus: f64,
}

impl Default for WeightsConfig {
    fn default() -> Self {
        Self {
            loan_fit: default_loan_fit_weight(),
            ltv_headroom: default_ltv_headroom_weight(),
            location_bonus: default_location_bonus_weight(),
        }
    }
}

fn default_loan_fit_weight() -> f64 { 0.5 }
fn default_ltv_headroom_weight() -> f64 { 0.3 }
fn default_location_bonus_weight() -> f64 { 0.2 }

impl WeightsConfig {
    /// Scoring weights, refusing negative or all-zero configurations
    pub fn to_weights(&self) -> Result<ScoringWeights, ConfigError> {
        let weights = ScoringWeights {
            loan_fit: self.loan_fit,
            ltv_headroom: self.ltv_headroom,
            location_bonus: self.location_bonus,
        };

        let parts = [weights.loan_fit, weights.ltv_headroom, weights.location_bonus];
        if parts.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(ConfigError::Message(format!(
                "matching.weights must be finite and non-negative: {:?}",
                weights
            )));
        }
        if weights.sum() <= 0.0 {
            return Err(ConfigError::Message(
                "matching.weights must not all be zero".to_string(),
            ));
        }

        Ok(weights)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String { "info".to_string() }
fn default_log_format() -> String { "json".to_string() }

fn environment() -> Environment {
    // e.g., LENDMATCH__SERVER__PORT -> server.port
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("__")
        .separator("__")
        .try_parsing(true)
}

impl Settings {
    /// Load configuration from file and environment variables
    ///
    /// Configuration is loaded in the following order (later overrides earlier):
    /// 1. Default values in the struct
    /// 2. Configuration file (config/default.toml)
    /// 3. Local overrides (config/local.toml)
    /// 4. Environment variables (prefixed with LENDMATCH__), then DATABASE_URL
    pub fn load() -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(environment());

        if let Ok(url) = std::env::var("DATABASE_URL") {
            builder = builder.set_override("database.url", url)?;
        }

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load configuration from a custom path
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let settings: Settings = Config::builder()
            .add_source(File::from(path.as_ref()))
            .add_source(environment())
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.matching.weights.to_weights()?;
        if self.matching.workers == 0 {
            return Err(ConfigError::Message("matching.workers must be at least 1".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_weights() {
        let weights = WeightsConfig::default().to_weights().unwrap();
        assert_eq!(weights, ScoringWeights::default());
        assert!((weights.sum() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_rejects_negative_weights() {
        let weights = WeightsConfig {
            loan_fit: 0.7,
            ltv_headroom: -0.1,
            location_bonus: 0.4,
        };
        assert!(weights.to_weights().is_err());
    }

    #[test]
    fn test_rejects_all_zero_weights() {
        let weights = WeightsConfig {
            loan_fit: 0.0,
            ltv_headroom: 0.0,
            location_bonus: 0.0,
        };
        assert!(weights.to_weights().is_err());
    }

    #[test]
    fn test_default_logging() {
        let logging = LoggingSettings::default();
        assert_eq!(logging.level, "info");
        assert_eq!(logging.format, "json");
    }

    #[test]
    fn test_load_from_file_without_database() {
        let path = std::env::temp_dir()
            .join(format!("lendmatch-config-{}.toml", std::process::id()));
        std::fs::write(
            &path,
            r#"
            [server]
            port = 9090

            [matching]
            workers = 8

            [matching.weights]
            loan_fit = 0.6
            "#,
        )
        .unwrap();

        let settings = Settings::load_from(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(settings.server.port, 9090);
        assert!(settings.database.is_none());
        assert_eq!(settings.matching.workers, 8);
        assert_eq!(settings.matching.weights.loan_fit, 0.6);
        assert_eq!(settings.matching.weights.ltv_headroom, 0.3);
    }
}
