//! Configuration management with file persistence

use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::entity_queries::JourneyCacheSettings;
use crate::matching::{BasicOptimizationPolicy, RetryPolicy};

/// Waypoint configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub matching: MatchingConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchingConfig {
    /// Buckets up to this size are evaluated in one batch
    pub single_batch_limit: usize,
    /// Buckets up to this size are split into two batches
    pub double_batch_limit: usize,
    /// Buckets up to this size are split into three batches
    pub triple_batch_limit: usize,
    /// Batch count for anything larger
    pub max_batches: usize,
    /// Sampling temperature per attempt; the last entry repeats
    pub temperatures: Vec<f32>,
    /// Temperature for disambiguation and journey step selection
    pub precise_temperature: f32,
    /// Upper bound on a single oracle call
    pub generation_timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub max_backoff_ms: u64,
    pub jitter: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    pub journey_capacity: usize,
    pub journey_ttl_secs: u64,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            single_batch_limit: 10,
            double_batch_limit: 20,
            triple_batch_limit: 30,
            max_batches: 5,
            temperatures: vec![0.1, 0.3, 0.5],
            precise_temperature: 0.15,
            generation_timeout_secs: 120,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base_ms: 0,
            max_backoff_ms: 30_000,
            jitter: true,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            journey_capacity: 1024,
            journey_ttl_secs: 120,
        }
    }
}

impl Config {
    /// Get the config directory path
    pub fn config_dir() -> anyhow::Result<PathBuf> {
        let dir = if let Ok(custom_dir) = env::var("WAYPOINT_CONFIG_DIR") {
            PathBuf::from(custom_dir)
        } else {
            dirs::config_dir()
                .ok_or_else(|| anyhow!("Could not determine config directory"))?
                .join("waypoint")
        };
        Ok(dir)
    }

    /// Get the config file path
    pub fn config_path() -> anyhow::Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from file, or defaults if it doesn't exist
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load configuration from `path`, or defaults if it doesn't exist
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> anyhow::Result<()> {
        self.save_to(&Self::config_path()?)
    }

    /// Save configuration to `path`, creating its directory
    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        self.validate()?;

        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> anyhow::Result<()> {
        let m = &self.matching;
        if m.single_batch_limit == 0
            || m.single_batch_limit >= m.double_batch_limit
            || m.double_batch_limit >= m.triple_batch_limit
        {
            return Err(anyhow!(
                "Batch limits must be positive and strictly increasing (got {}/{}/{})",
                m.single_batch_limit,
                m.double_batch_limit,
                m.triple_batch_limit
            ));
        }
        if m.max_batches < 3 {
            return Err(anyhow!("matching.max_batches must be at least 3"));
        }
        if m.temperatures.is_empty() {
            return Err(anyhow!("matching.temperatures must list at least one value"));
        }
        if let Some(t) = m
            .temperatures
            .iter()
            .chain(std::iter::once(&m.precise_temperature))
            .find(|t| !(0.0..=2.0).contains(*t))
        {
            return Err(anyhow!("Temperature {} must be between 0.0 and 2.0", t));
        }
        if m.generation_timeout_secs == 0 {
            return Err(anyhow!("matching.generation_timeout_secs must be positive"));
        }

        if self.retry.max_attempts == 0 {
            return Err(anyhow!("retry.max_attempts must be at least 1"));
        }

        if self.cache.journey_capacity == 0 || self.cache.journey_ttl_secs == 0 {
            return Err(anyhow!("Journey cache capacity and TTL must be positive"));
        }

        Ok(())
    }

    /// Get a configuration value by key
    pub fn get(&self, key: &str) -> anyhow::Result<String> {
        match key {
            // Matching settings
            "matching.single_batch_limit" => Ok(self.matching.single_batch_limit.to_string()),
            "matching.double_batch_limit" => Ok(self.matching.double_batch_limit.to_string()),
            "matching.triple_batch_limit" => Ok(self.matching.triple_batch_limit.to_string()),
            "matching.max_batches" => Ok(self.matching.max_batches.to_string()),
            "matching.temperatures" => Ok(self
                .matching
                .temperatures
                .iter()
                .map(|t| t.to_string())
                .collect::<Vec<_>>()
                .join(", ")),
            "matching.precise_temperature" => Ok(self.matching.precise_temperature.to_string()),
            "matching.generation_timeout_secs" => {
                Ok(self.matching.generation_timeout_secs.to_string())
            }

            // Retry settings
            "retry.max_attempts" => Ok(self.retry.max_attempts.to_string()),
            "retry.backoff_base_ms" => Ok(self.retry.backoff_base_ms.to_string()),
            "retry.max_backoff_ms" => Ok(self.retry.max_backoff_ms.to_string()),
            "retry.jitter" => Ok(self.retry.jitter.to_string()),

            // Cache settings
            "cache.journey_capacity" => Ok(self.cache.journey_capacity.to_string()),
            "cache.journey_ttl_secs" => Ok(self.cache.journey_ttl_secs.to_string()),

            _ => Err(anyhow!(
                "Unknown configuration key: {}. Use `waypoint config list` to see available keys.",
                key
            )),
        }
    }

    /// Set a configuration value by key
    ///
    /// The whole configuration is re-validated; an invalid value leaves
    /// `self` unchanged.
    pub fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        let mut next = self.clone();

        match key {
            "matching.single_batch_limit" => {
                next.matching.single_batch_limit = parse(key, value)?;
            }
            "matching.double_batch_limit" => {
                next.matching.double_batch_limit = parse(key, value)?;
            }
            "matching.triple_batch_limit" => {
                next.matching.triple_batch_limit = parse(key, value)?;
            }
            "matching.max_batches" => {
                next.matching.max_batches = parse(key, value)?;
            }
            "matching.temperatures" => {
                next.matching.temperatures = value
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(|s| parse(key, s))
                    .collect::<anyhow::Result<Vec<f32>>>()?;
            }
            "matching.precise_temperature" => {
                next.matching.precise_temperature = parse(key, value)?;
            }
            "matching.generation_timeout_secs" => {
                next.matching.generation_timeout_secs = parse(key, value)?;
            }

            "retry.max_attempts" => {
                next.retry.max_attempts = parse(key, value)?;
            }
            "retry.backoff_base_ms" => {
                next.retry.backoff_base_ms = parse(key, value)?;
            }
            "retry.max_backoff_ms" => {
                next.retry.max_backoff_ms = parse(key, value)?;
            }
            "retry.jitter" => {
                next.retry.jitter = parse(key, value)?;
            }

            "cache.journey_capacity" => {
                next.cache.journey_capacity = parse(key, value)?;
            }
            "cache.journey_ttl_secs" => {
                next.cache.journey_ttl_secs = parse(key, value)?;
            }

            _ => {
                return Err(anyhow!(
                    "Unknown configuration key: {}. Use `waypoint config list` to see available keys.",
                    key
                ));
            }
        }

        next.validate()?;
        *self = next;
        Ok(())
    }

    /// List all configuration keys and their values
    pub fn list(&self) -> anyhow::Result<Vec<(String, String)>> {
        let keys = [
            "matching.single_batch_limit",
            "matching.double_batch_limit",
            "matching.triple_batch_limit",
            "matching.max_batches",
            "matching.temperatures",
            "matching.precise_temperature",
            "matching.generation_timeout_secs",
            "retry.max_attempts",
            "retry.backoff_base_ms",
            "retry.max_backoff_ms",
            "retry.jitter",
            "cache.journey_capacity",
            "cache.journey_ttl_secs",
        ];

        keys.into_iter()
            .map(|key| {
                let value = self.get(key)?;
                Ok((key.to_string(), value))
            })
            .collect()
    }

    /// Reset configuration to defaults
    pub fn reset() -> anyhow::Result<()> {
        let path = Self::config_path()?;
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("Failed to remove config file: {}", path.display()))?;
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry.max_attempts)
            .with_backoff(
                Duration::from_millis(self.retry.backoff_base_ms),
                Duration::from_millis(self.retry.max_backoff_ms),
            )
            .with_jitter(self.retry.jitter)
    }

    pub fn optimization_policy(&self) -> BasicOptimizationPolicy {
        let m = &self.matching;
        BasicOptimizationPolicy::new(
            [m.single_batch_limit, m.double_batch_limit, m.triple_batch_limit],
            m.max_batches,
        )
        .with_temperatures(m.temperatures.clone(), m.precise_temperature)
    }

    pub fn journey_cache_settings(&self) -> JourneyCacheSettings {
        JourneyCacheSettings {
            capacity: self.cache.journey_capacity,
            ttl: Duration::from_secs(self.cache.journey_ttl_secs),
        }
    }

    pub fn generation_timeout(&self) -> Duration {
        Duration::from_secs(self.matching.generation_timeout_secs)
    }
}

fn parse<T>(key: &str, value: &str) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .trim()
        .parse()
        .with_context(|| format!("Invalid {} value: {}", key, value))
}
