use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::crawler::CrawlOptions;
use crate::pool::PoolConfig;

pub const ENV_POOL_CAPACITY: &str = "CRAWLER_POOL_CAPACITY";
pub const ENV_ACQUIRE_TIMEOUT_SECS: &str = "CRAWLER_ACQUIRE_TIMEOUT_SECS";
pub const ENV_IDLE_MAX_AGE_SECS: &str = "CRAWLER_IDLE_MAX_AGE_SECS";
pub const ENV_NAV_TIMEOUT_SECS: &str = "CRAWLER_NAV_TIMEOUT_SECS";
pub const ENV_USER_AGENT: &str = "CRAWLER_USER_AGENT";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub pool: PoolSettings,
    pub engine: EngineSettings,
    pub crawl: CrawlOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSettings {
    pub capacity: usize,
    pub acquire_timeout_secs: u64,
    pub idle_max_age_secs: u64,
    pub reap_interval_secs: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            capacity: 5,
            acquire_timeout_secs: 30,
            idle_max_age_secs: 300,
            reap_interval_secs: 60,
        }
    }
}

impl PoolSettings {
    pub fn to_pool_config(&self) -> PoolConfig {
        PoolConfig {
            capacity: self.capacity.max(1),
            acquire_timeout: Duration::from_secs(self.acquire_timeout_secs),
            idle_max_age: Duration::from_secs(self.idle_max_age_secs),
            reap_interval: Duration::from_secs(self.reap_interval_secs.max(1)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Per-navigation timeout
    pub navigation_timeout_secs: u64,

    /// Fixed user agent; a rotating browser UA is used when unset
    pub user_agent: Option<String>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            navigation_timeout_secs: 30,
            user_agent: None,
        }
    }
}

impl EngineSettings {
    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_secs(self.navigation_timeout_secs)
    }
}

impl AppConfig {
    /// Defaults, then the optional TOML file, then environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml(&raw).with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        toml::from_str(raw).context("Failed to parse TOML")
    }

    /// Apply `CRAWLER_*` overrides read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup(ENV_POOL_CAPACITY) {
            self.pool.capacity = parse_env(ENV_POOL_CAPACITY, &v)?;
        }
        if let Some(v) = lookup(ENV_ACQUIRE_TIMEOUT_SECS) {
            self.pool.acquire_timeout_secs = parse_env(ENV_ACQUIRE_TIMEOUT_SECS, &v)?;
        }
        if let Some(v) = lookup(ENV_IDLE_MAX_AGE_SECS) {
            self.pool.idle_max_age_secs = parse_env(ENV_IDLE_MAX_AGE_SECS, &v)?;
        }
        if let Some(v) = lookup(ENV_NAV_TIMEOUT_SECS) {
            self.engine.navigation_timeout_secs = parse_env(ENV_NAV_TIMEOUT_SECS, &v)?;
        }
        if let Some(v) = lookup(ENV_USER_AGENT) {
            if !v.trim().is_empty() {
                self.engine.user_agent = Some(v);
            }
        }
        Ok(())
    }
}

fn parse_env<T>(key: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .trim()
        .parse::<T>()
        .with_context(|| format!("{} must be a number, got '{}'", key, value))
}
