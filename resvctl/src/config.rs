//! Application configuration management.
//!
//! Configuration is loaded from a YAML file with environment variable
//! overrides. The configuration file path defaults to `config.yaml` but can
//! be specified via the `-f` flag or the `RESVCTL_CONFIG` environment
//! variable.
//!
//! ## Loading Priority
//!
//! Configuration sources are merged in the following order (later sources
//! override earlier ones):
//!
//! 1. **YAML config file** - Base configuration (default: `config.yaml`)
//! 2. **Environment variables** - Variables prefixed with `RESVCTL_`
//! 3. **DATABASE_URL** - Special case: overrides `database_url` if set
//!
//! For nested config values, use double underscores in environment
//! variables: `RESVCTL_PROCESSOR__INTERVAL=30s` sets `processor.interval`.

use clap::Parser;
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::errors::Error;
use crate::policy_store::{DEFAULT_CACHE_CAPACITY, DEFAULT_CACHE_TTL, PolicyStore};

/// Simple CLI args - just for specifying config file
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short = 'f', long, env = "RESVCTL_CONFIG", default_value = "config.yaml")]
    pub config: String,

    /// Validate configuration and exit without starting the engine.
    /// Useful for CI/CD pipelines to catch config errors before deployment.
    #[arg(long)]
    pub validate: bool,
}

/// Main application configuration.
///
/// All fields have sensible defaults defined in the `Default` implementation.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// PostgreSQL connection URL
    pub database_url: String,
    /// Connection pool size
    pub max_connections: u32,
    /// Expiration processor settings
    pub processor: ProcessorConfig,
    /// Policy lookup cache settings
    pub policy_cache: PolicyCacheConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "postgresql://localhost/resvctl".to_string(),
            max_connections: 10,
            processor: ProcessorConfig::default(),
            policy_cache: PolicyCacheConfig::default(),
        }
    }
}

/// Settings for the periodic expiration processor.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessorConfig {
    /// Start the periodic loop at boot
    pub enabled: bool,
    /// Time between ticks
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    /// How long `cleaned` TTL records are retained before the sweep deletes
    /// them
    pub retention_days: i64,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(60),
            retention_days: 30,
        }
    }
}

/// Settings for the in-process policy cache. Disabling the cache is always
/// safe; every lookup falls through to the database.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct PolicyCacheConfig {
    pub enabled: bool,
    pub max_capacity: u64,
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
}

impl Default for PolicyCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_capacity: DEFAULT_CACHE_CAPACITY,
            ttl: DEFAULT_CACHE_TTL,
        }
    }
}

impl PolicyCacheConfig {
    pub fn build(&self) -> PolicyStore {
        if self.enabled {
            PolicyStore::new(self.max_capacity, self.ttl)
        } else {
            PolicyStore::disabled()
        }
    }
}

impl Config {
    /// Load configuration from the YAML file and environment.
    pub fn load(args: &Args) -> Result<Self, Error> {
        let mut config: Config = Figment::new()
            .merge(Yaml::file(&args.config))
            .merge(Env::prefixed("RESVCTL_").split("__"))
            .extract()
            .map_err(|e| Error::Internal {
                operation: format!("load configuration: {e}"),
            })?;

        // DATABASE_URL wins over everything for the connection string
        if let Ok(url) = std::env::var("DATABASE_URL") {
            config.database_url = url;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.max_connections == 0 {
            return Err(Error::BadRequest {
                message: "max_connections must be at least 1".to_string(),
            });
        }
        if self.processor.interval < Duration::from_secs(1) {
            return Err(Error::BadRequest {
                message: "processor.interval must be at least one second".to_string(),
            });
        }
        if self.processor.retention_days < 1 {
            return Err(Error::BadRequest {
                message: "processor.retention_days must be at least one day".to_string(),
            });
        }
        Ok(())
    }
}
