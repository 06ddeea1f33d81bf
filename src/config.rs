//! Configuration management for the blobedge proxy

use crate::error::{EdgeError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Configuration for the edge proxy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeConfig {
    /// Address the proxy listens on (default: 0.0.0.0:8080)
    #[serde(default = "default_listen_address")]
    pub listen_address: String,

    /// Base URL of the content-addressed object store
    #[serde(default)]
    pub object_store_url: Option<String>,

    /// Base URL of the legacy streaming origin (fallback + passthrough)
    #[serde(default)]
    pub legacy_origin_url: Option<String>,

    /// Base URL of the metadata index (hash <-> legacy-id lookups)
    #[serde(default)]
    pub metadata_index_url: Option<String>,

    /// Base URL of the moderation store (block-list lookups)
    #[serde(default)]
    pub moderation_url: Option<String>,

    /// Base URL of the shared edge cache
    #[serde(default)]
    pub edge_cache_url: Option<String>,

    /// Base URL of the media transform service (thumbnail frames)
    #[serde(default)]
    pub transform_url: Option<String>,

    /// Key prefix for current-format objects in the store (default: "media")
    #[serde(default = "default_storage_key_prefix")]
    pub storage_key_prefix: String,

    /// Local cache TTL in seconds (default: 300 = 5 minutes)
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    /// Local cache capacity in entries (default: 100)
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,

    /// Sweep expired local entries every Nth cache request (default: 100)
    #[serde(default = "default_cache_sweep_interval")]
    pub cache_sweep_interval: u64,

    /// Maximum concurrent origin fetches (default: 10)
    #[serde(default = "default_max_concurrent_fetches")]
    pub max_concurrent_fetches: usize,

    /// How long a request may wait for an admission slot, in seconds
    /// (default: 10)
    #[serde(default = "default_queue_timeout_secs")]
    pub queue_timeout_secs: u64,

    /// Queued requests older than this at dequeue time are shed, in seconds
    /// (default: 15). Intentionally independent from queue_timeout_secs;
    /// see DESIGN.md.
    #[serde(default = "default_queue_staleness_secs")]
    pub queue_staleness_secs: u64,

    /// Capacity of the thumbnail transform-result cache (default: 100)
    #[serde(default = "default_cache_capacity")]
    pub transform_cache_capacity: usize,

    /// Request paths that are permanently retired and answer 410
    #[serde(default)]
    pub retired_paths: Vec<String>,

    /// Metrics endpoint configuration (optional)
    #[serde(default)]
    pub metrics_endpoint: Option<MetricsEndpointConfig>,
}

/// Configuration for the metrics HTTP endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricsEndpointConfig {
    /// Whether to enable the metrics endpoint (default: false)
    #[serde(default)]
    pub enabled: bool,

    /// Address to bind the metrics endpoint to (default: "127.0.0.1:9090")
    #[serde(default = "default_metrics_address")]
    pub address: String,
}

impl Default for MetricsEndpointConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address: default_metrics_address(),
        }
    }
}

// Default value functions for serde
fn default_listen_address() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_storage_key_prefix() -> String {
    "media".to_string()
}

fn default_cache_ttl_secs() -> u64 {
    300 // 5 minutes
}

fn default_cache_capacity() -> usize {
    100
}

fn default_cache_sweep_interval() -> u64 {
    100
}

fn default_max_concurrent_fetches() -> usize {
    10
}

fn default_queue_timeout_secs() -> u64 {
    10
}

fn default_queue_staleness_secs() -> u64 {
    15
}

fn default_metrics_address() -> String {
    "127.0.0.1:9090".to_string()
}

impl Default for EdgeConfig {
    fn default() -> Self {
        EdgeConfig {
            listen_address: default_listen_address(),
            object_store_url: None,
            legacy_origin_url: None,
            metadata_index_url: None,
            moderation_url: None,
            edge_cache_url: None,
            transform_url: None,
            storage_key_prefix: default_storage_key_prefix(),
            cache_ttl_secs: default_cache_ttl_secs(),
            cache_capacity: default_cache_capacity(),
            cache_sweep_interval: default_cache_sweep_interval(),
            max_concurrent_fetches: default_max_concurrent_fetches(),
            queue_timeout_secs: default_queue_timeout_secs(),
            queue_staleness_secs: default_queue_staleness_secs(),
            transform_cache_capacity: default_cache_capacity(),
            retired_paths: Vec::new(),
            metrics_endpoint: None,
        }
    }
}

impl EdgeConfig {
    /// Load configuration from a YAML file
    ///
    /// # Arguments
    /// * `path` - Path to the YAML configuration file
    ///
    /// # Returns
    /// * `Ok(EdgeConfig)` if loading and validation succeed
    /// * `Err(EdgeError)` if file cannot be read or config is invalid
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| EdgeError::ConfigError(format!("Failed to read config file: {}", e)))?;

        let config: EdgeConfig = serde_yaml::from_str(&content)
            .map_err(|e| EdgeError::ConfigError(format!("Failed to parse config file: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    ///
    /// # Validation Rules
    /// - cache_ttl_secs, cache_capacity and cache_sweep_interval must be > 0
    /// - max_concurrent_fetches must be > 0
    /// - queue_timeout_secs and queue_staleness_secs must be > 0
    /// - listen_address must not be empty
    pub fn validate(&self) -> Result<()> {
        if self.listen_address.is_empty() {
            return Err(EdgeError::ConfigError(
                "listen_address must not be empty".to_string(),
            ));
        }

        if self.cache_ttl_secs == 0 {
            return Err(EdgeError::ConfigError(
                "cache_ttl_secs must be greater than 0".to_string(),
            ));
        }

        if self.cache_capacity == 0 {
            return Err(EdgeError::ConfigError(
                "cache_capacity must be greater than 0".to_string(),
            ));
        }

        if self.cache_sweep_interval == 0 {
            return Err(EdgeError::ConfigError(
                "cache_sweep_interval must be greater than 0".to_string(),
            ));
        }

        if self.max_concurrent_fetches == 0 {
            return Err(EdgeError::ConfigError(
                "max_concurrent_fetches must be greater than 0".to_string(),
            ));
        }

        if self.queue_timeout_secs == 0 {
            return Err(EdgeError::ConfigError(
                "queue_timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self.queue_staleness_secs == 0 {
            return Err(EdgeError::ConfigError(
                "queue_staleness_secs must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Local cache TTL as a Duration
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// Admission queue wait timeout as a Duration
    pub fn queue_timeout(&self) -> Duration {
        Duration::from_secs(self.queue_timeout_secs)
    }

    /// Admission queue staleness bound as a Duration
    pub fn queue_staleness(&self) -> Duration {
        Duration::from_secs(self.queue_staleness_secs)
    }
}
