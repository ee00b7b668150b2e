//! Configuration
//!
//! CLI arguments and environment variable handling using clap.

use clap::Parser;
use std::net::SocketAddr;
use std::time::Duration;

use crate::cache::EvictionMode;

/// Vidgate - caching proxy for video metadata and payloads
#[derive(Parser, Debug, Clone)]
#[command(name = "vidgate")]
#[command(about = "Caching metadata and payload proxy for federated video instances")]
pub struct Args {
    /// Address to listen on
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:3000")]
    pub listen: SocketAddr,

    /// API key required by the cache-clear endpoint
    #[arg(long, env = "API_KEY", default_value = "itsme")]
    pub api_key: String,

    /// Path of the SQLite metadata database
    #[arg(long, env = "DB_PATH", default_value = "cache.sqlite")]
    pub db_path: String,

    /// Instance directory endpoint (JSON list of reachable instances)
    #[arg(
        long,
        env = "DIRECTORY_ENDPOINT",
        default_value = "https://api.invidious.io/instances.json?sort_by=api,type"
    )]
    pub directory_endpoint: String,

    /// TTL for negative lookup memoization, in seconds
    #[arg(long, env = "CACHE_TTL_SECS", default_value = "300")]
    pub cache_ttl_secs: u64,

    /// TTL for in-memory payload buffers, in seconds
    #[arg(long, env = "BUFFER_TTL_SECS", default_value = "300")]
    pub buffer_ttl_secs: u64,

    /// How long a failing instance stays blacklisted, in seconds
    #[arg(long, env = "BLACKLIST_TTL_SECS", default_value = "600")]
    pub blacklist_ttl_secs: u64,

    /// Background sweep interval for TTL caches, in seconds
    #[arg(long, env = "CLEANUP_INTERVAL_SECS", default_value = "60")]
    pub cleanup_interval_secs: u64,

    /// Eviction strategy for TTL caches: "lazy" or "background"
    #[arg(long, env = "EVICTION_MODE", default_value = "background")]
    pub eviction_mode: String,

    /// Hard ceiling on proxied payload size, in bytes
    #[arg(long, env = "MAX_PAYLOAD_BYTES", default_value = "20000000")]
    pub max_payload_bytes: u64,

    /// Upstream request timeout in milliseconds
    #[arg(long, env = "REQUEST_TIMEOUT_MS", default_value = "10000")]
    pub request_timeout_ms: u64,

    /// Maximum instance rotations per metadata resolution
    #[arg(long, env = "MAX_RESOLVE_ATTEMPTS", default_value = "3")]
    pub max_resolve_attempts: u32,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Args {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn buffer_ttl(&self) -> Duration {
        Duration::from_secs(self.buffer_ttl_secs)
    }

    pub fn blacklist_ttl(&self) -> Duration {
        Duration::from_secs(self.blacklist_ttl_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn eviction(&self) -> EvictionMode {
        match self.eviction_mode.as_str() {
            "lazy" => EvictionMode::Lazy,
            _ => EvictionMode::Background,
        }
    }

    /// Validate configuration consistency
    pub fn validate(&self) -> Result<(), String> {
        if self.max_payload_bytes == 0 {
            return Err("MAX_PAYLOAD_BYTES must be greater than zero".to_string());
        }
        if self.max_resolve_attempts == 0 {
            return Err("MAX_RESOLVE_ATTEMPTS must be at least 1".to_string());
        }
        if self.cleanup_interval_secs == 0 {
            return Err("CLEANUP_INTERVAL_SECS must be greater than zero".to_string());
        }
        match self.eviction_mode.as_str() {
            "lazy" | "background" => {}
            other => {
                return Err(format!(
                    "EVICTION_MODE must be \"lazy\" or \"background\", got \"{}\"",
                    other
                ));
            }
        }
        if !self.directory_endpoint.starts_with("http") {
            return Err(format!(
                "DIRECTORY_ENDPOINT must be an http(s) URL, got \"{}\"",
                self.directory_endpoint
            ));
        }
        Ok(())
    }
}
