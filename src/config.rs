use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::warn;

use crate::error::{Result, ParleyError};

pub const ENV_BACKEND_URL: &str = "PARLEY_BACKEND_URL";
pub const ENV_MODEL: &str = "PARLEY_MODEL";
pub const ENV_WORKERS: &str = "PARLEY_WORKERS";
pub const ENV_CACHE_MAX_ENTRIES: &str = "PARLEY_CACHE_MAX_ENTRIES";
pub const ENV_CACHE_TTL_SECS: &str = "PARLEY_CACHE_TTL_SECS";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub backend: BackendConfig,
    pub queue: QueueConfig,
    pub cache: CacheConfig,
    pub health: HealthConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Base URL of the OpenAI-compatible server (llama.cpp `llama-server`)
    pub endpoint: String,
    /// Model name sent with every request
    pub model: String,
    /// Upper bound for a single completion request
    pub request_timeout_secs: u64,
    /// Timeout for the `/v1/models` liveness probe
    pub health_timeout_ms: u64,
    pub temperature: f32,
    pub top_p: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Number of workers draining the priority queue
    pub workers: usize,
    /// How long an idle worker waits before re-checking for shutdown
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub max_entries: usize,
    pub ttl_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Lifetime of a shared health snapshot
    pub ttl_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the HTTP route layer listens on
    pub bind: String,
    /// Origins allowed by CORS
    pub allowed_origins: Vec<String>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:7001".to_string(),
            model: "llama".to_string(),
            request_timeout_secs: 30,
            health_timeout_ms: 1500,
            temperature: 0.1,
            top_p: 0.9,
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            poll_interval_ms: 200,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 2048,
            ttl_secs: 3600,
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self { ttl_ms: 2000 }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8001".to_string(),
            allowed_origins: vec![
                "http://localhost:5173".to_string(),
                "http://localhost:5174".to_string(),
            ],
        }
    }
}

impl BackendConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn health_timeout(&self) -> Duration {
        Duration::from_millis(self.health_timeout_ms.max(1))
    }
}

impl QueueConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl HealthConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ParleyError::Config(format!("Failed to read config file: {}", e)))?;

        let mut config: Config = toml::from_str(&content)
            .map_err(|e| ParleyError::Config(format!("Failed to parse config file: {}", e)))?;
        config.sanitize();
        Ok(config)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ParleyError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| ParleyError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// Apply `PARLEY_*` environment overrides on top of the loaded values.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    /// Override source is injected so tests don't touch the process environment.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_BACKEND_URL).filter(|v| !v.trim().is_empty()) {
            self.backend.endpoint = url.trim().trim_end_matches('/').to_string();
        }
        if let Some(model) = lookup(ENV_MODEL).filter(|v| !v.trim().is_empty()) {
            self.backend.model = model.trim().to_string();
        }
        if let Some(workers) = positive_override(&lookup, ENV_WORKERS) {
            self.queue.workers = workers as usize;
        }
        if let Some(max) = positive_override(&lookup, ENV_CACHE_MAX_ENTRIES) {
            self.cache.max_entries = max as usize;
        }
        if let Some(ttl) = positive_override(&lookup, ENV_CACHE_TTL_SECS) {
            self.cache.ttl_secs = ttl;
        }
        self.sanitize();
    }

    /// Zero workers or zero capacity would wedge the service; fall back to defaults.
    fn sanitize(&mut self) {
        if self.queue.workers == 0 {
            warn!("queue.workers must be positive, using {}", QueueConfig::default().workers);
            self.queue.workers = QueueConfig::default().workers;
        }
        if self.cache.max_entries == 0 {
            warn!("cache.max_entries must be positive, using {}", CacheConfig::default().max_entries);
            self.cache.max_entries = CacheConfig::default().max_entries;
        }
        if self.cache.ttl_secs == 0 {
            warn!("cache.ttl_secs must be positive, using {}", CacheConfig::default().ttl_secs);
            self.cache.ttl_secs = CacheConfig::default().ttl_secs;
        }
        self.backend.endpoint = self.backend.endpoint.trim_end_matches('/').to_string();
    }
}

fn positive_override<F>(lookup: &F, name: &str) -> Option<u64>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(name)?;
    match parse_positive(&raw) {
        Some(value) => Some(value),
        None => {
            warn!("Ignoring {}={:?}: expected a positive integer", name, raw);
            None
        }
    }
}

pub fn parse_positive(raw: &str) -> Option<u64> {
    raw.trim().parse::<u64>().ok().filter(|v| *v > 0)
}
