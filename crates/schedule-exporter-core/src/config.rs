//! Runtime configuration read from environment variables.
//!
//! | Variable             | Default                  | Meaning                              |
//! |----------------------|--------------------------|--------------------------------------|
//! | `CACHE_ADDR`         | `memory`                 | `memory`, `file` or `file:<dir>`     |
//! | `CACHE_TTL`          | `1800`                   | Snapshot lifetime in seconds, <= 7 d |
//! | `FETCH_MAX_RETRIES`  | `3`                      | Attempts per portal call             |
//! | `FETCH_BACKOFF_BASE` | `500`                    | First retry delay in milliseconds    |
//! | `PORTAL_URL`         | `http://127.0.0.1:9000`  | Base URL of the portal gateway       |
//! | `SECRET_KEY`         | (none)                   | Key material for client tokens       |
//! | `BIND_ADDR`          | `0.0.0.0:8000`           | Server listen address                |
//! | `LOG_DIR`            | (none)                   | Enables daily rolling log files      |

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};

use crate::cache::{CacheStore, FileStore, MemoryStore};
use crate::retry::RetryPolicy;

/// Application name used for the default cache directory
const APP_NAME: &str = "schedule-exporter";

const DEFAULT_CACHE_TTL_SECS: u64 = 1800;
const MAX_CACHE_TTL_SECS: u64 = 7 * 24 * 60 * 60;
const DEFAULT_FETCH_MAX_RETRIES: u32 = 3;
const DEFAULT_FETCH_BACKOFF_BASE_MS: u64 = 500;
const DEFAULT_PORTAL_URL: &str = "http://127.0.0.1:9000";
const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8000";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheBackend {
    Memory,
    /// JSON files under the given directory; `None` means the user cache directory.
    File(Option<PathBuf>),
}

impl FromStr for CacheBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        match s {
            "" | "memory" => Ok(CacheBackend::Memory),
            "file" => Ok(CacheBackend::File(None)),
            _ => match s.strip_prefix("file:") {
                Some(path) if !path.is_empty() => {
                    Ok(CacheBackend::File(Some(PathBuf::from(path))))
                }
                _ => Err(anyhow!(
                    "Unsupported CACHE_ADDR '{}' (expected memory, file or file:<dir>)",
                    s
                )),
            },
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct Config {
    pub cache: CacheBackend,
    pub cache_ttl: Duration,
    pub fetch_max_retries: u32,
    pub fetch_backoff_base: Duration,
    pub portal_url: String,
    pub secret_key: Option<String>,
    pub bind_addr: String,
    pub log_dir: Option<PathBuf>,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("cache", &self.cache)
            .field("cache_ttl", &self.cache_ttl)
            .field("fetch_max_retries", &self.fetch_max_retries)
            .field("fetch_backoff_base", &self.fetch_backoff_base)
            .field("portal_url", &self.portal_url)
            .field("secret_key", &self.secret_key.as_ref().map(|_| "<redacted>"))
            .field("bind_addr", &self.bind_addr)
            .field("log_dir", &self.log_dir)
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache: CacheBackend::Memory,
            cache_ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECS),
            fetch_max_retries: DEFAULT_FETCH_MAX_RETRIES,
            fetch_backoff_base: Duration::from_millis(DEFAULT_FETCH_BACKOFF_BASE_MS),
            portal_url: DEFAULT_PORTAL_URL.to_string(),
            secret_key: None,
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            log_dir: None,
        }
    }
}

fn parse_number<T: FromStr>(name: &str, value: &str) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .trim()
        .parse()
        .with_context(|| format!("Invalid {} '{}'", name, value))
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build a config from `lookup`, which maps a variable name to its value.
    /// Unset and empty variables take their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(v) = get("CACHE_ADDR") {
            config.cache = v.parse()?;
        }
        if let Some(v) = get("CACHE_TTL") {
            let secs: u64 = parse_number("CACHE_TTL", &v)?;
            if secs == 0 {
                return Err(anyhow!("CACHE_TTL must be positive"));
            }
            if secs > MAX_CACHE_TTL_SECS {
                return Err(anyhow!(
                    "CACHE_TTL must be at most {} seconds, got {}",
                    MAX_CACHE_TTL_SECS,
                    secs
                ));
            }
            config.cache_ttl = Duration::from_secs(secs);
        }
        if let Some(v) = get("FETCH_MAX_RETRIES") {
            config.fetch_max_retries = parse_number("FETCH_MAX_RETRIES", &v)?;
        }
        if let Some(v) = get("FETCH_BACKOFF_BASE") {
            let millis: u64 = parse_number("FETCH_BACKOFF_BASE", &v)?;
            config.fetch_backoff_base = Duration::from_millis(millis);
        }
        if let Some(v) = get("PORTAL_URL") {
            config.portal_url = v.trim().trim_end_matches('/').to_string();
        }
        config.secret_key = get("SECRET_KEY");
        if let Some(v) = get("BIND_ADDR") {
            config.bind_addr = v.trim().to_string();
        }
        config.log_dir = get("LOG_DIR").map(PathBuf::from);

        Ok(config)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.fetch_max_retries, self.fetch_backoff_base)
    }

    /// TTL as the chrono duration the cache works in.
    pub fn cache_ttl(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.cache_ttl).unwrap_or(chrono::Duration::MAX)
    }

    pub fn secret_key(&self) -> Result<&str> {
        self.secret_key
            .as_deref()
            .ok_or_else(|| anyhow!("SECRET_KEY must be set"))
    }

    /// Open the configured cache store.
    pub fn open_store(&self) -> Result<Arc<dyn CacheStore>> {
        match &self.cache {
            CacheBackend::Memory => Ok(Arc::new(MemoryStore::new())),
            CacheBackend::File(dir) => {
                let dir = match dir {
                    Some(dir) => dir.clone(),
                    None => dirs::cache_dir()
                        .ok_or_else(|| anyhow!("Could not find cache directory"))?
                        .join(APP_NAME),
                };
                Ok(Arc::new(FileStore::new(dir)?))
            }
        }
    }
}
