use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Result;
use tracing::warn;

use crate::paths::database_file_path;
use crate::progress::WritePolicy;

pub const DEFAULT_BACKEND_URL: &str = "http://localhost:8000";
const DEFAULT_HTTP_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_CATALOG_ATTEMPTS: usize = 3;
const CATALOG_RETRY_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy)]
pub enum EnvKey {
    BackendUrl,
    DbPath,
    HttpTimeoutMs,
    CatalogAttempts,
    WritePolicy,
    Log,
}

impl EnvKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvKey::BackendUrl => "CINETRACK_BACKEND_URL",
            EnvKey::DbPath => "CINETRACK_DB_PATH",
            EnvKey::HttpTimeoutMs => "CINETRACK_HTTP_TIMEOUT_MS",
            EnvKey::CatalogAttempts => "CINETRACK_CATALOG_ATTEMPTS",
            EnvKey::WritePolicy => "CINETRACK_WRITE_POLICY",
            EnvKey::Log => "CINETRACK_LOG",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub backend_url: String,
    pub db_path: PathBuf,
    pub http_timeout: Duration,
    pub catalog_attempts: usize,
    pub catalog_retry_delay: Duration,
    pub write_policy: WritePolicy,
}

impl Settings {
    pub fn from_env(backend_override: Option<&str>) -> Result<Self> {
        let db_path = match lookup_env(EnvKey::DbPath) {
            Some(path) => PathBuf::from(path),
            None => database_file_path()?,
        };
        let mut settings = Self::from_lookup(lookup_env, db_path);
        if let Some(url) = backend_override.map(str::trim).filter(|url| !url.is_empty()) {
            settings.backend_url = normalize_base_url(url);
        }
        Ok(settings)
    }

    pub fn from_lookup<F>(lookup: F, db_path: PathBuf) -> Self
    where
        F: Fn(EnvKey) -> Option<String>,
    {
        let backend_url = lookup(EnvKey::BackendUrl)
            .map(|url| normalize_base_url(&url))
            .filter(|url| !url.is_empty())
            .unwrap_or_else(|| DEFAULT_BACKEND_URL.to_string());
        let timeout_ms = parsed_or(&lookup, EnvKey::HttpTimeoutMs, DEFAULT_HTTP_TIMEOUT_MS);
        let catalog_attempts = parsed_or(&lookup, EnvKey::CatalogAttempts, DEFAULT_CATALOG_ATTEMPTS);
        let write_policy = parsed_or(&lookup, EnvKey::WritePolicy, WritePolicy::default());

        Self {
            backend_url,
            db_path,
            http_timeout: Duration::from_millis(timeout_ms.max(1)),
            catalog_attempts: catalog_attempts.max(1),
            catalog_retry_delay: CATALOG_RETRY_DELAY,
            write_policy,
        }
    }
}

fn lookup_env(key: EnvKey) -> Option<String> {
    env::var(key.as_str()).ok().filter(|value| !value.trim().is_empty())
}

fn parsed_or<F, T>(lookup: &F, key: EnvKey, default: T) -> T
where
    F: Fn(EnvKey) -> Option<String>,
    T: FromStr,
{
    let Some(raw) = lookup(key) else {
        return default;
    };
    match raw.trim().parse::<T>() {
        Ok(value) => value,
        Err(_) => {
            warn!(key = key.as_str(), value = %raw, "ignoring malformed setting");
            default
        }
    }
}

pub fn normalize_base_url(raw: &str) -> String {
    raw.trim().trim_end_matches('/').to_string()
}
