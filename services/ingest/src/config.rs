use anyhow::{Context, Result};

use crate::batch::{BATCH_SIZE, MAX_BATCH_SIZE};

/// Rejections listed to the operator before the rest are only counted
pub const ERROR_DISPLAY_LIMIT: usize = 500;

pub const MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

/// Process configuration, read from the environment (`.env` is loaded by
/// the binaries before this runs).
#[derive(Debug, Clone)]
pub struct Config {
    pub db_url: String,
    pub db_max_connections: u32,
    pub batch_size: usize,
    pub error_display_limit: usize,
    pub api_bind: String,
    pub max_upload_bytes: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            db_url: std::env::var("DB_URL").context("DB_URL env var missing")?,
            ..Self::defaults_from_env()
        })
    }

    /// Everything except the database URL, for runs that never connect
    pub fn defaults_from_env() -> Self {
        Self {
            db_url: String::new(),
            db_max_connections: env_or("DB_MAX_CONNECTIONS", 10),
            batch_size: env_or("INGEST_BATCH_SIZE", BATCH_SIZE).clamp(1, MAX_BATCH_SIZE),
            error_display_limit: env_or("ERROR_DISPLAY_LIMIT", ERROR_DISPLAY_LIMIT),
            api_bind: std::env::var("API_BIND").unwrap_or_else(|_| "127.0.0.1:8080".to_string()),
            max_upload_bytes: env_or("MAX_UPLOAD_BYTES", MAX_UPLOAD_BYTES),
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_or_falls_back_on_garbage() {
        std::env::set_var("INGEST_TEST_NUMBER", "not-a-number");
        assert_eq!(env_or("INGEST_TEST_NUMBER", 7usize), 7);
        std::env::set_var("INGEST_TEST_NUMBER", " 42 ");
        assert_eq!(env_or("INGEST_TEST_NUMBER", 7usize), 42);
        assert_eq!(env_or("INGEST_TEST_UNSET_KEY", 3u32), 3);
    }

    #[test]
    fn test_batch_size_capped() {
        std::env::set_var("INGEST_BATCH_SIZE", "100000");
        assert_eq!(Config::defaults_from_env().batch_size, MAX_BATCH_SIZE);
        std::env::set_var("INGEST_BATCH_SIZE", "0");
        assert_eq!(Config::defaults_from_env().batch_size, 1);
        std::env::set_var("INGEST_BATCH_SIZE", "250");
        assert_eq!(Config::defaults_from_env().batch_size, 250);
        std::env::remove_var("INGEST_BATCH_SIZE");
    }
}
