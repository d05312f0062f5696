//! Configuration loaded from environment variables.

use std::env;

use anyhow::{Context, Result};

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server port (default: 3000).
    pub port: u16,

    /// PostgreSQL connection URL.
    pub database_url: String,

    /// Maximum database connections in pool (default: 10).
    pub database_max_connections: u32,

    /// Statement timeout for listing queries in milliseconds (default: 15000).
    pub query_timeout_ms: u64,

    /// Page size limit for organization callers (default: 100).
    pub max_limit: u64,

    /// Page size limit for platform callers (default: 1000).
    pub platform_max_limit: u64,

    /// CORS allowed origins (comma-separated, default: "*").
    pub cors_allowed_origins: Vec<String>,
}

/// Runtime settings shared by request handlers through a
/// [`SnapshotStore`](crate::snapshot::SnapshotStore).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformSettings {
    pub max_limit: u64,
    pub platform_max_limit: u64,
    pub query_timeout_ms: u64,
}

impl Default for PlatformSettings {
    fn default() -> Self {
        Self {
            max_limit: 100,
            platform_max_limit: 1000,
            query_timeout_ms: 15_000,
        }
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, default: &str) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .with_context(|| format!("{name} must be a valid {}", std::any::type_name::<T>()))
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let port = parse_var("PORT", "3000")?;

        let database_url =
            env::var("DATABASE_URL").context("DATABASE_URL environment variable is required")?;

        let database_max_connections = parse_var("DATABASE_MAX_CONNECTIONS", "10")?;
        let query_timeout_ms = parse_var("QUERY_TIMEOUT_MS", "15000")?;
        let max_limit: u64 = parse_var("MAX_LIMIT", "100")?;
        let platform_max_limit: u64 = parse_var("PLATFORM_MAX_LIMIT", "1000")?;
        if max_limit == 0 || platform_max_limit < max_limit {
            anyhow::bail!("MAX_LIMIT must be positive and not above PLATFORM_MAX_LIMIT");
        }

        let cors_allowed_origins = env::var("CORS_ALLOWED_ORIGINS")
            .unwrap_or_else(|_| "*".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Self {
            port,
            database_url,
            database_max_connections,
            query_timeout_ms,
            max_limit,
            platform_max_limit,
            cors_allowed_origins,
        })
    }

    /// Initial runtime settings.
    pub fn platform_settings(&self) -> PlatformSettings {
        PlatformSettings {
            max_limit: self.max_limit,
            platform_max_limit: self.platform_max_limit,
            query_timeout_ms: self.query_timeout_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_match_documented_limits() {
        let settings = PlatformSettings::default();
        assert_eq!(settings.max_limit, 100);
        assert_eq!(settings.platform_max_limit, 1000);
        assert_eq!(settings.query_timeout_ms, 15_000);
    }
}
