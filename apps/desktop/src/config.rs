//! Client configuration from the environment.

use crate::session::{SessionConfig, DEFAULT_ROTATION_DELAY};
use crate::sync::{HttpRemote, NullRemote, RemoteStore, RetryPolicy};
use helix_core::SeedPolicy;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key} must be a non-negative integer, got {value:?}")]
    InvalidNumber { key: &'static str, value: String },

    #[error("HELIX_SEED_SKIP must be 1 or 3, got {0:?}")]
    InvalidSeedSkip(String),
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Remote sync is disabled when unset.
    pub backend_url: Option<String>,
    pub auth_token: Option<String>,
    pub db_path: PathBuf,
    pub retry: RetryPolicy,
    pub rotation_delay: Duration,
    pub seed_policy: SeedPolicy,
}

/// Default database location under the platform data directory.
pub fn default_db_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("helix")
        .join("helix.db")
}

impl ClientConfig {
    /// Read `HELIX_*` variables, after loading a `.env` file if present.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = RetryPolicy::default();

        let retry = RetryPolicy {
            max_attempts: parse_or(&var, "HELIX_SYNC_MAX_ATTEMPTS", defaults.max_attempts)?,
            initial_backoff: millis_or(&var, "HELIX_SYNC_INITIAL_BACKOFF_MS", defaults.initial_backoff)?,
            max_backoff: millis_or(&var, "HELIX_SYNC_MAX_BACKOFF_MS", defaults.max_backoff)?,
            attempt_timeout: millis_or(&var, "HELIX_SYNC_TIMEOUT_MS", defaults.attempt_timeout)?,
        };

        let seed_policy = match var("HELIX_SEED_SKIP").as_deref().map(str::trim) {
            None | Some("1") => SeedPolicy::StartAtOne,
            Some("3") => SeedPolicy::StartAtThree,
            Some(other) => return Err(ConfigError::InvalidSeedSkip(other.to_string())),
        };

        Ok(Self {
            backend_url: var("HELIX_BACKEND_URL"),
            auth_token: var("HELIX_AUTH_TOKEN"),
            db_path: var("HELIX_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(default_db_path),
            retry,
            rotation_delay: millis_or(&var, "HELIX_ROTATION_DELAY_MS", DEFAULT_ROTATION_DELAY)?,
            seed_policy,
        })
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            rotation_delay: self.rotation_delay,
            seed_policy: self.seed_policy,
            auto_sync: true,
            retry: self.retry.clone(),
        }
    }

    /// HTTP remote when a backend is configured, otherwise local-only.
    pub fn remote(&self) -> Arc<dyn RemoteStore> {
        match &self.backend_url {
            Some(url) => Arc::new(HttpRemote::new(url, self.auth_token.clone())),
            None => Arc::new(NullRemote),
        }
    }
}

fn parse_or<T, F>(var: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match var(key) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidNumber { key, value }),
        None => Ok(default),
    }
}

fn millis_or<F>(var: &F, key: &'static str, default: Duration) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let default_ms = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
    parse_or(var, key, default_ms).map(Duration::from_millis)
}
