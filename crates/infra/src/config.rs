//! Ledger store configuration.
//!
//! Built from environment variables, each with a default:
//!
//! | Variable | Default | Meaning |
//! |---|---|---|
//! | `CELLAR_LOCK_TIMEOUT_MS` | 250 | total time a commit may spend waiting for the write lock |
//! | `CELLAR_MAX_COMMIT_ATTEMPTS` | 8 | plan/commit rounds before giving up with `Contention` |
//! | `CELLAR_BACKOFF_BASE_MS` | 2 | first backoff step; doubles per retry |
//! | `CELLAR_JOURNAL_PATH` | unset | JSON-lines journal file; unset keeps the journal in memory |

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

pub const LOCK_TIMEOUT_VAR: &str = "CELLAR_LOCK_TIMEOUT_MS";
pub const MAX_COMMIT_ATTEMPTS_VAR: &str = "CELLAR_MAX_COMMIT_ATTEMPTS";
pub const BACKOFF_BASE_VAR: &str = "CELLAR_BACKOFF_BASE_MS";
pub const JOURNAL_PATH_VAR: &str = "CELLAR_JOURNAL_PATH";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var} must be a non-negative integer, got {value:?}")]
    NotANumber { var: &'static str, value: String },

    #[error("{var} must be at least {min}, got {value}")]
    TooSmall { var: &'static str, min: u64, value: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerConfig {
    pub lock_timeout: Duration,
    pub max_commit_attempts: u32,
    pub backoff_base: Duration,
    pub journal_path: Option<PathBuf>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_millis(250),
            max_commit_attempts: 8,
            backoff_base: Duration::from_millis(2),
            journal_path: None,
        }
    }
}

impl LedgerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from an arbitrary variable source (tests pass a map).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let lock_timeout = match number(&lookup, LOCK_TIMEOUT_VAR)? {
            Some(ms) => Duration::from_millis(ms),
            None => defaults.lock_timeout,
        };
        let max_commit_attempts = match number(&lookup, MAX_COMMIT_ATTEMPTS_VAR)? {
            Some(0) => {
                return Err(ConfigError::TooSmall {
                    var: MAX_COMMIT_ATTEMPTS_VAR,
                    min: 1,
                    value: 0,
                });
            }
            Some(n) => u32::try_from(n).unwrap_or(u32::MAX),
            None => defaults.max_commit_attempts,
        };
        let backoff_base = match number(&lookup, BACKOFF_BASE_VAR)? {
            Some(ms) => Duration::from_millis(ms),
            None => defaults.backoff_base,
        };
        let journal_path = lookup(JOURNAL_PATH_VAR)
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .map(PathBuf::from);

        Ok(Self {
            lock_timeout,
            max_commit_attempts,
            backoff_base,
            journal_path,
        })
    }

    pub fn with_journal_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.journal_path = Some(path.into());
        self
    }

    /// Backoff before retry number `attempt` (1-based), capped at the lock timeout.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.backoff_base.saturating_mul(factor).min(self.lock_timeout)
    }
}

fn number(lookup: &impl Fn(&str) -> Option<String>, var: &'static str) -> Result<Option<u64>, ConfigError> {
    match lookup(var) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| ConfigError::NotANumber { var, value: raw }),
    }
}
