//! Runtime tuning, optionally loaded from the environment.

use std::time::Duration;

use anyhow::{Context, Result};
use fromenv::FromEnv;

const DEFAULT_HASH_JOIN_THRESHOLD: usize = 15;
const DEFAULT_INSERT_CHUNK_SIZE: usize = 1000;

/// Runtime tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    /// Parent count from which eager loading switches from the comparator
    /// join to the hash join.
    pub hash_join_threshold: usize,
    /// Maximum rows per multi-row `INSERT`.
    pub insert_chunk_size: usize,
    /// Abort a round-trip after this long with
    /// [`Error::Cancelled`](crate::Error::Cancelled).
    pub statement_timeout: Option<Duration>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            hash_join_threshold: DEFAULT_HASH_JOIN_THRESHOLD,
            insert_chunk_size: DEFAULT_INSERT_CHUNK_SIZE,
            statement_timeout: None,
        }
    }
}

#[derive(Debug, Clone, FromEnv)]
pub struct EnvOptions {
    #[env(from = "RELMAP_HASH_JOIN_THRESHOLD", default = "15")]
    pub hash_join_threshold: String,
    #[env(from = "RELMAP_INSERT_CHUNK_SIZE", default = "1000")]
    pub insert_chunk_size: String,
    #[env(from = "RELMAP_STATEMENT_TIMEOUT_MS", default = "0")]
    pub statement_timeout_ms: String,
}

impl Options {
    /// Load options from `RELMAP_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error when a variable is set but does not parse.
    pub fn from_env() -> Result<Self> {
        let env = EnvOptions::from_env().finalize().context("issue loading relmap options")?;
        Self::parse(&env)
    }

    fn parse(env: &EnvOptions) -> Result<Self> {
        let hash_join_threshold = env
            .hash_join_threshold
            .trim()
            .parse()
            .context("RELMAP_HASH_JOIN_THRESHOLD must be a non-negative integer")?;
        let insert_chunk_size = env
            .insert_chunk_size
            .trim()
            .parse::<usize>()
            .context("RELMAP_INSERT_CHUNK_SIZE must be a positive integer")?
            .max(1);
        let timeout_ms: u64 = env
            .statement_timeout_ms
            .trim()
            .parse()
            .context("RELMAP_STATEMENT_TIMEOUT_MS must be a number of milliseconds")?;

        Ok(Self {
            hash_join_threshold,
            insert_chunk_size,
            statement_timeout: (timeout_ms > 0).then(|| Duration::from_millis(timeout_ms)),
        })
    }
}
