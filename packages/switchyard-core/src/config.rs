//! Engine and storage configuration.
//!
//! Loaded from environment variables, with defaults suitable for tests
//! (in-memory database, default user server).

use std::env;

use crate::error::{Error, Result};

/// Server suffix assumed for bare phone-number addresses.
pub const DEFAULT_USER_SERVER: &str = "s.whatsapp.net";

/// Default SQLite busy timeout in milliseconds.
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// Storage configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Path to the database file. None = in-memory only.
    pub database_path: Option<String>,
    /// How long SQLite waits on a locked database before the call fails
    /// with `StoreUnavailable`.
    pub busy_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
        }
    }
}

impl StoreConfig {
    /// Load configuration from environment variables.
    ///
    /// - `SWITCHYARD_DB`: database file path (unset = in-memory)
    /// - `SWITCHYARD_BUSY_TIMEOUT_MS`: busy timeout in milliseconds
    pub fn from_env() -> Result<Self> {
        let busy_timeout_ms = match env::var("SWITCHYARD_BUSY_TIMEOUT_MS") {
            Ok(raw) => raw.trim().parse::<u64>().map_err(|e| {
                Error::Config(format!("SWITCHYARD_BUSY_TIMEOUT_MS={:?}: {}", raw, e))
            })?,
            Err(_) => DEFAULT_BUSY_TIMEOUT_MS,
        };

        Ok(Self {
            database_path: env::var("SWITCHYARD_DB").ok().filter(|p| !p.trim().is_empty()),
            busy_timeout_ms,
        })
    }

    /// Whether this configuration points at a file on disk.
    pub fn is_persistent(&self) -> bool {
        self.database_path.is_some()
    }
}

/// Orchestrator configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Server used when an address arrives as a bare user (e.g. `+15551234567`).
    pub default_user_server: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_user_server: DEFAULT_USER_SERVER.to_string(),
        }
    }
}
