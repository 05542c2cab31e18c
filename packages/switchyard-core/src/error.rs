//! # Error Handling
//!
//! Error types for the correlation engine.
//!
//! ## Error Hierarchy
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           ERROR HIERARCHY                               │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Error (top-level)                                                     │
//! │  │                                                                      │
//! │  ├── Lookup Errors                                                     │
//! │  │   └── NotFound              - Expected miss, never logged as error  │
//! │  │                                                                      │
//! │  ├── Identity Errors                                                   │
//! │  │   ├── IdentityConflict      - Merge would overwrite a confirmed id  │
//! │  │   └── InvalidAddress        - Raw platform address is malformed     │
//! │  │                                                                      │
//! │  ├── Storage Errors                                                    │
//! │  │   └── StoreUnavailable      - Persistence failed or timed out       │
//! │  │                                                                      │
//! │  └── Internal Errors                                                   │
//! │      ├── InvariantViolation    - Defensive check failed                │
//! │      └── Config                - Invalid configuration                 │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The engine never retries. `StoreUnavailable` is the only recoverable
//! error; callers retry it with backoff. Everything else is a data condition
//! the caller has to decide about.

use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the correlation engine
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Lookup Errors (100-199)
    // ========================================================================

    /// A lookup that the operation depends on found nothing
    #[error("Not found: {0}")]
    NotFound(String),

    // ========================================================================
    // Identity Errors (200-299)
    // ========================================================================

    /// Resolving or learning an identifier would overwrite a confirmed,
    /// differing identifier on an existing contact
    #[error("Identity conflict: {0}")]
    IdentityConflict(String),

    /// A raw source-platform address could not be parsed
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    // ========================================================================
    // Storage Errors (400-499)
    // ========================================================================

    /// The persistence layer failed or timed out
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    // ========================================================================
    // Internal Errors (900-999)
    // ========================================================================

    /// A defensive check failed (e.g. a contact with no identifier)
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Invalid configuration value
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Get the numeric error code
    ///
    /// Error codes are organized by category:
    /// - 100-199: Lookups
    /// - 200-299: Identity
    /// - 400-499: Storage
    /// - 900-999: Internal
    pub fn code(&self) -> i32 {
        match self {
            Error::NotFound(_) => 100,

            Error::IdentityConflict(_) => 200,
            Error::InvalidAddress(_) => 201,

            Error::StoreUnavailable(_) => 400,

            Error::InvariantViolation(_) => 900,
            Error::Config(_) => 901,
        }
    }

    /// Check if this error is recoverable
    ///
    /// Only persistence failures are worth retrying; the caller owns the
    /// backoff policy.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::StoreUnavailable(_))
    }

    /// Check if this is the expected "nothing there" outcome
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

// ============================================================================
// ERROR CONVERSIONS
// ============================================================================

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, _)
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Error::InvariantViolation(err.to_string())
            }
            rusqlite::Error::QueryReturnedNoRows => Error::NotFound(err.to_string()),
            _ => Error::StoreUnavailable(err.to_string()),
        }
    }
}

/// True when a rusqlite error is a UNIQUE / PRIMARY KEY violation.
pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(e, _) => {
            e.code == rusqlite::ErrorCode::ConstraintViolation
                && matches!(
                    e.extended_code,
                    rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                        | rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                )
        }
        _ => false,
    }
}

// ============================================================================
// TESTS
// ============================================================================
