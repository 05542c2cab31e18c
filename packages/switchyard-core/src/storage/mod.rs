//! # Storage Module
//!
//! Durable home of the four correlation tables.
//!
//! ## Storage Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         STORAGE SYSTEM                                  │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │  SQLite Database (single connection, WAL on disk)               │   │
//! │  │  ──────────────────────────────────────────────                  │   │
//! │  │                                                                 │   │
//! │  │  Tables:                                                       │   │
//! │  │  • contacts - One row per logical contact, both identifiers    │   │
//! │  │  • thread_bindings - Contact <-> destination thread, 1:1       │   │
//! │  │  • message_pairs - Source message <-> destination message      │   │
//! │  │  • ephemeral_settings - Expiring-message policy per chat       │   │
//! │  │                                                                 │   │
//! │  │  Uniqueness is enforced by the schema, so a racing writer      │   │
//! │  │  loses with a constraint error instead of writing a duplicate. │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

mod database;
mod schema;

pub use database::{
    ContactRecord, Database, EphemeralRecord, MessagePairRecord, StoreTx, ThreadBindingRecord,
};

use crate::config::StoreConfig;
use crate::error::Result;

/// Initialize the storage system
pub async fn init(config: &StoreConfig) -> Result<Database> {
    let db = Database::open_with_config(config).await?;
    tracing::info!(
        persistent = config.is_persistent(),
        busy_timeout_ms = config.busy_timeout_ms,
        "Storage initialized"
    );
    Ok(db)
}
