//! # Switchyard Core
//!
//! Identity and message correlation engine for a bridge between two
//! messaging platforms.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       SWITCHYARD CORE MODULES                           │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │   source-platform handler          destination-platform handler         │
//! │            │                                     │                      │
//! │            └──────────────┬──────────────────────┘                      │
//! │                           ▼                                             │
//! │               ┌───────────────────────┐                                 │
//! │               │   CorrelationEngine   │  keyed locks, routing           │
//! │               └───────────┬───────────┘                                 │
//! │                           │                                             │
//! │     ┌──────────────┬──────┴───────┬──────────────────┐                  │
//! │     ▼              ▼              ▼                  ▼                  │
//! │ ┌──────────┐ ┌───────────┐ ┌──────────────┐ ┌───────────────┐          │
//! │ │ Identity │ │  Threads  │ │ Correlation  │ │   Ephemeral   │          │
//! │ │          │ │           │ │              │ │               │          │
//! │ │ - merge  │ │ - 1:1     │ │ - upsert     │ │ - per chat    │          │
//! │ │ - fold   │ │ - reverse │ │ - both ways  │ │ - default off │          │
//! │ │ - names  │ │   lookup  │ │ - receipts   │ │               │          │
//! │ └────┬─────┘ └─────┬─────┘ └──────┬───────┘ └───────┬───────┘          │
//! │      └─────────────┴──────┬───────┴─────────────────┘                  │
//! │                           ▼                                             │
//! │               ┌───────────────────────┐                                 │
//! │               │   Storage (SQLite)    │  uniqueness lives here          │
//! │               └───────────────────────┘                                 │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Hierarchy
//!
//! - [`error`] - Error taxonomy shared by every operation
//! - [`config`] - Storage and engine configuration
//! - [`storage`] - SQLite persistence and schema
//! - [`identity`] - Logical contacts and source address parsing
//! - [`threads`] - Contact to destination thread bindings
//! - [`correlation`] - Source to destination message pairs
//! - [`ephemeral`] - Expiring-message policy per chat
//! - [`engine`] - The orchestrator the handlers call
//!
//! ## Example
//!
//! ```ignore
//! use switchyard_core::{CorrelationEngine, EngineConfig, StoreConfig, ThreadRoute};
//!
//! let engine = CorrelationEngine::open(&StoreConfig::from_env()?, EngineConfig::default()).await?;
//!
//! let thread = match engine.route_chat("+15551234567", Some("Alice"))? {
//!     ThreadRoute::Bound(binding) => binding.thread_handle,
//!     ThreadRoute::Unbound(contact) => {
//!         let handle = create_topic(&contact.display_label()).await?;
//!         engine.bind_chat("+15551234567", &handle)?.thread_handle
//!     }
//! };
//! engine.record_forward("wamsg1", "15551234567@s.whatsapp.net", "15551234567", &thread, 7)?;
//! ```

#![warn(rustdoc::missing_crate_level_docs)]

// ============================================================================
// MODULE DECLARATIONS
// ============================================================================

pub mod config;
pub mod correlation;
pub mod engine;
pub mod ephemeral;
pub mod error;
pub mod identity;
pub mod storage;
pub mod threads;
pub mod time;

// ============================================================================
// RE-EXPORTS
// ============================================================================

pub use config::{EngineConfig, StoreConfig};
pub use correlation::{CorrelationStore, DestinationRef, MessageCorrelation, SourceRef};
pub use engine::{ContactSnapshot, CorrelationEngine, EngineStats, SyncReport, ThreadRoute};
pub use ephemeral::{EphemeralPolicy, EphemeralStore};
pub use error::{Error, Result};
pub use identity::{
    AddressKind, DisplayNameField, DisplayNames, IdentityStore, LogicalContact, Resolution,
    SourceAddress,
};
pub use storage::Database;
pub use threads::{ThreadBinding, ThreadHandle, ThreadStore};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
