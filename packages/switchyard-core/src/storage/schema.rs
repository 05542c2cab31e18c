//! # Database Schema
//!
//! SQL schema definitions for the correlation database.
//!
//! ## Schema Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         DATABASE SCHEMA                                 │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌─────────────────┐    ┌─────────────────┐                             │
//! │  │    contacts     │    │ thread_bindings │                             │
//! │  ├─────────────────┤    ├─────────────────┤                             │
//! │  │ id              │◄───│ contact_id  (U) │                             │
//! │  │ primary_id  (U) │    │ thread_handle(U)│                             │
//! │  │ secondary_id(U) │    │ created_at      │                             │
//! │  │ short_name      │    │ updated_at      │                             │
//! │  │ full_name       │    └─────────────────┘                             │
//! │  │ push_name       │                                                    │
//! │  │ business_name   │    ┌──────────────────────┐  ┌──────────────────┐  │
//! │  │ created_at      │    │    message_pairs     │  │ephemeral_settings│  │
//! │  │ updated_at      │    ├──────────────────────┤  ├──────────────────┤  │
//! │  └─────────────────┘    │ source_msg_id   (PK) │  │ chat_id     (PK) │  │
//! │                         │ source_chat_id  (PK) │  │ enabled          │  │
//! │                         │ participant_id       │  │ timer_secs       │  │
//! │                         │ dest_thread     (IX) │  │ updated_at       │  │
//! │                         │ dest_msg_id     (IX) │  └──────────────────┘  │
//! │                         │ read                 │                        │
//! │                         └──────────────────────┘                        │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// SQL to create all tables
pub const CREATE_TABLES: &str = r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY
);

-- Logical contacts
-- One row per real-world contact, whichever identifiers are known so far.
-- NULLs do not collide under UNIQUE, so a half-known contact is fine.
CREATE TABLE IF NOT EXISTS contacts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    -- Long-lived public address (phone-number derived)
    primary_id TEXT UNIQUE,
    -- Privacy-preserving alias address
    secondary_id TEXT UNIQUE,
    -- Display names, each independently optional, last writer wins
    short_name TEXT,
    full_name TEXT,
    push_name TEXT,
    business_name TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    CONSTRAINT has_identifier CHECK (primary_id IS NOT NULL OR secondary_id IS NOT NULL)
);

-- Thread bindings
-- Exactly one destination thread per contact, indexed both ways.
CREATE TABLE IF NOT EXISTS thread_bindings (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    contact_id INTEGER NOT NULL UNIQUE,
    thread_handle TEXT NOT NULL UNIQUE,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    FOREIGN KEY (contact_id) REFERENCES contacts(id)
);

-- Message pairs
-- Source message ids are only unique within their chat.
CREATE TABLE IF NOT EXISTS message_pairs (
    source_msg_id TEXT NOT NULL,
    source_chat_id TEXT NOT NULL,
    participant_id TEXT NOT NULL,
    dest_thread TEXT NOT NULL,
    dest_msg_id INTEGER NOT NULL,
    -- Has the source side been sent a read receipt?
    read INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    PRIMARY KEY (source_msg_id, source_chat_id)
);
CREATE INDEX IF NOT EXISTS idx_message_pairs_dest ON message_pairs(dest_thread, dest_msg_id);
CREATE INDEX IF NOT EXISTS idx_message_pairs_unread ON message_pairs(source_chat_id, read);

-- Ephemeral (expiring message) settings per source chat
-- Absent row means disabled with timer 0.
CREATE TABLE IF NOT EXISTS ephemeral_settings (
    chat_id TEXT PRIMARY KEY,
    enabled INTEGER NOT NULL DEFAULT 0,
    timer_secs INTEGER NOT NULL DEFAULT 0,
    updated_at INTEGER NOT NULL
);
"#;
