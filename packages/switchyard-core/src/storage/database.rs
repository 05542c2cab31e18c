//! # Database
//!
//! SQLite database wrapper for the correlation tables.
//!
//! ## Database Operations
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      DATABASE OPERATIONS                                │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌─────────────────┐                                                   │
//! │  │  Stores/Engine  │                                                   │
//! │  └────────┬────────┘                                                   │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  ┌─────────────────┐                                                   │
//! │  │    Database     │  High-level API                                   │
//! │  │   (this file)   │  - Single-statement reads/writes                  │
//! │  │                 │  - transaction() for read-then-write work         │
//! │  └────────┬────────┘                                                   │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  ┌─────────────────┐                                                   │
//! │  │    StoreTx      │  Row-level SQL over a borrowed connection         │
//! │  │                 │  - Used inside and outside transactions           │
//! │  └────────┬────────┘                                                   │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  ┌─────────────────┐                                                   │
//! │  │   SQLite DB     │  Storage                                          │
//! │  │   (file or      │  - In-memory for tests                            │
//! │  │    memory)      │  - File (WAL) for production                      │
//! │  └─────────────────┘                                                   │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use std::sync::Arc;
use std::time::Duration;

use super::schema;
use crate::config::StoreConfig;
use crate::error::{is_unique_violation, Error, Result};

/// Attach context to a rusqlite error while keeping its classification.
fn failed(context: &str, err: rusqlite::Error) -> Error {
    match Error::from(err) {
        Error::StoreUnavailable(m) => Error::StoreUnavailable(format!("{}: {}", context, m)),
        Error::InvariantViolation(m) => Error::InvariantViolation(format!("{}: {}", context, m)),
        Error::NotFound(m) => Error::NotFound(format!("{}: {}", context, m)),
        other => other,
    }
}

/// The main database handle
///
/// This wraps a SQLite connection and provides high-level methods for the
/// four correlation tables. Every method holds the connection lock for the
/// duration of one call, so each call is atomic with respect to the others.
pub struct Database {
    /// The underlying SQLite connection
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create a database
    ///
    /// If path is None, creates an in-memory database (useful for testing).
    pub async fn open(path: Option<&str>) -> Result<Self> {
        let config = StoreConfig {
            database_path: path.map(|p| p.to_string()),
            ..StoreConfig::default()
        };
        Self::open_with_config(&config).await
    }

    /// Open or create a database using a full storage configuration
    pub async fn open_with_config(config: &StoreConfig) -> Result<Self> {
        let conn = match config.database_path.as_deref() {
            Some(p) => Connection::open(p)
                .map_err(|e| failed("Failed to open database", e))?,
            None => Connection::open_in_memory()
                .map_err(|e| failed("Failed to create in-memory database", e))?,
        };

        conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))
            .map_err(|e| failed("Failed to set busy timeout", e))?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(|e| failed("Failed to enable foreign keys", e))?;
        if config.is_persistent() {
            conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))
                .map_err(|e| failed("Failed to enable WAL", e))?;
        }

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        // Initialize schema
        db.init_schema()?;

        Ok(db)
    }

    /// Initialize the database schema
    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock();

        // Check current schema version
        let version: Option<i32> = conn
            .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| row.get(0))
            .ok();

        match version {
            None => {
                // Fresh database, create all tables
                conn.execute_batch(schema::CREATE_TABLES)
                    .map_err(|e| failed("Failed to create tables", e))?;

                conn.execute(
                    "INSERT INTO schema_version (version) VALUES (?)",
                    params![schema::SCHEMA_VERSION],
                )
                .map_err(|e| failed("Failed to set schema version", e))?;

                tracing::info!("Database schema created (version {})", schema::SCHEMA_VERSION);
            }
            Some(v) if v > schema::SCHEMA_VERSION => {
                return Err(Error::InvariantViolation(format!(
                    "database schema version {} is newer than supported version {}",
                    v,
                    schema::SCHEMA_VERSION
                )));
            }
            Some(v) => {
                tracing::debug!("Database schema version: {}", v);
            }
        }

        Ok(())
    }

    /// Run `f` inside one IMMEDIATE transaction.
    ///
    /// The connection lock is held for the whole closure, and the write lock
    /// is taken up front, so read-then-write sequences cannot interleave with
    /// another writer. Returning `Err` rolls everything back.
    pub fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&StoreTx<'_>) -> Result<T>,
    {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| failed("Failed to begin transaction", e))?;

        let out = f(&StoreTx::new(&tx))?;

        tx.commit().map_err(|e| failed("Failed to commit transaction", e))?;
        Ok(out)
    }

    /// Run a read or single write against the connection without a
    /// transaction.
    fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&StoreTx<'_>) -> Result<T>,
    {
        let conn = self.conn.lock();
        f(&StoreTx::new(&conn))
    }

    // ========================================================================
    // CONTACT OPERATIONS
    // ========================================================================

    /// Get a contact by surrogate ID
    pub fn get_contact(&self, id: i64) -> Result<Option<ContactRecord>> {
        self.with_conn(|tx| tx.contact_by_id(id))
    }

    /// Get a contact whose primary or secondary identifier equals `identifier`
    pub fn find_contact_by_either(&self, identifier: &str) -> Result<Option<ContactRecord>> {
        self.with_conn(|tx| tx.contact_by_either(identifier))
    }

    /// Contact whose primary identifier is exactly `primary_id`
    pub fn find_contact_by_primary(&self, primary_id: &str) -> Result<Option<ContactRecord>> {
        self.with_conn(|tx| tx.contact_by_primary(primary_id))
    }

    /// Contact whose secondary identifier is exactly `secondary_id`
    pub fn find_contact_by_secondary(&self, secondary_id: &str) -> Result<Option<ContactRecord>> {
        self.with_conn(|tx| tx.contact_by_secondary(secondary_id))
    }

    /// Case-insensitive substring search over the name columns
    pub fn search_contacts(&self, query: &str, limit: usize) -> Result<Vec<ContactRecord>> {
        let pattern = format!("%{}%", escape_like(&query.to_lowercase()));
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM contacts
                 WHERE LOWER(COALESCE(short_name, '')) LIKE ?1 ESCAPE '\\'
                    OR LOWER(COALESCE(full_name, '')) LIKE ?1 ESCAPE '\\'
                    OR LOWER(COALESCE(push_name, '')) LIKE ?1 ESCAPE '\\'
                    OR LOWER(COALESCE(business_name, '')) LIKE ?1 ESCAPE '\\'
                 ORDER BY id LIMIT ?2",
                CONTACT_COLUMNS
            ))
            .map_err(|e| failed("Failed to prepare query", e))?;

        let rows = stmt
            .query_map(params![pattern, limit as i64], contact_from_row)
            .map_err(|e| failed("Failed to search contacts", e))?;

        let mut contacts = Vec::new();
        for row in rows {
            contacts.push(row.map_err(|e| failed("Failed to read contact", e))?);
        }
        Ok(contacts)
    }

    /// Get all contacts ordered by surrogate ID
    pub fn get_all_contacts(&self) -> Result<Vec<ContactRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(&format!("SELECT {} FROM contacts ORDER BY id", CONTACT_COLUMNS))
            .map_err(|e| failed("Failed to prepare query", e))?;

        let rows = stmt
            .query_map([], contact_from_row)
            .map_err(|e| failed("Failed to query contacts", e))?;

        let mut contacts = Vec::new();
        for row in rows {
            contacts.push(row.map_err(|e| failed("Failed to read contact", e))?);
        }
        Ok(contacts)
    }

    /// Overwrite the given name columns on one contact
    pub fn update_contact_names(&self, id: i64, names: &[(&'static str, &str)]) -> Result<bool> {
        self.with_conn(|tx| tx.update_contact_names(id, names))
    }

    /// Number of contacts
    pub fn count_contacts(&self) -> Result<i64> {
        self.with_conn(|tx| tx.count("contacts"))
    }

    // ========================================================================
    // THREAD BINDING OPERATIONS
    // ========================================================================

    /// Get the binding owned by a contact
    pub fn get_binding_by_contact(&self, contact_id: i64) -> Result<Option<ThreadBindingRecord>> {
        self.with_conn(|tx| tx.binding_by_contact(contact_id))
    }

    /// Get the binding for a destination thread handle
    pub fn get_binding_by_handle(&self, handle: &str) -> Result<Option<ThreadBindingRecord>> {
        self.with_conn(|tx| tx.binding_by_handle(handle))
    }

    /// Remove the binding for a destination thread handle
    pub fn delete_binding_by_handle(&self, handle: &str) -> Result<bool> {
        self.with_conn(|tx| {
            let rows = tx
                .conn
                .execute("DELETE FROM thread_bindings WHERE thread_handle = ?", params![handle])
                .map_err(|e| failed("Failed to delete thread binding", e))?;
            Ok(rows > 0)
        })
    }

    /// Get all bindings ordered by surrogate ID
    pub fn get_all_bindings(&self) -> Result<Vec<ThreadBindingRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(&format!("SELECT {} FROM thread_bindings ORDER BY id", BINDING_COLUMNS))
            .map_err(|e| failed("Failed to prepare query", e))?;

        let rows = stmt
            .query_map([], binding_from_row)
            .map_err(|e| failed("Failed to query thread bindings", e))?;

        let mut bindings = Vec::new();
        for row in rows {
            bindings.push(row.map_err(|e| failed("Failed to read thread binding", e))?);
        }
        Ok(bindings)
    }

    /// Number of bindings
    pub fn count_bindings(&self) -> Result<i64> {
        self.with_conn(|tx| tx.count("thread_bindings"))
    }

    // ========================================================================
    // MESSAGE PAIR OPERATIONS
    // ========================================================================

    /// Insert or update the pair keyed by (source message, source chat).
    ///
    /// The read flag is only set on insert. An update that changes nothing
    /// leaves the row untouched, `updated_at` included. Returns true when a
    /// new row was inserted.
    pub fn upsert_message_pair(
        &self,
        source_msg_id: &str,
        source_chat_id: &str,
        participant_id: &str,
        dest_thread: &str,
        dest_msg_id: i64,
    ) -> Result<bool> {
        let conn = self.conn.lock();
        let now = crate::time::now_timestamp();

        let existed = conn
            .query_row(
                "SELECT 1 FROM message_pairs WHERE source_msg_id = ? AND source_chat_id = ?",
                params![source_msg_id, source_chat_id],
                |_| Ok(()),
            )
            .optional()
            .map_err(|e| failed("Failed to check message pair", e))?
            .is_some();

        conn.execute(
            "INSERT INTO message_pairs
                (source_msg_id, source_chat_id, participant_id, dest_thread, dest_msg_id, read, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?6)
             ON CONFLICT(source_msg_id, source_chat_id) DO UPDATE SET
                participant_id = excluded.participant_id,
                dest_thread = excluded.dest_thread,
                dest_msg_id = excluded.dest_msg_id,
                updated_at = excluded.updated_at
             WHERE participant_id IS NOT excluded.participant_id
                OR dest_thread IS NOT excluded.dest_thread
                OR dest_msg_id IS NOT excluded.dest_msg_id",
            params![source_msg_id, source_chat_id, participant_id, dest_thread, dest_msg_id, now],
        )
        .map_err(|e| failed("Failed to upsert message pair", e))?;

        Ok(!existed)
    }

    /// Get a pair by its source key
    pub fn get_message_pair_by_source(
        &self,
        source_msg_id: &str,
        source_chat_id: &str,
    ) -> Result<Option<MessagePairRecord>> {
        let conn = self.conn.lock();
        conn.query_row(
            &format!(
                "SELECT {} FROM message_pairs WHERE source_msg_id = ? AND source_chat_id = ?",
                PAIR_COLUMNS
            ),
            params![source_msg_id, source_chat_id],
            pair_from_row,
        )
        .optional()
        .map_err(|e| failed("Failed to get message pair", e))
    }

    /// Get the most recently updated pair for a destination message
    pub fn get_message_pair_by_dest(
        &self,
        dest_thread: &str,
        dest_msg_id: i64,
    ) -> Result<Option<MessagePairRecord>> {
        let conn = self.conn.lock();
        conn.query_row(
            &format!(
                "SELECT {} FROM message_pairs WHERE dest_thread = ? AND dest_msg_id = ?
                 ORDER BY updated_at DESC LIMIT 1",
                PAIR_COLUMNS
            ),
            params![dest_thread, dest_msg_id],
            pair_from_row,
        )
        .optional()
        .map_err(|e| failed("Failed to get message pair", e))
    }

    /// Get all unread pairs in a source chat, oldest first
    pub fn get_unread_message_pairs(&self, source_chat_id: &str) -> Result<Vec<MessagePairRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM message_pairs WHERE source_chat_id = ? AND read = 0
                 ORDER BY created_at, source_msg_id",
                PAIR_COLUMNS
            ))
            .map_err(|e| failed("Failed to prepare query", e))?;

        let rows = stmt
            .query_map(params![source_chat_id], pair_from_row)
            .map_err(|e| failed("Failed to query unread pairs", e))?;

        let mut pairs = Vec::new();
        for row in rows {
            pairs.push(row.map_err(|e| failed("Failed to read message pair", e))?);
        }
        Ok(pairs)
    }

    /// Flip the read flag on every pair whose source id is in `ids`.
    ///
    /// `chat` narrows the update to one source chat. Unknown ids are
    /// ignored. Returns the number of rows whose flag actually changed.
    pub fn set_message_pairs_read(
        &self,
        ids: &[&str],
        chat: Option<&str>,
        read: bool,
    ) -> Result<usize> {
        self.transaction(|tx| {
            let mut stmt = tx
                .conn
                .prepare_cached(
                    "UPDATE message_pairs SET read = ?1
                     WHERE source_msg_id = ?2 AND (?3 IS NULL OR source_chat_id = ?3) AND read != ?1",
                )
                .map_err(|e| failed("Failed to prepare update", e))?;

            let mut changed = 0;
            for id in ids {
                changed += stmt
                    .execute(params![read, id, chat])
                    .map_err(|e| failed("Failed to update read state", e))?;
            }
            Ok(changed)
        })
    }

    /// Delete the pair(s) for a destination message
    pub fn delete_message_pair_by_dest(
        &self,
        dest_thread: &str,
        dest_msg_id: i64,
    ) -> Result<usize> {
        let conn = self.conn.lock();
        conn.execute(
            "DELETE FROM message_pairs WHERE dest_thread = ? AND dest_msg_id = ?",
            params![dest_thread, dest_msg_id],
        )
        .map_err(|e| failed("Failed to delete message pair", e))
    }

    /// Delete every pair
    pub fn delete_all_message_pairs(&self) -> Result<usize> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM message_pairs", [])
            .map_err(|e| failed("Failed to delete message pairs", e))
    }

    /// Number of pairs
    pub fn count_message_pairs(&self) -> Result<i64> {
        self.with_conn(|tx| tx.count("message_pairs"))
    }

    /// Number of pairs still waiting for a read receipt
    pub fn count_unread_message_pairs(&self) -> Result<i64> {
        let conn = self.conn.lock();
        conn.query_row("SELECT COUNT(*) FROM message_pairs WHERE read = 0", [], |row| row.get(0))
            .map_err(|e| failed("Failed to count unread pairs", e))
    }

    // ========================================================================
    // EPHEMERAL SETTINGS OPERATIONS
    // ========================================================================

    /// Create or replace the ephemeral setting for a chat
    pub fn set_ephemeral_setting(
        &self,
        chat_id: &str,
        enabled: bool,
        timer_secs: u32,
    ) -> Result<()> {
        let conn = self.conn.lock();
        let now = crate::time::now_timestamp();

        conn.execute(
            "INSERT INTO ephemeral_settings (chat_id, enabled, timer_secs, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(chat_id) DO UPDATE SET
                enabled = excluded.enabled,
                timer_secs = excluded.timer_secs,
                updated_at = excluded.updated_at",
            params![chat_id, enabled, timer_secs, now],
        )
        .map_err(|e| failed("Failed to set ephemeral setting", e))?;

        Ok(())
    }

    /// Get the ephemeral setting for a chat
    pub fn get_ephemeral_setting(&self, chat_id: &str) -> Result<Option<EphemeralRecord>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT chat_id, enabled, timer_secs, updated_at FROM ephemeral_settings WHERE chat_id = ?",
            params![chat_id],
            |row| {
                Ok(EphemeralRecord {
                    chat_id: row.get(0)?,
                    enabled: row.get(1)?,
                    timer_secs: row.get(2)?,
                    updated_at: row.get(3)?,
                })
            },
        )
        .optional()
        .map_err(|e| failed("Failed to get ephemeral setting", e))
    }
}

// ============================================================================
// ROW-LEVEL SQL
// ============================================================================

/// Row-level SQL over a borrowed connection.
///
/// Handed to [`Database::transaction`] closures so several statements can be
/// composed atomically.
pub struct StoreTx<'a> {
    conn: &'a Connection,
}

impl<'a> StoreTx<'a> {
    fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn count(&self, table: &'static str) -> Result<i64> {
        self.conn
            .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))
            .map_err(|e| failed("Failed to count rows", e))
    }

    fn contact_where(
        &self,
        clause: &str,
        value: &dyn rusqlite::ToSql,
    ) -> Result<Option<ContactRecord>> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM contacts WHERE {}", CONTACT_COLUMNS, clause),
                [value],
                contact_from_row,
            )
            .optional()
            .map_err(|e| failed("Failed to get contact", e))
    }

    /// Contact by surrogate ID
    pub fn contact_by_id(&self, id: i64) -> Result<Option<ContactRecord>> {
        self.contact_where("id = ?1", &id)
    }

    /// Contact by primary identifier
    pub fn contact_by_primary(&self, primary_id: &str) -> Result<Option<ContactRecord>> {
        self.contact_where("primary_id = ?1", &primary_id)
    }

    /// Contact by secondary identifier
    pub fn contact_by_secondary(&self, secondary_id: &str) -> Result<Option<ContactRecord>> {
        self.contact_where("secondary_id = ?1", &secondary_id)
    }

    /// Contact by either identifier, preferring a primary match
    pub fn contact_by_either(&self, identifier: &str) -> Result<Option<ContactRecord>> {
        self.contact_where(
            "primary_id = ?1 OR secondary_id = ?1 ORDER BY (primary_id = ?1) DESC, id LIMIT 1",
            &identifier,
        )
    }

    /// Insert a contact.
    ///
    /// Returns `Ok(None)` when a UNIQUE constraint rejected the row, which
    /// means another writer registered one of the identifiers first.
    pub fn insert_contact(
        &self,
        primary_id: Option<&str>,
        secondary_id: Option<&str>,
        short_name: Option<&str>,
    ) -> Result<Option<i64>> {
        let now = crate::time::now_timestamp();
        match self.conn.execute(
            "INSERT INTO contacts (primary_id, secondary_id, short_name, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?)",
            params![primary_id, secondary_id, short_name, now, now],
        ) {
            Ok(_) => Ok(Some(self.conn.last_insert_rowid())),
            Err(e) if is_unique_violation(&e) => Ok(None),
            Err(e) => Err(failed("Failed to insert contact", e)),
        }
    }

    /// Set the primary identifier on a contact
    pub fn set_contact_primary(&self, id: i64, primary_id: &str) -> Result<()> {
        self.set_contact_identifier(id, "primary_id", primary_id)
    }

    /// Set the secondary identifier on a contact
    pub fn set_contact_secondary(&self, id: i64, secondary_id: &str) -> Result<()> {
        self.set_contact_identifier(id, "secondary_id", secondary_id)
    }

    fn set_contact_identifier(&self, id: i64, column: &'static str, value: &str) -> Result<()> {
        let now = crate::time::now_timestamp();
        self.conn
            .execute(
                &format!("UPDATE contacts SET {} = ?, updated_at = ? WHERE id = ?", column),
                params![value, now, id],
            )
            .map_err(|e| failed("Failed to update contact identifier", e))?;
        Ok(())
    }

    /// Overwrite the given name columns.
    ///
    /// Column names come from a closed set owned by the identity module.
    pub fn update_contact_names(&self, id: i64, names: &[(&'static str, &str)]) -> Result<bool> {
        if names.is_empty() {
            return Ok(false);
        }

        let mut updates = Vec::new();
        let mut values: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        for (column, value) in names {
            updates.push(format!("{} = ?", column));
            values.push(Box::new(value.to_string()));
        }

        updates.push("updated_at = ?".to_string());
        values.push(Box::new(crate::time::now_timestamp()));

        let sql = format!("UPDATE contacts SET {} WHERE id = ?", updates.join(", "));
        values.push(Box::new(id));

        let params: Vec<&dyn rusqlite::ToSql> = values.iter().map(|v| v.as_ref()).collect();

        let rows = self
            .conn
            .execute(&sql, params.as_slice())
            .map_err(|e| failed("Failed to update contact names", e))?;

        Ok(rows > 0)
    }

    /// Delete a contact row. Only used when folding a duplicate into its twin.
    pub fn delete_contact(&self, id: i64) -> Result<()> {
        self.conn
            .execute("DELETE FROM contacts WHERE id = ?", params![id])
            .map_err(|e| failed("Failed to delete contact", e))?;
        Ok(())
    }

    /// Binding owned by a contact
    pub fn binding_by_contact(&self, contact_id: i64) -> Result<Option<ThreadBindingRecord>> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM thread_bindings WHERE contact_id = ?", BINDING_COLUMNS),
                params![contact_id],
                binding_from_row,
            )
            .optional()
            .map_err(|e| failed("Failed to get thread binding", e))
    }

    /// Binding for a destination thread handle
    pub fn binding_by_handle(&self, handle: &str) -> Result<Option<ThreadBindingRecord>> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM thread_bindings WHERE thread_handle = ?", BINDING_COLUMNS),
                params![handle],
                binding_from_row,
            )
            .optional()
            .map_err(|e| failed("Failed to get thread binding", e))
    }

    /// Create the binding for a contact, or point the existing one at a new
    /// handle
    pub fn upsert_binding(&self, contact_id: i64, handle: &str) -> Result<()> {
        let now = crate::time::now_timestamp();
        self.conn
            .execute(
                "INSERT INTO thread_bindings (contact_id, thread_handle, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?3)
                 ON CONFLICT(contact_id) DO UPDATE SET
                    thread_handle = excluded.thread_handle,
                    updated_at = excluded.updated_at",
                params![contact_id, handle, now],
            )
            .map_err(|e| failed("Failed to upsert thread binding", e))?;
        Ok(())
    }

    /// Hand a binding over from one contact to another
    pub fn move_binding(&self, from_contact: i64, to_contact: i64) -> Result<()> {
        let now = crate::time::now_timestamp();
        self.conn
            .execute(
                "UPDATE thread_bindings SET contact_id = ?, updated_at = ? WHERE contact_id = ?",
                params![to_contact, now, from_contact],
            )
            .map_err(|e| failed("Failed to move thread binding", e))?;
        Ok(())
    }
}

/// Escape `%`, `_` and `\` for a LIKE pattern using `\` as the escape char.
fn escape_like(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

// ============================================================================
// RECORD TYPES
// ============================================================================

const CONTACT_COLUMNS: &str =
    "id, primary_id, secondary_id, short_name, full_name, push_name, business_name, created_at, updated_at";

const BINDING_COLUMNS: &str = "id, contact_id, thread_handle, created_at, updated_at";

const PAIR_COLUMNS: &str =
    "source_msg_id, source_chat_id, participant_id, dest_thread, dest_msg_id, read, created_at, updated_at";

fn contact_from_row(row: &Row<'_>) -> rusqlite::Result<ContactRecord> {
    Ok(ContactRecord {
        id: row.get(0)?,
        primary_id: row.get(1)?,
        secondary_id: row.get(2)?,
        short_name: row.get(3)?,
        full_name: row.get(4)?,
        push_name: row.get(5)?,
        business_name: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

fn binding_from_row(row: &Row<'_>) -> rusqlite::Result<ThreadBindingRecord> {
    Ok(ThreadBindingRecord {
        id: row.get(0)?,
        contact_id: row.get(1)?,
        thread_handle: row.get(2)?,
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
    })
}

fn pair_from_row(row: &Row<'_>) -> rusqlite::Result<MessagePairRecord> {
    Ok(MessagePairRecord {
        source_msg_id: row.get(0)?,
        source_chat_id: row.get(1)?,
        participant_id: row.get(2)?,
        dest_thread: row.get(3)?,
        dest_msg_id: row.get(4)?,
        read: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

/// A contact record from the database
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactRecord {
    pub id: i64,
    pub primary_id: Option<String>,
    pub secondary_id: Option<String>,
    pub short_name: Option<String>,
    pub full_name: Option<String>,
    pub push_name: Option<String>,
    pub business_name: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A thread binding record from the database
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadBindingRecord {
    pub id: i64,
    pub contact_id: i64,
    pub thread_handle: String,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A message pair record from the database
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessagePairRecord {
    pub source_msg_id: String,
    pub source_chat_id: String,
    pub participant_id: String,
    pub dest_thread: String,
    pub dest_msg_id: i64,
    pub read: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

/// An ephemeral setting record from the database
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EphemeralRecord {
    pub chat_id: String,
    pub enabled: bool,
    pub timer_secs: u32,
    pub updated_at: i64,
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_database_creation() {
        let db = Database::open(None).await.unwrap();
        assert_eq!(db.count_contacts().unwrap(), 0);
        assert_eq!(db.count_bindings().unwrap(), 0);
        assert_eq!(db.count_message_pairs().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_contact_identifier_uniqueness() {
        let db = Database::open(None).await.unwrap();

        let first = db
            .transaction(|tx| tx.insert_contact(Some("15551234567"), None, None))
            .unwrap();
        assert!(first.is_some());

        // Same primary again is rejected by the schema, not by us
        let second = db
            .transaction(|tx| tx.insert_contact(Some("15551234567"), Some("99"), None))
            .unwrap();
        assert!(second.is_none());
        assert_eq!(db.count_contacts().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_contact_requires_an_identifier() {
        let db = Database::open(None).await.unwrap();
        let result = db.transaction(|tx| tx.insert_contact(None, None, Some("Nobody")));
        assert!(matches!(result, Err(Error::InvariantViolation(_))));
        assert_eq!(db.count_contacts().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_failed_transaction_rolls_back() {
        let db = Database::open(None).await.unwrap();
        let result: Result<()> = db.transaction(|tx| {
            tx.insert_contact(Some("111"), None, None)?;
            Err(Error::IdentityConflict("abort".into()))
        });
        assert!(result.is_err());
        assert!(db.find_contact_by_either("111").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_find_contact_by_either() {
        let db = Database::open(None).await.unwrap();
        let id = db
            .transaction(|tx| tx.insert_contact(Some("111"), Some("222"), None))
            .unwrap()
            .unwrap();

        assert_eq!(db.find_contact_by_either("111").unwrap().unwrap().id, id);
        assert_eq!(db.find_contact_by_either("222").unwrap().unwrap().id, id);
        assert!(db.find_contact_by_either("333").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_search_contacts_escapes_wildcards() {
        let db = Database::open(None).await.unwrap();
        let id = db
            .transaction(|tx| tx.insert_contact(Some("111"), None, None))
            .unwrap()
            .unwrap();
        db.update_contact_names(id, &[("full_name", "Alice 100% Real")]).unwrap();
        let other = db
            .transaction(|tx| tx.insert_contact(Some("222"), None, None))
            .unwrap()
            .unwrap();
        db.update_contact_names(other, &[("push_name", "Bob")]).unwrap();

        assert_eq!(db.search_contacts("ALICE", 10).unwrap().len(), 1);
        assert_eq!(db.search_contacts("100%", 10).unwrap().len(), 1);
        // Wildcards match only themselves
        assert_eq!(db.search_contacts("%", 10).unwrap().len(), 1);
        assert_eq!(db.search_contacts("_", 10).unwrap().len(), 0);
        assert_eq!(db.search_contacts("o", 10).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_binding_handle_is_unique() {
        let db = Database::open(None).await.unwrap();
        let a = db.transaction(|tx| tx.insert_contact(Some("a"), None, None)).unwrap().unwrap();
        let b = db.transaction(|tx| tx.insert_contact(Some("b"), None, None)).unwrap().unwrap();

        db.transaction(|tx| tx.upsert_binding(a, "42")).unwrap();
        let clash = db.transaction(|tx| tx.upsert_binding(b, "42"));
        assert!(matches!(clash, Err(Error::InvariantViolation(_))));

        assert_eq!(db.get_binding_by_handle("42").unwrap().unwrap().contact_id, a);
        assert!(db.delete_binding_by_handle("42").unwrap());
        assert!(!db.delete_binding_by_handle("42").unwrap());
    }

    #[tokio::test]
    async fn test_message_pair_upsert_reports_insert() {
        let db = Database::open(None).await.unwrap();

        assert!(db.upsert_message_pair("m1", "c1", "p1", "42", 7).unwrap());
        assert!(!db.upsert_message_pair("m1", "c1", "p1", "42", 9).unwrap());
        // Same id in another chat is a different record
        assert!(db.upsert_message_pair("m1", "c2", "p1", "43", 1).unwrap());

        assert_eq!(db.count_message_pairs().unwrap(), 2);
        let pair = db.get_message_pair_by_source("m1", "c1").unwrap().unwrap();
        assert_eq!(pair.dest_msg_id, 9);
    }

    #[tokio::test]
    async fn test_read_flags() {
        let db = Database::open(None).await.unwrap();
        db.upsert_message_pair("m1", "c1", "p1", "42", 1).unwrap();
        db.upsert_message_pair("m1", "c2", "p1", "43", 1).unwrap();
        db.upsert_message_pair("m2", "c1", "p2", "42", 2).unwrap();

        assert_eq!(db.set_message_pairs_read(&["m1"], Some("c1"), true).unwrap(), 1);
        // Already read: nothing changes
        assert_eq!(db.set_message_pairs_read(&["m1"], Some("c1"), true).unwrap(), 0);
        assert_eq!(db.get_unread_message_pairs("c1").unwrap().len(), 1);
        assert_eq!(db.get_unread_message_pairs("c2").unwrap().len(), 1);

        assert_eq!(db.set_message_pairs_read(&["m1", "ghost"], None, true).unwrap(), 1);
        assert_eq!(db.count_unread_message_pairs().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_ephemeral_settings() {
        let db = Database::open(None).await.unwrap();
        assert!(db.get_ephemeral_setting("c1").unwrap().is_none());

        db.set_ephemeral_setting("c1", true, 86400).unwrap();
        let setting = db.get_ephemeral_setting("c1").unwrap().unwrap();
        assert!(setting.enabled);
        assert_eq!(setting.timer_secs, 86400);

        db.set_ephemeral_setting("c1", false, 0).unwrap();
        let setting = db.get_ephemeral_setting("c1").unwrap().unwrap();
        assert!(!setting.enabled);
        assert_eq!(setting.timer_secs, 0);
    }

    #[tokio::test]
    async fn test_reopen_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bridge.db");
        let path = path.to_str().unwrap();

        {
            let db = Database::open(Some(path)).await.unwrap();
            db.upsert_message_pair("m1", "c1", "p1", "42", 7).unwrap();
        }

        let db = Database::open(Some(path)).await.unwrap();
        let pair = db.get_message_pair_by_source("m1", "c1").unwrap().unwrap();
        assert_eq!(pair.dest_thread, "42");
        assert_eq!(pair.dest_msg_id, 7);
    }
}
