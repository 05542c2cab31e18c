//! # Threads Module
//!
//! Binds each logical contact to exactly one destination thread.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        THREAD BINDINGS                                  │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │   contact ──(contact_id UNIQUE)──► binding ◄──(thread_handle UNIQUE)──  │
//! │                                                                         │
//! │   bind(c, T1); bind(c, T2)   → c ↦ T2, T1 resolves to nothing          │
//! │   bind(d, T2) while c ↦ T2   → InvariantViolation                       │
//! │   unbind(T2)                 → contact and its messages untouched      │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::identity::LogicalContact;
use crate::storage::{Database, ThreadBindingRecord};

/// Opaque destination conversation handle
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThreadHandle(String);

impl ThreadHandle {
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ThreadHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<i64> for ThreadHandle {
    fn from(id: i64) -> Self {
        Self(id.to_string())
    }
}

impl From<&str> for ThreadHandle {
    fn from(handle: &str) -> Self {
        Self(handle.to_string())
    }
}

impl From<String> for ThreadHandle {
    fn from(handle: String) -> Self {
        Self(handle)
    }
}

/// A contact's destination thread
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadBinding {
    pub id: i64,
    pub contact_id: i64,
    pub thread_handle: ThreadHandle,
    pub created_at: i64,
    pub updated_at: i64,
}

impl From<ThreadBindingRecord> for ThreadBinding {
    fn from(r: ThreadBindingRecord) -> Self {
        Self {
            id: r.id,
            contact_id: r.contact_id,
            thread_handle: ThreadHandle(r.thread_handle),
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

/// Thread binding store
pub struct ThreadStore {
    database: Arc<Database>,
}

impl ThreadStore {
    /// Create a new thread binding store
    pub fn new(database: Arc<Database>) -> Self {
        Self { database }
    }

    /// Create or replace the binding for `contact_id`.
    ///
    /// Rebinding to a new handle is last-writer-wins. A handle already owned
    /// by a different contact is refused.
    pub fn bind(&self, contact_id: i64, thread: &ThreadHandle) -> Result<ThreadBinding> {
        let (binding, previous) = self.database.transaction(|tx| {
            if tx.contact_by_id(contact_id)?.is_none() {
                return Err(Error::NotFound(format!("contact {}", contact_id)));
            }

            if let Some(owner) = tx.binding_by_handle(thread.as_str())? {
                if owner.contact_id != contact_id {
                    return Err(Error::InvariantViolation(format!(
                        "thread {} is already bound to contact {}",
                        thread, owner.contact_id
                    )));
                }
            }

            let previous = tx.binding_by_contact(contact_id)?.map(|b| b.thread_handle);
            tx.upsert_binding(contact_id, thread.as_str())?;

            let binding = tx.binding_by_contact(contact_id)?.ok_or_else(|| {
                Error::InvariantViolation(format!("binding for contact {} vanished", contact_id))
            })?;
            Ok((binding, previous))
        })?;

        match previous {
            None => tracing::info!(contact_id, thread = %thread, "Bound thread"),
            Some(old) if old != thread.as_str() => {
                tracing::info!(contact_id, thread = %thread, previous = %old, "Rebound thread")
            }
            Some(_) => {}
        }

        Ok(binding.into())
    }

    /// Forward lookup: contact → binding
    pub fn get_by_contact(&self, contact_id: i64) -> Result<Option<ThreadBinding>> {
        Ok(self.database.get_binding_by_contact(contact_id)?.map(Into::into))
    }

    /// Reverse lookup: thread → binding
    pub fn binding_for_thread(&self, thread: &ThreadHandle) -> Result<Option<ThreadBinding>> {
        Ok(self.database.get_binding_by_handle(thread.as_str())?.map(Into::into))
    }

    /// Reverse lookup: thread → owning contact
    pub fn get_by_thread_handle(&self, thread: &ThreadHandle) -> Result<Option<LogicalContact>> {
        match self.database.get_binding_by_handle(thread.as_str())? {
            Some(binding) => Ok(self.database.get_contact(binding.contact_id)?.map(Into::into)),
            None => Ok(None),
        }
    }

    /// Remove the binding for a thread. Returns false if nothing was bound.
    pub fn unbind(&self, thread: &ThreadHandle) -> Result<bool> {
        let removed = self.database.delete_binding_by_handle(thread.as_str())?;
        if removed {
            tracing::info!(thread = %thread, "Unbound thread");
        }
        Ok(removed)
    }

    /// All bindings
    pub fn list_all(&self) -> Result<Vec<ThreadBinding>> {
        Ok(self.database.get_all_bindings()?.into_iter().map(Into::into).collect())
    }

    /// Number of bindings
    pub fn count(&self) -> Result<i64> {
        self.database.count_bindings()
    }
}
