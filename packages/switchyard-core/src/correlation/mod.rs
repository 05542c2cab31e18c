//! # Correlation Module
//!
//! Pairs every forwarded source message with its destination message so
//! replies, edits, revokes, reactions and receipts can travel back.
//!
//! ## Keys
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      MESSAGE CORRELATION                                │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  (source_msg_id, source_chat_id)  ──find_destination──►                 │
//! │                                        (dest_thread, dest_msg_id)       │
//! │                                                                         │
//! │  (dest_thread, dest_msg_id)       ──find_source──────►                  │
//! │                       (source_msg_id, participant_id, source_chat_id)   │
//! │                                                                         │
//! │  Message ids are only unique per chat: the same literal id in two       │
//! │  chats is two records.                                                  │
//! │                                                                         │
//! │  upsert()   insert, or overwrite participant + destination in place     │
//! │             read flag: set false on insert, never touched on update     │
//! │  mark_*()   batch flip, unknown ids ignored                             │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::error::Result;
use crate::storage::{Database, MessagePairRecord};
use crate::threads::ThreadHandle;

/// One forwarded message, both sides
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageCorrelation {
    pub source_msg_id: String,
    pub source_chat_id: String,
    pub participant_id: String,
    pub dest_thread: ThreadHandle,
    pub dest_msg_id: i64,
    /// Has a read receipt been sent back to the source side?
    pub read: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

impl From<MessagePairRecord> for MessageCorrelation {
    fn from(r: MessagePairRecord) -> Self {
        Self {
            source_msg_id: r.source_msg_id,
            source_chat_id: r.source_chat_id,
            participant_id: r.participant_id,
            dest_thread: ThreadHandle::new(r.dest_thread),
            dest_msg_id: r.dest_msg_id,
            read: r.read,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

/// Where a source message was forwarded to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DestinationRef {
    pub thread: ThreadHandle,
    pub msg_id: i64,
}

/// Where a destination message came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceRef {
    pub msg_id: String,
    pub participant_id: String,
    pub chat_id: String,
}

/// Message correlation store
pub struct CorrelationStore {
    database: Arc<Database>,
}

impl CorrelationStore {
    /// Create a new correlation store
    pub fn new(database: Arc<Database>) -> Self {
        Self { database }
    }

    /// Record a forward. Idempotent; returns true when the record is new.
    pub fn upsert(
        &self,
        source_msg_id: &str,
        source_chat_id: &str,
        participant_id: &str,
        dest_thread: &ThreadHandle,
        dest_msg_id: i64,
    ) -> Result<bool> {
        let inserted = self.database.upsert_message_pair(
            source_msg_id,
            source_chat_id,
            participant_id,
            dest_thread.as_str(),
            dest_msg_id,
        )?;

        tracing::debug!(
            source_msg_id,
            source_chat_id,
            thread = %dest_thread,
            dest_msg_id,
            inserted,
            "Recorded message pair"
        );
        Ok(inserted)
    }

    /// Source → destination
    pub fn find_destination(
        &self,
        source_msg_id: &str,
        source_chat_id: &str,
    ) -> Result<Option<DestinationRef>> {
        Ok(self
            .database
            .get_message_pair_by_source(source_msg_id, source_chat_id)?
            .map(|r| DestinationRef {
                thread: ThreadHandle::new(r.dest_thread),
                msg_id: r.dest_msg_id,
            }))
    }

    /// Destination → source
    pub fn find_source(
        &self,
        dest_thread: &ThreadHandle,
        dest_msg_id: i64,
    ) -> Result<Option<SourceRef>> {
        Ok(self
            .database
            .get_message_pair_by_dest(dest_thread.as_str(), dest_msg_id)?
            .map(|r| SourceRef {
                msg_id: r.source_msg_id,
                participant_id: r.participant_id,
                chat_id: r.source_chat_id,
            }))
    }

    /// Full record by source key
    pub fn get(
        &self,
        source_msg_id: &str,
        source_chat_id: &str,
    ) -> Result<Option<MessageCorrelation>> {
        Ok(self
            .database
            .get_message_pair_by_source(source_msg_id, source_chat_id)?
            .map(Into::into))
    }

    /// Unread records in a source chat, oldest first
    pub fn list_unread(&self, source_chat_id: &str) -> Result<Vec<MessageCorrelation>> {
        Ok(self
            .database
            .get_unread_message_pairs(source_chat_id)?
            .into_iter()
            .map(Into::into)
            .collect())
    }

    /// Unread message ids in a chat, grouped by participant.
    ///
    /// Receipts are sent per sender, so this is the shape the receipt
    /// sender wants.
    pub fn unread_by_participant(
        &self,
        source_chat_id: &str,
    ) -> Result<BTreeMap<String, Vec<String>>> {
        let mut grouped: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for pair in self.database.get_unread_message_pairs(source_chat_id)? {
            grouped.entry(pair.participant_id).or_default().push(pair.source_msg_id);
        }
        Ok(grouped)
    }

    /// Mark ids read in every chat. Returns the number of records flipped.
    pub fn mark_read<S: AsRef<str>>(&self, source_msg_ids: &[S]) -> Result<usize> {
        self.set_read(source_msg_ids, None, true)
    }

    /// Mark ids read in one chat only
    pub fn mark_read_in_chat<S: AsRef<str>>(
        &self,
        source_chat_id: &str,
        source_msg_ids: &[S],
    ) -> Result<usize> {
        self.set_read(source_msg_ids, Some(source_chat_id), true)
    }

    /// Mark ids unread in every chat. Returns the number of records flipped.
    pub fn mark_unread<S: AsRef<str>>(&self, source_msg_ids: &[S]) -> Result<usize> {
        self.set_read(source_msg_ids, None, false)
    }

    fn set_read<S: AsRef<str>>(&self, ids: &[S], chat: Option<&str>, read: bool) -> Result<usize> {
        let ids: BTreeSet<&str> = ids.iter().map(|id| AsRef::<str>::as_ref(id)).collect();
        if ids.is_empty() {
            return Ok(0);
        }
        let ids: Vec<&str> = ids.into_iter().collect();
        self.database.set_message_pairs_read(&ids, chat, read)
    }

    /// Forget the pair for a destination message, e.g. once a revoke has
    /// gone through on both sides
    pub fn delete(&self, dest_thread: &ThreadHandle, dest_msg_id: i64) -> Result<bool> {
        let removed = self.database.delete_message_pair_by_dest(dest_thread.as_str(), dest_msg_id)?;
        Ok(removed > 0)
    }

    /// Forget every pair
    pub fn delete_all(&self) -> Result<usize> {
        let removed = self.database.delete_all_message_pairs()?;
        tracing::info!(removed, "Deleted all message pairs");
        Ok(removed)
    }

    /// Number of records
    pub fn count(&self) -> Result<i64> {
        self.database.count_message_pairs()
    }

    /// Number of records still waiting for a read receipt
    pub fn count_unread(&self) -> Result<i64> {
        self.database.count_unread_message_pairs()
    }
}
