//! # Correlation Engine
//!
//! The use-case layer the platform event handlers call into. It owns the
//! four stores and answers "where does this contact / message / thread go".
//!
//! ## Inbound Flow
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      SOURCE → DESTINATION                               │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  message event (chat, sender, msg id)                                  │
//! │         │                                                               │
//! │         ▼                                                               │
//! │  route_chat(chat) ──► Bound(binding) ─────────────────┐                │
//! │         │                                              │                │
//! │         └──────────► Unbound(contact)                  │                │
//! │                          │                             │                │
//! │                          ▼                             │                │
//! │             caller creates destination thread          │                │
//! │                          │                             │                │
//! │                          ▼                             │                │
//! │                  bind_chat(chat, thread)               │                │
//! │                          │                             │                │
//! │                          ▼                             ▼                │
//! │             caller sends content into the thread                       │
//! │                          │                                              │
//! │                          ▼                                              │
//! │       record_forward(msg id, chat, sender, thread, dest msg id)        │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Locking
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Key               Held across                                          │
//! │  ───────────────   ──────────────────────────────────────────────────   │
//! │  id:p:<primary>    resolve-or-create / learn for that identifier        │
//! │  id:s:<secondary>  resolve-or-create / learn for that identifier        │
//! │  contact:<id>      bind / unbind for that contact                       │
//! │                                                                         │
//! │  Multiple keys are always taken in sorted order. No lock is held        │
//! │  across anything but local store calls; thread creation on the         │
//! │  destination platform happens between route_chat and bind_chat.        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Single-record operations on message pairs and ephemeral settings need no
//! keyed lock: each is one statement under the connection lock.

mod locks;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::{EngineConfig, StoreConfig};
use crate::correlation::{CorrelationStore, DestinationRef, SourceRef};
use crate::ephemeral::{EphemeralPolicy, EphemeralStore};
use crate::error::{Error, Result};
use crate::identity::address::HIDDEN_USER_SERVER;
use crate::identity::{
    provisional_name, split_sender, AddressKind, DisplayNameField, DisplayNames, IdentityStore,
    LogicalContact, Resolution, SourceAddress,
};
use crate::storage::{self, Database};
use crate::threads::{ThreadBinding, ThreadHandle, ThreadStore};

pub use locks::{KeyGuard, KeyedLocks};

/// Outcome of routing a source chat
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThreadRoute {
    /// The chat already has a destination thread
    Bound(ThreadBinding),
    /// No thread yet. Create one, then call `bind_chat`.
    Unbound(LogicalContact),
}

/// One address-book entry pushed by the source platform
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactSnapshot {
    pub primary_id: Option<String>,
    pub secondary_id: Option<String>,
    #[serde(flatten)]
    pub names: DisplayNames,
}

/// Result of a bulk contact sync
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub seen: usize,
    pub created: usize,
    /// Existing contacts that gained an identifier, including folds
    pub merged: usize,
    pub conflicts: usize,
    /// Entries with no usable identifier
    pub skipped: usize,
}

/// Row counts across the stores
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStats {
    pub contacts: i64,
    pub bindings: i64,
    pub correlations: i64,
    pub unread: i64,
}

/// The correlation engine
pub struct CorrelationEngine {
    config: EngineConfig,
    identities: IdentityStore,
    threads: ThreadStore,
    correlations: CorrelationStore,
    ephemeral: EphemeralStore,
    locks: KeyedLocks,
}

impl CorrelationEngine {
    /// Build an engine over an already-open database
    pub fn new(database: Arc<Database>, config: EngineConfig) -> Self {
        Self {
            config,
            identities: IdentityStore::new(database.clone()),
            threads: ThreadStore::new(database.clone()),
            correlations: CorrelationStore::new(database.clone()),
            ephemeral: EphemeralStore::new(database),
            locks: KeyedLocks::new(),
        }
    }

    /// Open storage and build an engine on it
    pub async fn open(store: &StoreConfig, config: EngineConfig) -> Result<Self> {
        let database = storage::init(store).await?;
        Ok(Self::new(Arc::new(database), config))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn identities(&self) -> &IdentityStore {
        &self.identities
    }

    pub fn threads(&self) -> &ThreadStore {
        &self.threads
    }

    pub fn correlations(&self) -> &CorrelationStore {
        &self.correlations
    }

    pub fn ephemeral(&self) -> &EphemeralStore {
        &self.ephemeral
    }

    fn parse(&self, raw: &str) -> Result<SourceAddress> {
        SourceAddress::parse(raw, &self.config.default_user_server)
    }

    fn identity_keys(primary: Option<&str>, secondary: Option<&str>) -> Vec<String> {
        primary
            .map(|p| format!("id:p:{}", p))
            .into_iter()
            .chain(secondary.map(|s| format!("id:s:{}", s)))
            .collect()
    }

    fn resolve_locked(
        &self,
        primary: Option<&str>,
        secondary: Option<&str>,
        hint: Option<&str>,
    ) -> Result<(LogicalContact, Resolution)> {
        let _guards = self.locks.lock_all(&Self::identity_keys(primary, secondary));
        self.identities.resolve(primary, secondary, hint)
    }

    // ========================================================================
    // CONTACTS
    // ========================================================================

    /// Resolve the contact behind a message sender.
    ///
    /// `alt_address` is the other form of the same sender when the platform
    /// supplies it; seeing both merges them into one contact.
    pub fn resolve_sender(
        &self,
        address: &str,
        alt_address: Option<&str>,
    ) -> Result<LogicalContact> {
        let address = self.parse(address)?;
        let alt = alt_address.map(|a| self.parse(a)).transpose()?;
        let ids = split_sender(&address, alt.as_ref())?;

        self.resolve_locked(ids.primary.as_deref(), ids.secondary.as_deref(), None)
            .map(|(contact, _)| contact)
    }

    /// Store the name a sender announced. Unknown senders are ignored.
    pub fn record_push_name(
        &self,
        address: &str,
        alt_address: Option<&str>,
        name: &str,
    ) -> Result<bool> {
        if name.trim().is_empty() {
            return Ok(false);
        }

        let address = self.parse(address)?;
        let alt = alt_address.map(|a| self.parse(a)).transpose()?;
        let ids = split_sender(&address, alt.as_ref())?;

        // A bare user can be both a phone number and an alias; match by slot
        let contact = match ids.primary.as_deref() {
            Some(p) => self.identities.lookup_by_primary_id(p)?,
            None => None,
        };
        let contact = match (contact, ids.secondary.as_deref()) {
            (Some(c), _) => Some(c),
            (None, Some(s)) => self.identities.lookup_by_secondary_id(s)?,
            (None, None) => None,
        };

        match contact {
            Some(contact) => {
                self.identities
                    .update_display_name(contact.id, DisplayNameField::Push, name)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Apply an address-book sync.
    ///
    /// Conflicting and unusable entries are counted and skipped; storage
    /// failures abort the sync.
    pub fn sync_contacts(&self, snapshots: &[ContactSnapshot]) -> Result<SyncReport> {
        let mut report = SyncReport::default();

        for snapshot in snapshots {
            report.seen += 1;

            let primary = snapshot.primary_id.as_deref().map(str::trim).filter(|s| !s.is_empty());
            let secondary = snapshot
                .secondary_id
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty());
            if primary.is_none() && secondary.is_none() {
                report.skipped += 1;
                continue;
            }

            let contact = match self.resolve_locked(primary, secondary, None) {
                Ok((contact, resolution)) => {
                    match resolution {
                        Resolution::Created => report.created += 1,
                        Resolution::Merged | Resolution::Folded => report.merged += 1,
                        Resolution::Existing => {}
                    }
                    contact
                }
                Err(Error::IdentityConflict(message)) => {
                    tracing::warn!(
                        primary = ?primary,
                        secondary = ?secondary,
                        "Skipping conflicting contact: {}",
                        message
                    );
                    report.conflicts += 1;
                    continue;
                }
                Err(e) => return Err(e),
            };

            self.identities.update_display_names(contact.id, &snapshot.names)?;
        }

        tracing::info!(
            seen = report.seen,
            created = report.created,
            merged = report.merged,
            conflicts = report.conflicts,
            "Synced contacts"
        );
        Ok(report)
    }

    // ========================================================================
    // THREADS
    // ========================================================================

    fn chat_contact(&self, chat: &str, hint: Option<&str>) -> Result<LogicalContact> {
        let address = self.parse(chat)?;
        let key = address.identity_key();
        let name = hint
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| provisional_name(&key));

        let (primary, secondary) = match address.kind() {
            AddressKind::Secondary => (None, Some(key.as_str())),
            _ => (Some(key.as_str()), None),
        };
        let (contact, _) = self.resolve_locked(primary, secondary, Some(name.as_str()))?;
        Ok(contact)
    }

    /// Find the destination thread for a source chat.
    ///
    /// An unknown chat gets a provisional contact named `hint`, or
    /// `User (<id>)` without one.
    pub fn route_chat(&self, chat: &str, hint: Option<&str>) -> Result<ThreadRoute> {
        let contact = self.chat_contact(chat, hint)?;
        match self.threads.get_by_contact(contact.id)? {
            Some(binding) => Ok(ThreadRoute::Bound(binding)),
            None => Ok(ThreadRoute::Unbound(contact)),
        }
    }

    /// Bind a source chat to a freshly created destination thread
    pub fn bind_chat(&self, chat: &str, thread: &ThreadHandle) -> Result<ThreadBinding> {
        let contact = self.chat_contact(chat, None)?;
        let _guard = self.locks.lock(&format!("contact:{}", contact.id));
        self.threads.bind(contact.id, thread)
    }

    /// Detach a destination thread from its contact
    pub fn unlink_thread(&self, thread: &ThreadHandle) -> Result<bool> {
        let Some(binding) = self.threads.binding_for_thread(thread)? else {
            return Ok(false);
        };
        let _guard = self.locks.lock(&format!("contact:{}", binding.contact_id));
        self.threads.unbind(thread)
    }

    /// Source chat address a destination thread belongs to
    pub fn chat_for_thread(&self, thread: &ThreadHandle) -> Result<Option<String>> {
        let Some(contact) = self.threads.get_by_thread_handle(thread)? else {
            return Ok(None);
        };

        let chat = match (contact.primary_id.as_deref(), contact.secondary_id.as_deref()) {
            (Some(p), _) if p.contains('@') => p.to_string(),
            (Some(p), _) => format!("{}@{}", p, self.config.default_user_server),
            (None, Some(s)) => format!("{}@{}", s, HIDDEN_USER_SERVER),
            (None, None) => {
                return Err(Error::InvariantViolation(format!(
                    "contact {} has no identifier",
                    contact.id
                )))
            }
        };
        Ok(Some(chat))
    }

    // ========================================================================
    // MESSAGES
    // ========================================================================

    /// Remember that a source message was forwarded. Idempotent.
    pub fn record_forward(
        &self,
        source_msg_id: &str,
        source_chat_id: &str,
        participant_id: &str,
        thread: &ThreadHandle,
        dest_msg_id: i64,
    ) -> Result<bool> {
        self.correlations
            .upsert(source_msg_id, source_chat_id, participant_id, thread, dest_msg_id)
    }

    pub fn destination_of(
        &self,
        source_msg_id: &str,
        source_chat_id: &str,
    ) -> Result<Option<DestinationRef>> {
        self.correlations.find_destination(source_msg_id, source_chat_id)
    }

    pub fn source_of(&self, thread: &ThreadHandle, dest_msg_id: i64) -> Result<Option<SourceRef>> {
        self.correlations.find_source(thread, dest_msg_id)
    }

    /// Messages in a chat still owed a read receipt, by sender
    pub fn pending_receipts(&self, source_chat_id: &str) -> Result<BTreeMap<String, Vec<String>>> {
        self.correlations.unread_by_participant(source_chat_id)
    }

    /// Note that receipts were sent for `source_msg_ids` in a chat
    pub fn acknowledge<S: AsRef<str>>(
        &self,
        source_chat_id: &str,
        source_msg_ids: &[S],
    ) -> Result<usize> {
        self.correlations.mark_read_in_chat(source_chat_id, source_msg_ids)
    }

    /// Drop the pair once a revoke went through on both sides
    pub fn confirm_revoke(&self, thread: &ThreadHandle, dest_msg_id: i64) -> Result<bool> {
        self.correlations.delete(thread, dest_msg_id)
    }

    /// Operator reset of every message pair
    pub fn reset_correlations(&self) -> Result<usize> {
        self.correlations.delete_all()
    }

    // ========================================================================
    // EPHEMERAL
    // ========================================================================

    pub fn set_ephemeral(&self, chat_id: &str, enabled: bool, timer_secs: u32) -> Result<()> {
        self.ephemeral.set(chat_id, enabled, timer_secs)
    }

    /// Policy for a chat, disabled when never configured
    pub fn ephemeral_policy(&self, chat_id: &str) -> Result<EphemeralPolicy> {
        Ok(self
            .ephemeral
            .get(chat_id)?
            .unwrap_or_else(|| EphemeralPolicy::disabled(chat_id)))
    }

    // ========================================================================
    // STATS
    // ========================================================================

    pub fn stats(&self) -> Result<EngineStats> {
        Ok(EngineStats {
            contacts: self.identities.count()?,
            bindings: self.threads.count()?,
            correlations: self.correlations.count()?,
            unread: self.correlations.count_unread()?,
        })
    }
}
