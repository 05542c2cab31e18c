//! # Identity Module
//!
//! One logical contact per real-world person, whichever of their two
//! source-platform identifiers is known so far.
//!
//! ## Resolution
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      RESOLVE OR CREATE                                  │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  resolve_or_create(primary?, secondary?, hint?)                        │
//! │         │                                                               │
//! │         ▼                                                               │
//! │  Look up row by primary, row by secondary (one IMMEDIATE transaction)  │
//! │         │                                                               │
//! │         ├── neither ─────────────► INSERT          → Created           │
//! │         │                                                               │
//! │         ├── one row, other id     ► fill missing   → Merged            │
//! │         │   missing on it                                               │
//! │         │                                                               │
//! │         ├── one row, other id     ► IdentityConflict                    │
//! │         │   set to something else                                       │
//! │         │                                                               │
//! │         ├── same row both ways ──► as-is           → Existing          │
//! │         │                                                               │
//! │         └── two half-rows ───────► fold newer into → Folded            │
//! │             (P-only + S-only)       older                               │
//! │                                                                         │
//! │  INSERT hitting a UNIQUE constraint means another writer won the race: │
//! │  the whole resolution is re-read once.                                  │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Folding deletes the absorbed row. Its identifier lives on in the
//! survivor, and AUTOINCREMENT keeps the dropped surrogate id from ever
//! being handed out again.

pub mod address;

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::storage::{ContactRecord, Database, StoreTx};

pub use address::{split_sender, AddressKind, SenderIds, SourceAddress};

/// A de-duplicated contact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogicalContact {
    /// Surrogate ID, stable and never reused
    pub id: i64,
    /// Long-lived public address (phone-number user)
    pub primary_id: Option<String>,
    /// Privacy-preserving alias address
    pub secondary_id: Option<String>,
    pub short_name: Option<String>,
    pub full_name: Option<String>,
    /// Name the contact announces about themself
    pub push_name: Option<String>,
    pub business_name: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl LogicalContact {
    /// Best identifier for display: primary, else secondary
    pub fn identifier(&self) -> &str {
        self.primary_id
            .as_deref()
            .or(self.secondary_id.as_deref())
            .unwrap_or_default()
    }

    /// Human-readable label for thread titles and mentions
    pub fn display_label(&self) -> String {
        let id = self.identifier();
        if let Some(full) = non_empty(&self.full_name) {
            return full.to_string();
        }
        for name in [&self.business_name, &self.push_name, &self.short_name] {
            if let Some(name) = non_empty(name) {
                return format!("{} ({})", name, id);
            }
        }
        provisional_name(id)
    }
}

impl From<ContactRecord> for LogicalContact {
    fn from(r: ContactRecord) -> Self {
        Self {
            id: r.id,
            primary_id: r.primary_id,
            secondary_id: r.secondary_id,
            short_name: r.short_name,
            full_name: r.full_name,
            push_name: r.push_name,
            business_name: r.business_name,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

fn non_empty(name: &Option<String>) -> Option<&str> {
    name.as_deref().map(str::trim).filter(|n| !n.is_empty())
}

/// Name given to a contact nobody has named yet
pub fn provisional_name(identifier: &str) -> String {
    format!("User ({})", identifier)
}

/// Which display name a value belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayNameField {
    Short,
    Full,
    Push,
    Business,
}

impl DisplayNameField {
    /// Convert to database column
    pub fn column(&self) -> &'static str {
        match self {
            DisplayNameField::Short => "short_name",
            DisplayNameField::Full => "full_name",
            DisplayNameField::Push => "push_name",
            DisplayNameField::Business => "business_name",
        }
    }
}

/// Several display names learned together, e.g. from an address book sync
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayNames {
    pub short_name: Option<String>,
    pub full_name: Option<String>,
    pub push_name: Option<String>,
    pub business_name: Option<String>,
}

impl DisplayNames {
    /// Non-empty names paired with their columns
    fn columns(&self) -> Vec<(&'static str, &str)> {
        [
            (DisplayNameField::Short, &self.short_name),
            (DisplayNameField::Full, &self.full_name),
            (DisplayNameField::Push, &self.push_name),
            (DisplayNameField::Business, &self.business_name),
        ]
        .into_iter()
        .filter_map(|(field, value)| non_empty(value).map(|v| (field.column(), v)))
        .collect()
    }
}

/// How a resolution was satisfied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    /// Row already held everything supplied
    Existing,
    /// New row inserted
    Created,
    /// Missing identifier filled in on an existing row
    Merged,
    /// Two half-rows for the same person folded into one
    Folded,
}

enum Attempt {
    Done(ContactRecord, Resolution),
    Raced,
}

/// Which identifier column a value goes in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Primary,
    Secondary,
}

/// Identity store
pub struct IdentityStore {
    database: Arc<Database>,
}

impl IdentityStore {
    /// Create a new identity store
    pub fn new(database: Arc<Database>) -> Self {
        Self { database }
    }

    // ========================================================================
    // RESOLUTION
    // ========================================================================

    /// Find the contact owning either identifier, creating or merging as
    /// needed.
    ///
    /// `display_name_hint` is only used when a row is created.
    pub fn resolve_or_create(
        &self,
        primary_id: Option<&str>,
        secondary_id: Option<&str>,
        display_name_hint: Option<&str>,
    ) -> Result<LogicalContact> {
        self.resolve(primary_id, secondary_id, display_name_hint)
            .map(|(contact, _)| contact)
    }

    /// Same as [`resolve_or_create`](Self::resolve_or_create), also reporting
    /// how the contact was found.
    pub fn resolve(
        &self,
        primary_id: Option<&str>,
        secondary_id: Option<&str>,
        display_name_hint: Option<&str>,
    ) -> Result<(LogicalContact, Resolution)> {
        let primary = primary_id.map(str::trim).filter(|s| !s.is_empty());
        let secondary = secondary_id.map(str::trim).filter(|s| !s.is_empty());
        let hint = display_name_hint.map(str::trim).filter(|s| !s.is_empty());

        if primary.is_none() && secondary.is_none() {
            return Err(Error::InvariantViolation(
                "a contact needs a primary or secondary identifier".into(),
            ));
        }

        for _ in 0..2 {
            let attempt = self
                .database
                .transaction(|tx| attempt_resolve(tx, primary, secondary, hint))?;

            match attempt {
                Attempt::Done(record, resolution) => {
                    match resolution {
                        Resolution::Existing => {}
                        _ => tracing::info!(
                            contact_id = record.id,
                            resolution = ?resolution,
                            "Resolved contact"
                        ),
                    }
                    return Ok((record.into(), resolution));
                }
                Attempt::Raced => {
                    tracing::debug!("Contact insert lost a race, re-reading");
                }
            }
        }

        Err(Error::InvariantViolation(format!(
            "contact for {:?}/{:?} vanished after a unique-constraint race",
            primary, secondary
        )))
    }

    // ========================================================================
    // LOOKUPS
    // ========================================================================

    /// Pure lookup by primary or secondary identifier
    pub fn lookup_by_either_id(&self, identifier: &str) -> Result<Option<LogicalContact>> {
        Ok(self.database.find_contact_by_either(identifier)?.map(Into::into))
    }

    /// Lookup that only matches the primary slot
    pub fn lookup_by_primary_id(&self, primary_id: &str) -> Result<Option<LogicalContact>> {
        Ok(self.database.find_contact_by_primary(primary_id)?.map(Into::into))
    }

    /// Lookup that only matches the secondary slot
    pub fn lookup_by_secondary_id(&self, secondary_id: &str) -> Result<Option<LogicalContact>> {
        Ok(self.database.find_contact_by_secondary(secondary_id)?.map(Into::into))
    }

    /// Pure lookup by surrogate ID
    pub fn lookup_by_id(&self, contact_id: i64) -> Result<Option<LogicalContact>> {
        Ok(self.database.get_contact(contact_id)?.map(Into::into))
    }

    /// Case-insensitive substring search over the display names
    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<LogicalContact>> {
        let query = query.trim();
        if query.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        Ok(self
            .database
            .search_contacts(query, limit)?
            .into_iter()
            .map(Into::into)
            .collect())
    }

    /// All contacts, oldest first
    pub fn list_all(&self) -> Result<Vec<LogicalContact>> {
        Ok(self.database.get_all_contacts()?.into_iter().map(Into::into).collect())
    }

    /// Number of contacts
    pub fn count(&self) -> Result<i64> {
        self.database.count_contacts()
    }

    // ========================================================================
    // IDENTITY LEARNING
    // ========================================================================

    /// Record that `contact_id` owns `primary_id`.
    ///
    /// If another half-row already holds `primary_id`, the two rows are
    /// folded and the survivor is returned; its surrogate id is the older of
    /// the two.
    pub fn update_primary_id(&self, contact_id: i64, primary_id: &str) -> Result<LogicalContact> {
        self.learn(contact_id, Slot::Primary, primary_id)
    }

    /// Record that `contact_id` owns `secondary_id`. Folds like
    /// [`update_primary_id`](Self::update_primary_id).
    pub fn update_secondary_id(
        &self,
        contact_id: i64,
        secondary_id: &str,
    ) -> Result<LogicalContact> {
        self.learn(contact_id, Slot::Secondary, secondary_id)
    }

    fn learn(&self, contact_id: i64, slot: Slot, value: &str) -> Result<LogicalContact> {
        let value = value.trim();
        if value.is_empty() {
            return Err(Error::InvariantViolation("empty identifier".into()));
        }

        let (record, resolution) = self.database.transaction(|tx| {
            let contact = tx
                .contact_by_id(contact_id)?
                .ok_or_else(|| Error::NotFound(format!("contact {}", contact_id)))?;

            match slot_value(&contact, slot).map(str::to_string) {
                Some(current) if current == value => return Ok((contact, Resolution::Existing)),
                Some(current) => {
                    return Err(conflict(format!(
                        "contact {} already has {:?} identifier {}, refusing {}",
                        contact_id, slot, current, value
                    )))
                }
                None => {}
            }

            let holder = match slot {
                Slot::Primary => tx.contact_by_primary(value)?,
                Slot::Secondary => tx.contact_by_secondary(value)?,
            };

            match holder {
                None => {
                    set_slot(tx, contact.id, slot, value)?;
                    Ok((fetch(tx, contact.id)?, Resolution::Merged))
                }
                Some(other) => {
                    let other_slot = match slot {
                        Slot::Primary => Slot::Secondary,
                        Slot::Secondary => Slot::Primary,
                    };
                    if slot_value(&other, other_slot).is_some() {
                        return Err(conflict(format!(
                            "{} already belongs to contact {} with its own confirmed identifiers",
                            value, other.id
                        )));
                    }
                    Ok((fold(tx, contact, other)?, Resolution::Folded))
                }
            }
        })?;

        if resolution != Resolution::Existing {
            tracing::info!(
                contact_id = record.id,
                resolution = ?resolution,
                "Learned contact identifier"
            );
        }
        Ok(record.into())
    }

    // ========================================================================
    // DISPLAY NAMES
    // ========================================================================

    /// Set one display name. Empty values never overwrite a known name.
    pub fn update_display_name(
        &self,
        contact_id: i64,
        field: DisplayNameField,
        value: &str,
    ) -> Result<()> {
        let value = value.trim();
        if value.is_empty() {
            return Ok(());
        }
        self.write_names(contact_id, &[(field.column(), value)])
    }

    /// Set several display names at once, skipping empty ones
    pub fn update_display_names(&self, contact_id: i64, names: &DisplayNames) -> Result<()> {
        let columns = names.columns();
        if columns.is_empty() {
            return Ok(());
        }
        self.write_names(contact_id, &columns)
    }

    fn write_names(&self, contact_id: i64, columns: &[(&'static str, &str)]) -> Result<()> {
        if !self.database.update_contact_names(contact_id, columns)? {
            return Err(Error::NotFound(format!("contact {}", contact_id)));
        }
        Ok(())
    }
}

// ============================================================================
// TRANSACTION BODIES
// ============================================================================

fn conflict(message: String) -> Error {
    tracing::warn!("{}", message);
    Error::IdentityConflict(message)
}

fn slot_value(contact: &ContactRecord, slot: Slot) -> Option<&str> {
    match slot {
        Slot::Primary => contact.primary_id.as_deref(),
        Slot::Secondary => contact.secondary_id.as_deref(),
    }
}

fn set_slot(tx: &StoreTx<'_>, contact_id: i64, slot: Slot, value: &str) -> Result<()> {
    match slot {
        Slot::Primary => tx.set_contact_primary(contact_id, value),
        Slot::Secondary => tx.set_contact_secondary(contact_id, value),
    }
}

fn fetch(tx: &StoreTx<'_>, contact_id: i64) -> Result<ContactRecord> {
    tx.contact_by_id(contact_id)?
        .ok_or_else(|| Error::InvariantViolation(format!("contact {} disappeared", contact_id)))
}

fn attempt_resolve(
    tx: &StoreTx<'_>,
    primary: Option<&str>,
    secondary: Option<&str>,
    hint: Option<&str>,
) -> Result<Attempt> {
    let by_primary = match primary {
        Some(p) => tx.contact_by_primary(p)?,
        None => None,
    };
    let by_secondary = match secondary {
        Some(s) => tx.contact_by_secondary(s)?,
        None => None,
    };

    let done = match (by_primary, by_secondary) {
        (None, None) => match tx.insert_contact(primary, secondary, hint)? {
            Some(id) => Attempt::Done(fetch(tx, id)?, Resolution::Created),
            None => return Ok(Attempt::Raced),
        },

        (Some(found), None) => match (secondary, found.secondary_id.clone()) {
            (None, _) => Attempt::Done(found, Resolution::Existing),
            (Some(s), None) => {
                tx.set_contact_secondary(found.id, s)?;
                Attempt::Done(fetch(tx, found.id)?, Resolution::Merged)
            }
            (Some(s), Some(current)) => {
                return Err(conflict(format!(
                    "contact {} has secondary identifier {}, refusing {}",
                    found.id, current, s
                )))
            }
        },

        (None, Some(found)) => match (primary, found.primary_id.clone()) {
            (None, _) => Attempt::Done(found, Resolution::Existing),
            (Some(p), None) => {
                tx.set_contact_primary(found.id, p)?;
                Attempt::Done(fetch(tx, found.id)?, Resolution::Merged)
            }
            (Some(p), Some(current)) => {
                return Err(conflict(format!(
                    "contact {} has primary identifier {}, refusing {}",
                    found.id, current, p
                )))
            }
        },

        (Some(a), Some(b)) if a.id == b.id => Attempt::Done(a, Resolution::Existing),

        (Some(a), Some(b)) => {
            // a holds the primary, b the secondary
            if a.secondary_id.is_some() || b.primary_id.is_some() {
                return Err(conflict(format!(
                    "contacts {} and {} both carry confirmed identifiers",
                    a.id, b.id
                )));
            }
            Attempt::Done(fold(tx, a, b)?, Resolution::Folded)
        }
    };

    Ok(done)
}

/// Fold two half-rows into the older one.
///
/// Names missing on the survivor are taken from the absorbed row, and so is
/// its thread binding. Two bindings cannot be reconciled.
fn fold(tx: &StoreTx<'_>, a: ContactRecord, b: ContactRecord) -> Result<ContactRecord> {
    let (survivor, absorbed) = if a.id < b.id { (a, b) } else { (b, a) };

    let survivor_binding = tx.binding_by_contact(survivor.id)?;
    let absorbed_binding = tx.binding_by_contact(absorbed.id)?;
    match (survivor_binding, absorbed_binding) {
        (Some(s), Some(x)) => {
            return Err(conflict(format!(
                "contacts {} and {} are bound to threads {} and {}",
                survivor.id, absorbed.id, s.thread_handle, x.thread_handle
            )))
        }
        (None, Some(_)) => tx.move_binding(absorbed.id, survivor.id)?,
        _ => {}
    }

    let names = DisplayNames {
        short_name: survivor.short_name.is_none().then(|| absorbed.short_name.clone()).flatten(),
        full_name: survivor.full_name.is_none().then(|| absorbed.full_name.clone()).flatten(),
        push_name: survivor.push_name.is_none().then(|| absorbed.push_name.clone()).flatten(),
        business_name: survivor
            .business_name
            .is_none()
            .then(|| absorbed.business_name.clone())
            .flatten(),
    };

    // Free the identifiers before the survivor claims them
    tx.delete_contact(absorbed.id)?;

    if let Some(p) = absorbed.primary_id.as_deref() {
        tx.set_contact_primary(survivor.id, p)?;
    }
    if let Some(s) = absorbed.secondary_id.as_deref() {
        tx.set_contact_secondary(survivor.id, s)?;
    }
    tx.update_contact_names(survivor.id, &names.columns())?;

    tracing::info!(
        contact_id = survivor.id,
        absorbed_id = absorbed.id,
        "Folded duplicate contact"
    );

    fetch(tx, survivor.id)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> IdentityStore {
        IdentityStore::new(Arc::new(Database::open(None).await.unwrap()))
    }

    #[tokio::test]
    async fn test_create_with_primary_only() {
        let identities = store().await;

        let contact = identities.resolve_or_create(Some("15551234567"), None, None).unwrap();
        assert_eq!(contact.primary_id.as_deref(), Some("15551234567"));
        assert!(contact.secondary_id.is_none());
        assert_eq!(contact.display_label(), "User (15551234567)");

        // Second resolution finds the same row
        let again = identities.resolve_or_create(Some("15551234567"), None, None).unwrap();
        assert_eq!(again.id, contact.id);
        assert_eq!(identities.count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_requires_an_identifier() {
        let identities = store().await;
        let result = identities.resolve_or_create(None, Some("  "), Some("Ghost"));
        assert!(matches!(result, Err(Error::InvariantViolation(_))));
        assert_eq!(identities.count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_slot_lookups() {
        let identities = store().await;

        let phone = identities.resolve_or_create(Some("99"), None, None).unwrap();
        let alias = identities.resolve_or_create(None, Some("99"), None).unwrap();
        assert_ne!(phone.id, alias.id);

        assert_eq!(identities.lookup_by_primary_id("99").unwrap().unwrap().id, phone.id);
        assert_eq!(identities.lookup_by_secondary_id("99").unwrap().unwrap().id, alias.id);
        assert!(identities.lookup_by_primary_id("42").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_hint_used_only_on_create() {
        let identities = store().await;

        let contact = identities.resolve_or_create(Some("111"), None, Some("Alice")).unwrap();
        assert_eq!(contact.short_name.as_deref(), Some("Alice"));

        let again = identities.resolve_or_create(Some("111"), None, Some("Mallory")).unwrap();
        assert_eq!(again.short_name.as_deref(), Some("Alice"));
    }

    #[tokio::test]
    async fn test_merge_when_other_identifier_arrives() {
        let identities = store().await;

        let a = identities.resolve_or_create(Some("111"), None, None).unwrap();
        let (merged, resolution) = identities.resolve(Some("111"), Some("99"), None).unwrap();
        assert_eq!(resolution, Resolution::Merged);
        assert_eq!(merged.id, a.id);
        assert_eq!(merged.secondary_id.as_deref(), Some("99"));

        let (same, resolution) = identities.resolve(Some("111"), Some("99"), None).unwrap();
        assert_eq!(resolution, Resolution::Existing);
        assert_eq!(same.id, a.id);
    }

    #[tokio::test]
    async fn test_interleaved_identifiers_end_in_one_row() {
        let identities = store().await;

        let a = identities.resolve_or_create(Some("A"), None, None).unwrap();
        let b = identities.resolve_or_create(None, Some("B"), None).unwrap();
        assert_ne!(a.id, b.id);

        let (both, resolution) = identities.resolve(Some("A"), Some("B"), None).unwrap();
        assert_eq!(resolution, Resolution::Folded);
        assert_eq!(both.id, a.id);
        assert_eq!(both.primary_id.as_deref(), Some("A"));
        assert_eq!(both.secondary_id.as_deref(), Some("B"));
        assert_eq!(identities.count().unwrap(), 1);

        assert_eq!(identities.lookup_by_either_id("A").unwrap().unwrap().id, a.id);
        assert_eq!(identities.lookup_by_either_id("B").unwrap().unwrap().id, a.id);
        assert!(identities.lookup_by_id(b.id).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_conflicting_identifiers_are_surfaced() {
        let identities = store().await;

        identities.resolve_or_create(Some("111"), Some("99"), None).unwrap();

        // 111 is already paired with 99
        let result = identities.resolve_or_create(Some("111"), Some("98"), None);
        assert!(matches!(result, Err(Error::IdentityConflict(_))));

        // Two fully-known contacts cannot be merged
        identities.resolve_or_create(Some("222"), Some("88"), None).unwrap();
        let result = identities.resolve_or_create(Some("111"), Some("88"), None);
        assert!(matches!(result, Err(Error::IdentityConflict(_))));

        assert_eq!(identities.count().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_update_secondary_id_keeps_surrogate() {
        let identities = store().await;

        let contact = identities.resolve_or_create(Some("+15551234567"), None, None).unwrap();
        let updated = identities.update_secondary_id(contact.id, "priv:99").unwrap();

        assert_eq!(updated.id, contact.id);
        assert_eq!(updated.secondary_id.as_deref(), Some("priv:99"));
        assert_eq!(identities.count().unwrap(), 1);
        assert_eq!(identities.lookup_by_either_id("priv:99").unwrap().unwrap().id, contact.id);
    }

    #[tokio::test]
    async fn test_update_primary_id_folds_tracked_rows() {
        let identities = store().await;

        let phone = identities.resolve_or_create(Some("111"), None, Some("Phone")).unwrap();
        let alias = identities.resolve_or_create(None, Some("99"), None).unwrap();
        identities
            .update_display_name(alias.id, DisplayNameField::Push, "Alias Push")
            .unwrap();

        let merged = identities.update_primary_id(alias.id, "111").unwrap();
        assert_eq!(merged.id, phone.id);
        assert_eq!(merged.secondary_id.as_deref(), Some("99"));
        assert_eq!(merged.short_name.as_deref(), Some("Phone"));
        assert_eq!(merged.push_name.as_deref(), Some("Alias Push"));
        assert_eq!(identities.count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_update_primary_id_rejects_overwrite() {
        let identities = store().await;

        let contact = identities.resolve_or_create(Some("111"), None, None).unwrap();
        let result = identities.update_primary_id(contact.id, "222");
        assert!(matches!(result, Err(Error::IdentityConflict(_))));

        // Re-learning the same value is fine
        assert_eq!(identities.update_primary_id(contact.id, "111").unwrap().id, contact.id);

        let result = identities.update_primary_id(contact.id + 100, "333");
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_display_names() {
        let identities = store().await;
        let contact = identities.resolve_or_create(Some("111"), None, None).unwrap();

        identities
            .update_display_name(contact.id, DisplayNameField::Push, "Al")
            .unwrap();
        // Blank data never overwrites a known name
        identities
            .update_display_name(contact.id, DisplayNameField::Push, "   ")
            .unwrap();

        let contact = identities.lookup_by_id(contact.id).unwrap().unwrap();
        assert_eq!(contact.push_name.as_deref(), Some("Al"));
        assert_eq!(contact.display_label(), "Al (111)");

        identities
            .update_display_names(
                contact.id,
                &DisplayNames {
                    business_name: Some("Acme".into()),
                    full_name: Some("".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        let contact = identities.lookup_by_id(contact.id).unwrap().unwrap();
        assert_eq!(contact.display_label(), "Acme (111)");
        assert!(contact.full_name.is_none());

        identities
            .update_display_name(contact.id, DisplayNameField::Full, "Alice Liddell")
            .unwrap();
        let contact = identities.lookup_by_id(contact.id).unwrap().unwrap();
        assert_eq!(contact.display_label(), "Alice Liddell");
    }

    #[tokio::test]
    async fn test_display_name_on_missing_contact() {
        let identities = store().await;
        let result = identities.update_display_name(42, DisplayNameField::Full, "Nobody");
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_search() {
        let identities = store().await;
        let alice = identities.resolve_or_create(Some("111"), None, Some("Alice")).unwrap();
        let bob = identities.resolve_or_create(Some("222"), None, None).unwrap();
        identities
            .update_display_name(bob.id, DisplayNameField::Business, "Bob's Alice Bakery")
            .unwrap();

        let hits = identities.search("alice", 10).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, alice.id);

        assert_eq!(identities.search("alice", 1).unwrap().len(), 1);
        assert!(identities.search("", 10).unwrap().is_empty());
        assert!(identities.search("zed", 10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_resolution_creates_one_row() {
        let identities = store().await;

        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    identities.resolve_or_create(Some("15550000000"), None, None).unwrap();
                });
            }
        });

        assert_eq!(identities.count().unwrap(), 1);
    }
}
