//! Expiring-message policy per source chat.
//!
//! A chat with no stored row is disabled with a zero timer.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::Result;
use crate::storage::{Database, EphemeralRecord};

/// Expiring-message setting of one chat
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EphemeralPolicy {
    pub chat_id: String,
    pub enabled: bool,
    pub timer_secs: u32,
}

impl EphemeralPolicy {
    /// Policy assumed for chats nobody has configured
    pub fn disabled(chat_id: impl Into<String>) -> Self {
        Self {
            chat_id: chat_id.into(),
            enabled: false,
            timer_secs: 0,
        }
    }
}

impl From<EphemeralRecord> for EphemeralPolicy {
    fn from(r: EphemeralRecord) -> Self {
        Self {
            chat_id: r.chat_id,
            enabled: r.enabled,
            timer_secs: r.timer_secs,
        }
    }
}

/// Ephemeral policy store
pub struct EphemeralStore {
    database: Arc<Database>,
}

impl EphemeralStore {
    pub fn new(database: Arc<Database>) -> Self {
        Self { database }
    }

    /// Store the setting the source platform reported for a chat
    pub fn set(&self, chat_id: &str, enabled: bool, timer_secs: u32) -> Result<()> {
        self.database.set_ephemeral_setting(chat_id, enabled, timer_secs)?;
        tracing::debug!(chat_id, enabled, timer_secs, "Stored ephemeral setting");
        Ok(())
    }

    /// Stored setting, or None if the chat was never configured
    pub fn get(&self, chat_id: &str) -> Result<Option<EphemeralPolicy>> {
        Ok(self.database.get_ephemeral_setting(chat_id)?.map(Into::into))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_and_get() {
        let store = EphemeralStore::new(Arc::new(Database::open(None).await.unwrap()));
        assert!(store.get("chat1").unwrap().is_none());

        store.set("chat1", true, 604_800).unwrap();
        assert_eq!(
            store.get("chat1").unwrap().unwrap(),
            EphemeralPolicy {
                chat_id: "chat1".into(),
                enabled: true,
                timer_secs: 604_800,
            }
        );

        store.set("chat1", false, 0).unwrap();
        assert_eq!(store.get("chat1").unwrap().unwrap(), EphemeralPolicy::disabled("chat1"));
    }
}
