//! Source-platform address parsing.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        ADDRESS FORMS                                    │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  "+15551234567"                    → 15551234567 @ s.whatsapp.net       │
//! │  "15551234567:12@s.whatsapp.net"   → 15551234567 @ s.whatsapp.net       │
//! │  "99.0:3@lid"                      → 99          @ lid                  │
//! │  "1203630@g.us"                    → 1203630     @ g.us                 │
//! │                                                                         │
//! │  Server          Kind        Identity key                               │
//! │  ─────────────   ─────────   ────────────                               │
//! │  s.whatsapp.net  Primary     user                                       │
//! │  c.us            Primary     user                                       │
//! │  lid             Secondary   user                                       │
//! │  g.us            Group       user@server                                │
//! │  broadcast       Broadcast   user@server                                │
//! │  anything else   Other       user@server                                │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};

/// Server of hidden alias addresses.
pub const HIDDEN_USER_SERVER: &str = "lid";
/// Legacy server name for phone-number users.
pub const LEGACY_USER_SERVER: &str = "c.us";
/// Server of group chats.
pub const GROUP_SERVER: &str = "g.us";
/// Server of broadcast lists and status updates.
pub const BROADCAST_SERVER: &str = "broadcast";

/// What an address points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressKind {
    /// Phone-number user
    Primary,
    /// Hidden alias user
    Secondary,
    Group,
    Broadcast,
    Other,
}

/// A parsed source-platform address, without device or agent suffixes
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceAddress {
    user: String,
    server: String,
    default_server: bool,
}

impl SourceAddress {
    /// Parse a raw address.
    ///
    /// A string without `@` is a bare phone user on `default_server`.
    /// Device and agent suffixes only exist on user servers; other users
    /// are kept verbatim.
    pub fn parse(raw: &str, default_server: &str) -> Result<Self> {
        let raw = raw.trim();
        let raw = raw.strip_prefix('+').unwrap_or(raw);

        let (user, server) = match raw.split_once('@') {
            Some((user, server)) => (user, server),
            None => (raw, default_server),
        };

        let on_default = server == default_server;
        let user_server =
            on_default || server == HIDDEN_USER_SERVER || server == LEGACY_USER_SERVER;

        // user.agent:device
        let user = if user_server {
            let user = user.split_once(':').map_or(user, |(u, _)| u);
            user.split_once('.').map_or(user, |(u, _)| u)
        } else {
            user
        };

        if user.is_empty() {
            return Err(Error::InvalidAddress(format!("empty user in {:?}", raw)));
        }
        if server.is_empty() || server.contains('@') {
            return Err(Error::InvalidAddress(format!("bad server in {:?}", raw)));
        }

        Ok(Self {
            user: user.to_string(),
            server: server.to_string(),
            default_server: on_default,
        })
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    /// Classify the address by its server
    pub fn kind(&self) -> AddressKind {
        match self.server.as_str() {
            HIDDEN_USER_SERVER => AddressKind::Secondary,
            LEGACY_USER_SERVER => AddressKind::Primary,
            GROUP_SERVER => AddressKind::Group,
            BROADCAST_SERVER => AddressKind::Broadcast,
            _ if self.default_server => AddressKind::Primary,
            _ => AddressKind::Other,
        }
    }

    /// Whether this is a hidden alias address
    pub fn is_hidden(&self) -> bool {
        self.kind() == AddressKind::Secondary
    }

    /// Canonical string stored in the identity table
    pub fn identity_key(&self) -> String {
        match self.kind() {
            AddressKind::Primary | AddressKind::Secondary => self.user.clone(),
            _ => format!("{}@{}", self.user, self.server),
        }
    }
}

impl fmt::Display for SourceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.user, self.server)
    }
}

/// Identifiers of one sender, slotted by kind
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SenderIds {
    pub primary: Option<String>,
    pub secondary: Option<String>,
}

/// Slot a sender address and its optional alternate into primary/secondary.
///
/// Platforms report a sender under one address and sometimes the other form
/// alongside it. Two hidden addresses, or two different public ones, cannot
/// describe one contact.
pub fn split_sender(address: &SourceAddress, alt: Option<&SourceAddress>) -> Result<SenderIds> {
    let Some(alt) = alt else {
        return Ok(if address.is_hidden() {
            SenderIds {
                primary: None,
                secondary: Some(address.identity_key()),
            }
        } else {
            SenderIds {
                primary: Some(address.identity_key()),
                secondary: None,
            }
        });
    };

    match (address.is_hidden(), alt.is_hidden()) {
        (true, true) => Err(Error::InvariantViolation(format!(
            "both {} and {} are hidden addresses",
            address, alt
        ))),
        (false, false) if address.identity_key() != alt.identity_key() => {
            Err(Error::InvariantViolation(format!(
                "{} and {} are different public addresses",
                address, alt
            )))
        }
        (false, false) => Ok(SenderIds {
            primary: Some(address.identity_key()),
            secondary: None,
        }),
        (true, false) => Ok(SenderIds {
            primary: Some(alt.identity_key()),
            secondary: Some(address.identity_key()),
        }),
        (false, true) => Ok(SenderIds {
            primary: Some(address.identity_key()),
            secondary: Some(alt.identity_key()),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_USER_SERVER;

    fn parse(raw: &str) -> SourceAddress {
        SourceAddress::parse(raw, DEFAULT_USER_SERVER).unwrap()
    }

    #[test]
    fn test_parse_bare_phone_number() {
        let addr = parse("+15551234567");
        assert_eq!(addr.user(), "15551234567");
        assert_eq!(addr.server(), "s.whatsapp.net");
        assert_eq!(addr.kind(), AddressKind::Primary);
        assert_eq!(addr.identity_key(), "15551234567");
    }

    #[test]
    fn test_parse_strips_device_and_agent() {
        assert_eq!(parse("15551234567:12@s.whatsapp.net").identity_key(), "15551234567");

        let hidden = parse("99.0:3@lid");
        assert_eq!(hidden.user(), "99");
        assert_eq!(hidden.kind(), AddressKind::Secondary);
        assert_eq!(hidden.identity_key(), "99");
    }

    #[test]
    fn test_parse_kinds() {
        assert_eq!(parse("1203630@g.us").kind(), AddressKind::Group);
        assert_eq!(parse("1203630@g.us").identity_key(), "1203630@g.us");
        assert_eq!(parse("status@broadcast").kind(), AddressKind::Broadcast);
        assert_eq!(parse("123@c.us").kind(), AddressKind::Primary);
        assert_eq!(parse("bot@example.net").kind(), AddressKind::Other);
    }

    #[test]
    fn test_parse_keeps_suffixes_off_user_servers() {
        let other = parse("first.last@example.net");
        assert_eq!(other.user(), "first.last");
        assert_eq!(other.identity_key(), "first.last@example.net");

        assert_eq!(parse("1203630.1:2@g.us").identity_key(), "1203630.1:2@g.us");
        assert_eq!(parse("123.0:4@c.us").identity_key(), "123");
    }

    #[test]
    fn test_parse_rejects_empty_user() {
        for raw in ["", "+", "@s.whatsapp.net", ":3@lid"] {
            let result = SourceAddress::parse(raw, DEFAULT_USER_SERVER);
            assert!(matches!(result, Err(Error::InvalidAddress(_))), "{:?}", raw);
        }
        assert!(SourceAddress::parse("1@", DEFAULT_USER_SERVER).is_err());
    }

    #[test]
    fn test_split_sender() {
        let phone = parse("15551234567@s.whatsapp.net");
        let hidden = parse("99@lid");

        let ids = split_sender(&phone, None).unwrap();
        assert_eq!(ids.primary.as_deref(), Some("15551234567"));
        assert!(ids.secondary.is_none());

        let ids = split_sender(&hidden, Some(&phone)).unwrap();
        assert_eq!(ids.primary.as_deref(), Some("15551234567"));
        assert_eq!(ids.secondary.as_deref(), Some("99"));

        let ids = split_sender(&phone, Some(&hidden)).unwrap();
        assert_eq!(ids.secondary.as_deref(), Some("99"));
    }

    #[test]
    fn test_split_sender_rejects_impossible_pairs() {
        let a = parse("1@lid");
        let b = parse("2@lid");
        assert!(matches!(split_sender(&a, Some(&b)), Err(Error::InvariantViolation(_))));

        let c = parse("111");
        let d = parse("222");
        assert!(matches!(split_sender(&c, Some(&d)), Err(Error::InvariantViolation(_))));

        // Same public address twice is harmless
        assert!(split_sender(&c, Some(&c)).is_ok());
    }
}
