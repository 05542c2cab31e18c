//! Subcommands and their execution against the engine.

use clap::Subcommand;
use color_eyre::eyre::{bail, eyre, Result};
use serde::Serialize;
use serde_json::{json, Value};
use switchyard_core::{CorrelationEngine, SourceAddress, ThreadHandle};

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Row counts across all tables
    Stats,

    /// Inspect logical contacts
    Contacts {
        #[command(subcommand)]
        command: ContactsCommand,
    },

    /// Inspect and unlink destination threads
    Bindings {
        #[command(subcommand)]
        command: BindingsCommand,
    },

    /// Follow or reset message pairs
    Messages {
        #[command(subcommand)]
        command: MessagesCommand,
    },

    /// Inspect expiring-message settings
    Ephemeral {
        #[command(subcommand)]
        command: EphemeralCommand,
    },
}

#[derive(Subcommand, Debug)]
pub enum ContactsCommand {
    /// Show one contact by surrogate id
    Show { id: i64 },

    /// Search display names
    Find {
        query: String,
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// Find the contact owning an identifier or raw address
    Lookup { identifier: String },
}

#[derive(Subcommand, Debug)]
pub enum BindingsCommand {
    /// List every contact → thread binding
    List,

    /// Detach a thread from its contact
    Unlink { thread: String },
}

#[derive(Subcommand, Debug)]
pub enum MessagesCommand {
    /// Where did a destination message come from?
    Source { thread: String, msg: i64 },

    /// Where was a source message forwarded to?
    Dest { msg: String, chat: String },

    /// Delete every message pair
    Reset {
        /// Confirm the reset
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum EphemeralCommand {
    /// Expiring-message policy of a chat
    Get { chat: String },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BindingRow {
    thread_handle: ThreadHandle,
    contact_id: i64,
    label: Option<String>,
    chat: Option<String>,
}

/// Run one command and return its JSON output
pub fn execute(engine: &CorrelationEngine, command: Command) -> Result<Value> {
    let output = match command {
        Command::Stats => serde_json::to_value(engine.stats()?)?,

        Command::Contacts { command } => match command {
            ContactsCommand::Show { id } => {
                let contact = engine
                    .identities()
                    .lookup_by_id(id)?
                    .ok_or_else(|| eyre!("no contact with id {}", id))?;
                serde_json::to_value(contact)?
            }
            ContactsCommand::Find { query, limit } => {
                serde_json::to_value(engine.identities().search(&query, limit)?)?
            }
            ContactsCommand::Lookup { identifier } => {
                let mut contact = engine.identities().lookup_by_either_id(&identifier)?;
                if contact.is_none() {
                    if let Ok(address) =
                        SourceAddress::parse(&identifier, &engine.config().default_user_server)
                    {
                        contact = engine.identities().lookup_by_either_id(&address.identity_key())?;
                    }
                }
                let contact = contact.ok_or_else(|| eyre!("no contact owns {}", identifier))?;
                serde_json::to_value(contact)?
            }
        },

        Command::Bindings { command } => match command {
            BindingsCommand::List => {
                let mut rows = Vec::new();
                for binding in engine.threads().list_all()? {
                    let contact = engine.identities().lookup_by_id(binding.contact_id)?;
                    let chat = engine.chat_for_thread(&binding.thread_handle)?;
                    rows.push(BindingRow {
                        label: contact.map(|c| c.display_label()),
                        contact_id: binding.contact_id,
                        thread_handle: binding.thread_handle,
                        chat,
                    });
                }
                serde_json::to_value(rows)?
            }
            BindingsCommand::Unlink { thread } => {
                let thread = ThreadHandle::new(thread);
                if !engine.unlink_thread(&thread)? {
                    bail!("thread {} is not bound", thread);
                }
                json!({ "unlinked": thread })
            }
        },

        Command::Messages { command } => match command {
            MessagesCommand::Source { thread, msg } => {
                let source = engine
                    .source_of(&ThreadHandle::new(thread.clone()), msg)?
                    .ok_or_else(|| eyre!("no pair for message {} in thread {}", msg, thread))?;
                serde_json::to_value(source)?
            }
            MessagesCommand::Dest { msg, chat } => {
                let dest = engine
                    .destination_of(&msg, &chat)?
                    .ok_or_else(|| eyre!("no pair for message {} in chat {}", msg, chat))?;
                serde_json::to_value(dest)?
            }
            MessagesCommand::Reset { yes } => {
                if !yes {
                    bail!("refusing to delete every message pair without --yes");
                }
                json!({ "deleted": engine.reset_correlations()? })
            }
        },

        Command::Ephemeral { command } => match command {
            EphemeralCommand::Get { chat } => {
                serde_json::to_value(engine.ephemeral_policy(&chat)?)?
            }
        },
    };

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use switchyard_core::{Database, EngineConfig};

    async fn engine() -> CorrelationEngine {
        let db = Arc::new(Database::open(None).await.unwrap());
        CorrelationEngine::new(db, EngineConfig::default())
    }

    #[tokio::test]
    async fn test_stats() {
        let engine = engine().await;
        engine.record_forward("m1", "c1", "p1", &ThreadHandle::from(1), 1).unwrap();

        let out = execute(&engine, Command::Stats).unwrap();
        assert_eq!(out["correlations"], 1);
        assert_eq!(out["unread"], 1);
        assert_eq!(out["contacts"], 0);
    }

    #[tokio::test]
    async fn test_contact_lookup_accepts_raw_address() {
        let engine = engine().await;
        let contact = engine.resolve_sender("15551234567@s.whatsapp.net", None).unwrap();

        let out = execute(
            &engine,
            Command::Contacts {
                command: ContactsCommand::Lookup {
                    identifier: "+15551234567".into(),
                },
            },
        )
        .unwrap();
        assert_eq!(out["id"], contact.id);
        assert_eq!(out["primaryId"], "15551234567");

        let missing = execute(
            &engine,
            Command::Contacts {
                command: ContactsCommand::Show { id: 999 },
            },
        );
        assert!(missing.is_err());
    }

    #[tokio::test]
    async fn test_bindings_list_and_unlink() {
        let engine = engine().await;
        engine.route_chat("111", Some("Alice")).unwrap();
        engine.bind_chat("111", &ThreadHandle::from(42)).unwrap();

        let out = execute(
            &engine,
            Command::Bindings {
                command: BindingsCommand::List,
            },
        )
        .unwrap();
        assert_eq!(out[0]["threadHandle"], "42");
        assert_eq!(out[0]["label"], "Alice (111)");
        assert_eq!(out[0]["chat"], "111@s.whatsapp.net");

        let unlink = |thread: &str| {
            execute(
                &engine,
                Command::Bindings {
                    command: BindingsCommand::Unlink {
                        thread: thread.into(),
                    },
                },
            )
        };
        assert_eq!(unlink("42").unwrap()["unlinked"], "42");
        assert!(unlink("42").is_err());
    }

    #[tokio::test]
    async fn test_messages() {
        let engine = engine().await;
        engine.record_forward("wamsg1", "chat1", "p1", &ThreadHandle::from(42), 7).unwrap();

        let out = execute(
            &engine,
            Command::Messages {
                command: MessagesCommand::Source {
                    thread: "42".into(),
                    msg: 7,
                },
            },
        )
        .unwrap();
        assert_eq!(out["msgId"], "wamsg1");
        assert_eq!(out["chatId"], "chat1");

        let out = execute(
            &engine,
            Command::Messages {
                command: MessagesCommand::Dest {
                    msg: "wamsg1".into(),
                    chat: "chat1".into(),
                },
            },
        )
        .unwrap();
        assert_eq!(out["thread"], "42");
        assert_eq!(out["msgId"], 7);
    }

    #[tokio::test]
    async fn test_reset_requires_confirmation() {
        let engine = engine().await;
        engine.record_forward("m1", "c1", "p1", &ThreadHandle::from(1), 1).unwrap();

        let refused = execute(
            &engine,
            Command::Messages {
                command: MessagesCommand::Reset { yes: false },
            },
        );
        assert!(refused.is_err());
        assert_eq!(engine.stats().unwrap().correlations, 1);

        let out = execute(
            &engine,
            Command::Messages {
                command: MessagesCommand::Reset { yes: true },
            },
        )
        .unwrap();
        assert_eq!(out["deleted"], 1);
        assert_eq!(engine.stats().unwrap().correlations, 0);
    }

    #[tokio::test]
    async fn test_ephemeral_get() {
        let engine = engine().await;
        engine.set_ephemeral("chat1", true, 3600).unwrap();

        let out = execute(
            &engine,
            Command::Ephemeral {
                command: EphemeralCommand::Get { chat: "chat1".into() },
            },
        )
        .unwrap();
        assert_eq!(out["enabled"], true);
        assert_eq!(out["timerSecs"], 3600);

        let out = execute(
            &engine,
            Command::Ephemeral {
                command: EphemeralCommand::Get { chat: "chat2".into() },
            },
        )
        .unwrap();
        assert_eq!(out["enabled"], false);
    }
}
