//! Switchyard operator CLI
//!
//! Inspects and maintains the bridge's correlation database:
//!
//! 1. **Contacts**: show, search and look up logical contacts by either of
//!    their source-platform identifiers.
//!
//! 2. **Bindings**: list contact → destination thread bindings and unlink a
//!    thread so the next message creates a fresh one.
//!
//! 3. **Messages**: follow a message pair in either direction, and wipe all
//!    pairs after an explicit confirmation.
//!
//! Results are printed as JSON on stdout; logs go to stderr.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;
use switchyard_core::config::DEFAULT_BUSY_TIMEOUT_MS;
use switchyard_core::{CorrelationEngine, EngineConfig, StoreConfig};

use commands::Command;

// ── CLI Arguments ─────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "switchyard", version, about = "Bridge correlation database tool")]
struct Args {
    /// Path to the SQLite database
    #[arg(short, long, env = "SWITCHYARD_DB")]
    database: String,

    /// How long to wait on a locked database, in milliseconds
    #[arg(long, default_value_t = DEFAULT_BUSY_TIMEOUT_MS, env = "SWITCHYARD_BUSY_TIMEOUT_MS")]
    busy_timeout_ms: u64,

    /// Server assumed for bare phone numbers
    #[arg(
        long,
        default_value = switchyard_core::config::DEFAULT_USER_SERVER,
        env = "SWITCHYARD_DEFAULT_SERVER"
    )]
    default_server: String,

    /// Emit logs as JSON lines
    #[arg(long, env = "SWITCHYARD_LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

// ── Entry Point ───────────────────────────────────────────────────────────────

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "switchyard=info,switchyard_core=info".into());

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();
    init_tracing(args.log_json);

    let store = StoreConfig {
        database_path: Some(args.database),
        busy_timeout_ms: args.busy_timeout_ms,
    };
    let config = EngineConfig {
        default_user_server: args.default_server,
    };

    let engine = CorrelationEngine::open(&store, config).await?;
    tracing::debug!(command = ?args.command, "Running command");

    let output = commands::execute(&engine, args.command)?;
    println!("{}", serde_json::to_string_pretty(&output)?);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use commands::{BindingsCommand, MessagesCommand};

    #[test]
    fn test_parse_args() {
        let args = Args::try_parse_from([
            "switchyard",
            "--database",
            "/tmp/bridge.db",
            "messages",
            "source",
            "42",
            "7",
        ])
        .unwrap();

        assert_eq!(args.database, "/tmp/bridge.db");
        assert_eq!(args.busy_timeout_ms, DEFAULT_BUSY_TIMEOUT_MS);
        assert!(matches!(
            args.command,
            Command::Messages {
                command: MessagesCommand::Source { ref thread, msg: 7 }
            } if thread == "42"
        ));
    }

    #[test]
    fn test_parse_unlink() {
        let args = Args::try_parse_from([
            "switchyard",
            "-d",
            "bridge.db",
            "--log-json",
            "bindings",
            "unlink",
            "9",
        ])
        .unwrap();

        assert!(args.log_json);
        assert!(matches!(
            args.command,
            Command::Bindings {
                command: BindingsCommand::Unlink { ref thread }
            } if thread == "9"
        ));
    }
}
