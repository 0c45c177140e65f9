//! Command-line interface definitions for Vocab Card.
//!
//! This module defines the CLI arguments and subcommands using the `clap`
//! crate. Without a subcommand the daily scheduler runs in the foreground.
//! Other subcommands are handed to a running `serve` when one is listening
//! on the control address, so they share its locks and settings.

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Command-line arguments for the Vocab Card service.
///
/// # Examples
///
/// ```sh
/// # Run the daily scheduler with ./config.yaml
/// vocab_card
///
/// # Preview a specific word with another settings file
/// vocab_card --config /etc/vocab_card.yaml preview abandon
///
/// # Full cycle against a destination in 60 seconds, without sending anything
/// vocab_card --dry-run test my-group --delay 60
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Path to the YAML settings file (created on first change if absent)
    #[arg(short, long, env = "VOCAB_CARD_CONFIG", default_value = "config.yaml")]
    pub config: PathBuf,

    /// Log deliveries instead of calling the webhook (implies --local)
    #[arg(long)]
    pub dry_run: bool,

    /// Run the command in this process even if a server is listening
    #[arg(long)]
    pub local: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    /// Run the daily generate/push scheduler until interrupted
    Serve,
    /// Show an entry and render its card without marking it delivered
    Preview {
        /// Entry to preview; a fresh selection when omitted
        word: Option<String>,
    },
    /// Render the next card without marking it delivered
    Card,
    /// Show progress of the active collection
    Status,
    /// Generate and push a card immediately
    Now,
    /// Register a destination for the daily card
    Register { destination: String },
    /// Stop sending the daily card to a destination
    Unregister { destination: String },
    /// Switch the active collection, or list collections when omitted
    Use { collection: Option<String> },
    /// List registered collections
    List,
    /// Send a test card, or run a full cycle after a delay
    Test {
        destination: String,
        /// Seconds to wait before a full generate and push cycle
        #[arg(short, long, default_value_t = 0)]
        delay: u64,
    },
    /// Summarize the available commands
    Commands,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["vocab_card"]);
        assert_eq!(cli.config, PathBuf::from("config.yaml"));
        assert!(!cli.dry_run);
        assert!(!cli.local);
        assert_eq!(cli.command, None);
    }

    #[test]
    fn test_cli_subcommands() {
        let cli = Cli::parse_from(["vocab_card", "-c", "/tmp/cards.yaml", "preview", "abandon"]);
        assert_eq!(cli.config, PathBuf::from("/tmp/cards.yaml"));
        assert_eq!(
            cli.command,
            Some(Command::Preview {
                word: Some("abandon".into())
            })
        );

        let cli = Cli::parse_from(["vocab_card", "--dry-run", "test", "group-1", "--delay", "60"]);
        assert!(cli.dry_run);
        assert_eq!(
            cli.command,
            Some(Command::Test {
                destination: "group-1".into(),
                delay: 60
            })
        );

        let cli = Cli::parse_from(["vocab_card", "use"]);
        assert_eq!(cli.command, Some(Command::Use { collection: None }));
    }

    #[test]
    fn test_command_wire_format() {
        let command = Command::Register {
            destination: "group-1".into(),
        };
        let json = serde_json::to_value(&command).unwrap();
        assert_eq!(json, serde_json::json!({"command": "register", "destination": "group-1"}));
        assert_eq!(serde_json::from_value::<Command>(json).unwrap(), command);

        let cli = Cli::parse_from(["vocab_card", "--local", "now"]);
        assert!(cli.local);
    }

    #[test]
    fn test_cli_requires_destination() {
        assert!(Cli::try_parse_from(["vocab_card", "register"]).is_err());
    }
}
