//! CLI argument definitions using clap

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// pairlink - authenticated point-to-point links over TCP
#[derive(Parser, Debug)]
#[command(name = "pairlink")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file (default: ~/.config/pairlink/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Accept connections and log every message
    #[command(alias = "l")]
    Listen {
        /// Address to listen on
        #[arg(short, long, default_value = "0.0.0.0:7400")]
        bind: String,

        /// Shared secret (overrides the config file)
        #[arg(short, long)]
        secret: Option<String>,

        /// Send every received message back to its sender
        #[arg(long)]
        echo: bool,
    },

    /// Connect to a listener and exchange messages
    #[command(alias = "d")]
    Dial {
        /// Remote host
        host: String,

        /// Remote port
        port: u16,

        /// Shared secret (overrides the config file)
        #[arg(short, long)]
        secret: Option<String>,

        /// Text message to send; repeatable. Without --text or --hex,
        /// stdin lines are sent as text.
        #[arg(short, long)]
        text: Vec<String>,

        /// Hex-encoded bytes message to send; repeatable
        #[arg(long, value_parser = parse_hex)]
        hex: Vec<HexPayload>,
    },
}

/// Bytes parsed from a hex argument
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HexPayload(pub Vec<u8>);

fn parse_hex(s: &str) -> Result<HexPayload, String> {
    let digits: String = s.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = hex::decode(&digits).map_err(|e| format!("invalid hex '{}': {}", s, e))?;
    if bytes.is_empty() {
        return Err("hex payload must not be empty".to_string());
    }
    Ok(HexPayload(bytes))
}
