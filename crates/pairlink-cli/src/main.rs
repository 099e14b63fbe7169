//! pairlink - command-line listener and dialer
//!
//! `pairlink listen` accepts authenticated peers and logs (or echoes) their
//! messages; `pairlink dial` connects to a listener and exchanges messages
//! from the command line or stdin.

use std::process::ExitCode;

use clap::Parser;
use tracing::Level;
use tracing_subscriber::EnvFilter;

use pairlink_peer::PeerConfig;

mod cli;
mod dial;
mod listen;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
        EnvFilter::new(format!(
            "pairlink={},pairlink_peer={},pairlink_common={}",
            level, level, level
        ))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = PeerConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Listen { bind, secret, echo } => {
            if secret.is_some() {
                config.secret = secret;
            }
            config.validate()?;
            listen::run(config, bind, echo).await
        }
        Commands::Dial {
            host,
            port,
            secret,
            text,
            hex,
        } => {
            if secret.is_some() {
                config.secret = secret;
            }
            config.validate()?;
            dial::run(config, host, port, dial::Outgoing { text, hex }).await
        }
    }
}
