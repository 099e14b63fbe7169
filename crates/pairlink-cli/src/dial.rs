//! `pairlink dial`

use anyhow::{bail, Context};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info};

use pairlink_peer::{CloseReason, Peer, PeerConfig};

use crate::cli::HexPayload;

/// Lifecycle events forwarded from the peer callbacks
#[derive(Debug)]
enum Event {
    Connected,
    Closed(CloseReason),
}

/// Messages given on the command line
#[derive(Debug, Default)]
pub struct Outgoing {
    pub text: Vec<String>,
    pub hex: Vec<HexPayload>,
}

impl Outgoing {
    fn is_empty(&self) -> bool {
        self.text.is_empty() && self.hex.is_empty()
    }
}

pub async fn run(
    config: PeerConfig,
    host: String,
    port: u16,
    outgoing: Outgoing,
) -> anyhow::Result<()> {
    let (events_tx, mut events) = mpsc::unbounded_channel();
    let close_tx = events_tx.clone();

    let peer = Peer::builder()
        .config(config)
        .on_connect(move |_| {
            let _ = events_tx.send(Event::Connected);
        })
        .on_close(move |_, reason| {
            let _ = close_tx.send(Event::Closed(reason));
        })
        .on_bytes(|_, payload| {
            println!("<< bytes ({}): {}", payload.len(), hex::encode(&payload));
            Ok(())
        })
        .on_text(|_, text| {
            println!("<< {}", text);
            Ok(())
        })
        .build();

    peer.connect(host.clone(), port)
        .with_context(|| format!("Failed to start connection to {}:{}", host, port))?;

    match events.recv().await {
        Some(Event::Connected) => {}
        Some(Event::Closed(reason)) => bail!("Connection to {}:{} failed: {}", host, port, reason),
        None => bail!("Connection to {}:{} ended unexpectedly", host, port),
    }
    info!("Connected to {}:{}", host, port);

    let interactive = outgoing.is_empty();
    for text in outgoing.text {
        println!(">> {}", text);
        peer.send_text(text);
    }
    for HexPayload(bytes) in outgoing.hex {
        println!(">> bytes ({}): {}", bytes.len(), hex::encode(&bytes));
        peer.send_bytes(bytes);
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = interactive;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, closing");
                peer.close();
                break;
            }
            event = events.recv() => match event {
                Some(Event::Closed(reason)) => {
                    println!("Connection closed: {}", reason);
                    break;
                }
                Some(Event::Connected) => {}
                None => break,
            },
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) if line.is_empty() => {}
                Ok(Some(line)) => {
                    if !peer.send_text(line) {
                        debug!("Dropped line, peer is not connected");
                    }
                }
                Ok(None) => {
                    debug!("Stdin closed");
                    peer.close();
                    stdin_open = false;
                }
                Err(e) => {
                    peer.close();
                    return Err(e).context("Failed to read stdin");
                }
            },
        }
    }

    // Queued lines are still being written after a local close
    peer.closed().await;

    let stats = peer.stats();
    info!(
        "Sent {} frames ({} bytes), received {} frames ({} bytes)",
        stats.frames_out, stats.bytes_out, stats.frames_in, stats.bytes_in
    );

    Ok(())
}
