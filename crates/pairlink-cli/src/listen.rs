//! `pairlink listen`

use std::sync::Arc;

use anyhow::Context;
use bytes::Bytes;
use tracing::{info, warn};

use pairlink_peer::{
    Acceptor, AcceptorOptions, CloseReason, HandlerResult, Peer, PeerConfig, PeerHandler,
};

/// Logs traffic from every accepted peer, optionally echoing it back
struct ListenHandler {
    echo: bool,
}

impl PeerHandler for ListenHandler {
    fn on_connect(&self, peer: &Peer) {
        match peer.remote_addr() {
            Some(addr) => println!("[{}] connected from {}", peer.id(), addr),
            None => println!("[{}] connected", peer.id()),
        }
    }

    fn on_close(&self, peer: &Peer, reason: CloseReason) {
        // Failed handshakes go to the log only
        let rejected = reason.is_handshake_failure()
            || matches!(
                reason,
                CloseReason::HelloTimeout | CloseReason::CannotReadRemoteAddress
            );
        if rejected {
            warn!("Rejected connection {}: {}", peer.id(), reason);
        } else {
            println!("[{}] closed: {}", peer.id(), reason);
        }
    }

    fn on_bytes(&self, peer: &Peer, payload: Bytes) -> HandlerResult {
        println!("[{}] bytes ({}): {}", peer.id(), payload.len(), hex::encode(&payload));
        if self.echo {
            peer.send_bytes(payload);
        }
        Ok(())
    }

    fn on_text(&self, peer: &Peer, text: String) -> HandlerResult {
        println!("[{}] text: {}", peer.id(), text);
        if self.echo {
            peer.send_text(text);
        }
        Ok(())
    }
}

pub async fn run(config: PeerConfig, bind: String, echo: bool) -> anyhow::Result<()> {
    let options = AcceptorOptions {
        config,
        handler: Arc::new(ListenHandler { echo }),
    };

    let acceptor = Acceptor::bind(bind.as_str(), options)
        .await
        .with_context(|| format!("Failed to listen on {}", bind))?;

    println!("Listening on {}{}", acceptor.local_addr(), if echo { " (echo)" } else { "" });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to wait for Ctrl+C")?;

    info!(
        "Shutting down: {} connected, {} accepted in total",
        acceptor.peer_count(),
        acceptor.accepted_count()
    );
    acceptor.shutdown();

    Ok(())
}
