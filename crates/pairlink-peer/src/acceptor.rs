//! Listener that turns inbound connections into peers
//!
//! Every accepted socket is adopted by a new acceptor-side [`Peer`]. The
//! acceptor keeps the set of peers that have completed their handshake;
//! peers report in through [`AcceptorObserver`] and hold only a weak
//! reference back, so dropping the acceptor never keeps peers alive or the
//! other way round.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use tokio::net::{TcpListener, ToSocketAddrs};
use tracing::{debug, error, info};

use pairlink_common::{
    error::Result,
    types::{CloseReason, PeerId},
};

use crate::config::PeerConfig;
use crate::handler::{NoopHandler, PeerHandler};
use crate::peer::Peer;
use crate::shutdown::{ShutdownSignal, ShutdownTrigger};

/// Receives lifecycle notifications from adopted peers
pub trait AcceptorObserver: Send + Sync {
    /// The peer completed its handshake
    fn notify_connected(&self, peer: &Peer);

    /// A previously connected peer closed
    fn notify_closed(&self, peer: &Peer, reason: CloseReason);
}

/// Settings applied to every adopted peer
#[derive(Clone)]
pub struct AcceptorOptions {
    pub config: PeerConfig,
    pub handler: Arc<dyn PeerHandler>,
}

impl Default for AcceptorOptions {
    fn default() -> Self {
        Self {
            config: PeerConfig::default(),
            handler: Arc::new(NoopHandler),
        }
    }
}

impl std::fmt::Debug for AcceptorOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcceptorOptions")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Live peer set shared between the acceptor and its peers
#[derive(Default)]
struct PeerSet {
    peers: DashMap<PeerId, Peer>,
    accepted: AtomicU64,
    closing: AtomicBool,
}

impl AcceptorObserver for PeerSet {
    fn notify_connected(&self, peer: &Peer) {
        self.peers.insert(peer.id(), peer.clone());
        // Peers still handshaking when the acceptor shut down close here
        if self.closing.load(Ordering::SeqCst) {
            self.peers.remove(&peer.id());
            debug!("Acceptor closing late peer {}", peer.id());
            peer.close();
            return;
        }
        // A close racing the insert has already run notify_closed
        if !peer.is_connected() {
            self.peers.remove(&peer.id());
        }
        debug!("Acceptor tracking peer {} ({} live)", peer.id(), self.peers.len());
    }

    fn notify_closed(&self, peer: &Peer, reason: CloseReason) {
        if self.peers.remove(&peer.id()).is_some() {
            debug!(
                "Acceptor dropped peer {} ({}), {} live",
                peer.id(),
                reason,
                self.peers.len()
            );
        }
    }
}

/// TCP listener adopting every inbound connection as a [`Peer`]
pub struct Acceptor {
    local_addr: SocketAddr,
    shared: Arc<PeerSet>,
    shutdown: ShutdownTrigger,
}

impl Acceptor {
    /// Bind `addr` and start accepting in the background
    ///
    /// Must be called from within a Tokio runtime.
    pub async fn bind<A: ToSocketAddrs>(addr: A, options: AcceptorOptions) -> Result<Self> {
        options.config.validate()?;

        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        info!("Acceptor listening on {}", local_addr);

        let shared = Arc::new(PeerSet::default());
        let shutdown = ShutdownTrigger::new();

        tokio::spawn(accept_loop(
            listener,
            options,
            Arc::downgrade(&shared),
            shutdown.subscribe(),
        ));

        Ok(Self {
            local_addr,
            shared,
            shutdown,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Peers that have completed the handshake and are still open
    pub fn connected_peers(&self) -> Vec<Peer> {
        self.shared
            .peers
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn peer_count(&self) -> usize {
        self.shared.peers.len()
    }

    /// Total connections accepted since bind, including failed handshakes
    pub fn accepted_count(&self) -> u64 {
        self.shared.accepted.load(Ordering::Relaxed)
    }

    /// Stop accepting and close every connected peer
    ///
    /// Peers still in their handshake are closed as soon as they connect.
    pub fn shutdown(&self) {
        if self.shutdown.is_triggered() {
            return;
        }
        self.shared.closing.store(true, Ordering::SeqCst);
        self.shutdown.trigger();

        for peer in self.connected_peers() {
            peer.close();
        }
        info!("Acceptor on {} shut down", self.local_addr);
    }
}

impl Drop for Acceptor {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

impl std::fmt::Debug for Acceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Acceptor")
            .field("local_addr", &self.local_addr)
            .field("peers", &self.shared.peers.len())
            .finish()
    }
}

async fn accept_loop(
    listener: TcpListener,
    options: AcceptorOptions,
    shared: Weak<PeerSet>,
    mut shutdown: ShutdownSignal,
) {
    loop {
        let accepted = tokio::select! {
            biased;
            _ = shutdown.wait() => break,
            accepted = listener.accept() => accepted,
        };

        let (stream, addr) = match accepted {
            Ok(pair) => pair,
            Err(e) => {
                error!("Accept error: {}", e);
                continue;
            }
        };

        let Some(set) = shared.upgrade() else {
            break;
        };
        set.accepted.fetch_add(1, Ordering::Relaxed);
        debug!("Accepted connection from {}", addr);

        let observer: Arc<dyn AcceptorObserver> = set;
        let observer = Arc::downgrade(&observer);
        Peer::builder()
            .config(options.config.clone())
            .handler(options.handler.clone())
            .adopt(stream, observer);
    }

    debug!("Accept loop stopped");
}
