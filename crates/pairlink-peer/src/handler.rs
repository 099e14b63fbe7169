//! Event handlers for peers
//!
//! Each peer owns exactly one handler, fixed when the peer is built. The
//! handler is called from the peer's own task, so implementations should
//! hand long-running work off instead of blocking.

use std::error::Error as StdError;

use bytes::Bytes;

use pairlink_common::types::CloseReason;

use crate::peer::Peer;

/// Error a data handler can return to reject a message
///
/// Returning an error closes the peer with
/// [`CloseReason::CallbackOrDecodeError`].
pub type HandlerError = Box<dyn StdError + Send + Sync>;

/// Result of a data handler
pub type HandlerResult = std::result::Result<(), HandlerError>;

/// Observer for connect, close and data events
///
/// All methods have no-op defaults, so implementors only override the
/// events they care about.
pub trait PeerHandler: Send + Sync + 'static {
    /// The handshake completed; the peer is connected
    fn on_connect(&self, _peer: &Peer) {}

    /// The peer closed. Called exactly once per started peer.
    fn on_close(&self, _peer: &Peer, _reason: CloseReason) {}

    /// A bytes frame arrived
    fn on_bytes(&self, _peer: &Peer, _payload: Bytes) -> HandlerResult {
        Ok(())
    }

    /// A text frame arrived
    fn on_text(&self, _peer: &Peer, _text: String) -> HandlerResult {
        Ok(())
    }
}

/// Handler that ignores every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHandler;

impl PeerHandler for NoopHandler {}

type ConnectFn = Box<dyn Fn(&Peer) + Send + Sync>;
type CloseFn = Box<dyn Fn(&Peer, CloseReason) + Send + Sync>;
type BytesFn = Box<dyn Fn(&Peer, Bytes) -> HandlerResult + Send + Sync>;
type TextFn = Box<dyn Fn(&Peer, String) -> HandlerResult + Send + Sync>;

/// Closure-based handler with one slot per event kind
///
/// Slots are filled with the `with_*` setters; the `on_*` names belong to
/// [`PeerHandler`]. Unset slots are no-ops. Setting a slot twice replaces
/// the earlier closure.
#[derive(Default)]
pub struct Callbacks {
    on_connect: Option<ConnectFn>,
    on_close: Option<CloseFn>,
    on_bytes: Option<BytesFn>,
    on_text: Option<TextFn>,
}

impl Callbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_connect<F>(mut self, f: F) -> Self
    where
        F: Fn(&Peer) + Send + Sync + 'static,
    {
        self.on_connect = Some(Box::new(f));
        self
    }

    pub fn with_close<F>(mut self, f: F) -> Self
    where
        F: Fn(&Peer, CloseReason) + Send + Sync + 'static,
    {
        self.on_close = Some(Box::new(f));
        self
    }

    pub fn with_bytes<F>(mut self, f: F) -> Self
    where
        F: Fn(&Peer, Bytes) -> HandlerResult + Send + Sync + 'static,
    {
        self.on_bytes = Some(Box::new(f));
        self
    }

    pub fn with_text<F>(mut self, f: F) -> Self
    where
        F: Fn(&Peer, String) -> HandlerResult + Send + Sync + 'static,
    {
        self.on_text = Some(Box::new(f));
        self
    }

    /// Whether no slot has been set
    pub fn is_empty(&self) -> bool {
        self.on_connect.is_none()
            && self.on_close.is_none()
            && self.on_bytes.is_none()
            && self.on_text.is_none()
    }
}

impl PeerHandler for Callbacks {
    fn on_connect(&self, peer: &Peer) {
        if let Some(ref f) = self.on_connect {
            f(peer);
        }
    }

    fn on_close(&self, peer: &Peer, reason: CloseReason) {
        if let Some(ref f) = self.on_close {
            f(peer, reason);
        }
    }

    fn on_bytes(&self, peer: &Peer, payload: Bytes) -> HandlerResult {
        match self.on_bytes {
            Some(ref f) => f(peer, payload),
            None => Ok(()),
        }
    }

    fn on_text(&self, peer: &Peer, text: String) -> HandlerResult {
        match self.on_text {
            Some(ref f) => f(peer, text),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Callbacks")
            .field("on_connect", &self.on_connect.is_some())
            .field("on_close", &self.on_close.is_some())
            .field("on_bytes", &self.on_bytes.is_some())
            .field("on_text", &self.on_text.is_some())
            .finish()
    }
}
