//! Core type definitions for pairlink
//!
//! These types are shared by the peer, the acceptor and the CLI.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a peer instance
///
/// Every peer generates a new ID when it is built. The ID is used for:
/// - Log correlation
/// - Keying the acceptor's live-connection set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerId(Uuid);

impl PeerId {
    /// Generate a new random peer ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the inner UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for PeerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which side of the handshake a peer plays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Dialed out; sends the client hello
    Dialer,
    /// Adopted from a listener; sends the server hello and check code
    Acceptor,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Dialer => write!(f, "dialer"),
            Role::Acceptor => write!(f, "acceptor"),
        }
    }
}

/// Connection state of a peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PeerState {
    /// Not connected. Initial state, and terminal once the peer has run.
    #[default]
    Closed,
    /// Outbound TCP connect in progress
    Dialing,
    /// Waiting for the remote hello
    AwaitingHello,
    /// Dialer waiting for the acceptor's check code
    AwaitingCheckCode,
    /// Handshake complete, framed messages flow
    Connected,
}

impl PeerState {
    /// Whether the peer is blocked on network input during the handshake
    pub fn is_handshaking(&self) -> bool {
        matches!(
            self,
            PeerState::Dialing | PeerState::AwaitingHello | PeerState::AwaitingCheckCode
        )
    }

    /// The close reason used when the watchdog fires in this state
    pub fn timeout_reason(&self) -> Option<CloseReason> {
        match self {
            PeerState::Dialing => Some(CloseReason::DialTimeout),
            PeerState::AwaitingHello => Some(CloseReason::HelloTimeout),
            PeerState::AwaitingCheckCode => Some(CloseReason::CheckCodeTimeout),
            PeerState::Closed | PeerState::Connected => None,
        }
    }
}

impl fmt::Display for PeerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerState::Closed => write!(f, "closed"),
            PeerState::Dialing => write!(f, "dialing"),
            PeerState::AwaitingHello => write!(f, "awaiting_hello"),
            PeerState::AwaitingCheckCode => write!(f, "awaiting_check_code"),
            PeerState::Connected => write!(f, "connected"),
        }
    }
}

/// Why a peer closed
///
/// Every failure a peer can hit is reported through one of these, passed to
/// the close callback. None of them propagate as errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    // === Connection establishment ===
    /// Outbound TCP connect failed
    CannotConnect,
    /// The socket's peer address could not be read
    CannotReadRemoteAddress,

    // === Handshake ===
    /// Writing the local hello failed
    CannotSendHello,
    /// EOF or I/O error while waiting for the remote hello
    CannotReadHello,
    /// Remote hello did not match the expected prefix and secret
    BadHello,
    /// Writing the check code failed
    CannotSendCheckCode,
    /// EOF or I/O error while waiting for the check code
    CannotReadCheckCode,
    /// Check code byte was wrong
    BadCheckCode,

    // === Timeouts ===
    /// Watchdog fired while dialing
    DialTimeout,
    /// Watchdog fired while waiting for a hello
    HelloTimeout,
    /// Watchdog fired while waiting for the check code
    CheckCodeTimeout,
    /// No frame arrived within the configured idle timeout
    IdleTimeout,

    // === Framing ===
    /// Frame tag was neither bytes nor text
    UnknownTag,
    /// Frame length was zero or above the maximum payload size
    InvalidFrameSize,

    // === I/O ===
    /// Remote closed the connection at a frame boundary
    RemoteClosed,
    /// Transport error while connected
    IoError,
    /// Writing an outbound frame failed
    SendFailed,

    // === Application ===
    /// A data handler returned an error, or a text frame was not UTF-8
    CallbackOrDecodeError,

    // === Local ===
    /// `close()` was called
    LocalClose,
}

impl CloseReason {
    /// Raised by the handshake watchdog or the idle timer
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            CloseReason::DialTimeout
                | CloseReason::HelloTimeout
                | CloseReason::CheckCodeTimeout
                | CloseReason::IdleTimeout
        )
    }

    /// The handshake was refused or broken off (timeouts excluded)
    pub fn is_handshake_failure(&self) -> bool {
        matches!(
            self,
            CloseReason::CannotSendHello
                | CloseReason::CannotReadHello
                | CloseReason::BadHello
                | CloseReason::CannotSendCheckCode
                | CloseReason::CannotReadCheckCode
                | CloseReason::BadCheckCode
        )
    }

    /// The remote sent something the framing layer rejects
    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, CloseReason::UnknownTag | CloseReason::InvalidFrameSize)
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CloseReason::CannotConnect => "cannot connect",
            CloseReason::CannotReadRemoteAddress => "cannot read remote address",
            CloseReason::CannotSendHello => "cannot send hello",
            CloseReason::CannotReadHello => "cannot read hello",
            CloseReason::BadHello => "bad hello",
            CloseReason::CannotSendCheckCode => "cannot send check code",
            CloseReason::CannotReadCheckCode => "cannot read check code",
            CloseReason::BadCheckCode => "bad check code",
            CloseReason::DialTimeout => "dial timed out",
            CloseReason::HelloTimeout => "hello timed out",
            CloseReason::CheckCodeTimeout => "check code timed out",
            CloseReason::IdleTimeout => "idle timeout",
            CloseReason::UnknownTag => "unknown frame tag",
            CloseReason::InvalidFrameSize => "invalid frame size",
            CloseReason::RemoteClosed => "remote closed",
            CloseReason::IoError => "I/O error",
            CloseReason::SendFailed => "send failed",
            CloseReason::CallbackOrDecodeError => "callback or decode error",
            CloseReason::LocalClose => "closed locally",
        };
        f.write_str(s)
    }
}
