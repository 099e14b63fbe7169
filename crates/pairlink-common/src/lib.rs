//! # pairlink-common
//!
//! Shared components for pairlink point-to-point connections.
//!
//! This crate contains:
//! - Handshake message definitions
//! - Data-phase framing and codec
//! - Shared types (peer state, close reasons) and error definitions
//!
//! ## Architecture
//!
//! The common crate has no runtime of its own. Everything here is pure and
//! synchronous so it can be tested without sockets; `pairlink-peer` drives it
//! over tokio.

pub mod error;
pub mod protocol;
pub mod types;

// Re-export commonly used items at crate root
pub use error::{LinkError, Result};
pub use protocol::{Frame, FrameCodec, FrameTag, RawFrame, MAX_PAYLOAD_SIZE};
pub use types::{CloseReason, PeerId, PeerState, Role};
