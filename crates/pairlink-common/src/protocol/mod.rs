//! Wire protocol definitions for pairlink
//!
//! ## Connection Phases
//!
//! 1. **Handshake** (unframed): the accepting side sends its hello, the
//!    dialer answers with its own hello, and the acceptor confirms with a
//!    single check-code byte. Each hello is a role-specific literal followed
//!    by the shared secret.
//! 2. **Data** (framed): tag-length-payload frames in both directions.
//!
//! ## Frame Format
//!
//! ```text
//! +--------+--------+--------+--------+--------+--------...
//! | Tag    | Length (4 bytes, big-endian)      | Payload...
//! +--------+--------+--------+--------+--------+--------...
//! ```
//!
//! ## Security
//!
//! The shared secret travels in clear text. The protocol authenticates at
//! connect time only; run it over a trusted network or a tunnel that
//! provides confidentiality.

pub mod framing;
pub mod handshake;

pub use framing::{Frame, FrameCodec, FrameTag, RawFrame};
pub use handshake::{HelloKind, HelloProgress};

/// Maximum payload size of a single frame (16 MB)
/// Bounds memory use from a misbehaving remote
pub const MAX_PAYLOAD_SIZE: u32 = 16 * 1024 * 1024;

/// Frame header size: 1 byte tag + 4 bytes length
pub const FRAME_HEADER_LEN: usize = 5;

/// Default time allowed for each handshake step, in milliseconds
pub const DEFAULT_HANDSHAKE_TIMEOUT_MS: u64 = 10_000;
