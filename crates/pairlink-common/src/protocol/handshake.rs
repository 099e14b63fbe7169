//! Handshake messages
//!
//! # Handshake Sequence
//!
//! ```text
//! Dialer                                   Acceptor
//!   |                                          |
//!   |  <-- SERVER_HELLO_PREFIX ++ secret ----- |
//!   |                                          |
//!   |  --- CLIENT_HELLO_PREFIX ++ secret -->   |
//!   |                                          |
//!   |  <-- CHECK_CODE (1 byte) --------------- |
//!   |                                          |
//! ```
//!
//! None of these are framed. Hellos are compared byte for byte against the
//! locally expected hello; any difference is an authentication failure.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{LinkError, Result};

/// Literal that opens the acceptor's hello
pub const SERVER_HELLO_PREFIX: &[u8] = b"PAIRLINK/1 SERVER HELLO\n";

/// Literal that opens the dialer's hello
pub const CLIENT_HELLO_PREFIX: &[u8] = b"PAIRLINK/1 CLIENT HELLO\n";

/// Byte the acceptor sends once it has accepted the dialer's hello
pub const CHECK_CODE: u8 = 0x06;

/// Longest shared secret accepted in configuration
pub const MAX_SECRET_LEN: usize = 1024;

/// Which hello is being built or expected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HelloKind {
    Server,
    Client,
}

impl HelloKind {
    pub fn prefix(&self) -> &'static [u8] {
        match self {
            HelloKind::Server => SERVER_HELLO_PREFIX,
            HelloKind::Client => CLIENT_HELLO_PREFIX,
        }
    }
}

/// Check that a secret fits in a hello
pub fn validate_secret(secret: &str) -> Result<()> {
    if secret.len() > MAX_SECRET_LEN {
        return Err(LinkError::SecretTooLong {
            len: secret.len(),
            max: MAX_SECRET_LEN,
        });
    }
    Ok(())
}

/// Build a hello: the role literal followed by the UTF-8 secret
pub fn build_hello(kind: HelloKind, secret: Option<&str>) -> Bytes {
    let prefix = kind.prefix();
    let secret = secret.unwrap_or_default().as_bytes();

    let mut buf = BytesMut::with_capacity(prefix.len() + secret.len());
    buf.put_slice(prefix);
    buf.put_slice(secret);
    buf.freeze()
}

/// Result of comparing the bytes received so far against an expected hello
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HelloProgress {
    /// Everything so far matches but more bytes are needed
    Incomplete,
    /// Exact match
    Complete,
    /// Diverged from, or ran past, the expected hello
    Mismatch,
}

/// Compare a partially received hello with the expected one
pub fn check_hello(expected: &[u8], received: &[u8]) -> HelloProgress {
    if received.len() > expected.len() || !expected.starts_with(received) {
        HelloProgress::Mismatch
    } else if received.len() == expected.len() {
        HelloProgress::Complete
    } else {
        HelloProgress::Incomplete
    }
}
