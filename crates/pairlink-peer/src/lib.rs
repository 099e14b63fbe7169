//! # pairlink-peer
//!
//! Authenticated, framed point-to-point connections over TCP.
//!
//! A [`Peer`] either dials out with [`Peer::connect`] or is adopted by an
//! [`Acceptor`] for each inbound connection. Both sides exchange hellos
//! carrying a shared secret, the acceptor confirms with a check code, and
//! from then on both sides exchange tagged, length-prefixed frames.
//!
//! ```no_run
//! use pairlink_peer::Peer;
//!
//! # async fn example() -> pairlink_common::Result<()> {
//! let peer = Peer::builder()
//!     .secret("s3cret")
//!     .on_connect(|peer| {
//!         peer.send_text("ping");
//!     })
//!     .on_bytes(|_, payload| {
//!         println!("got {} bytes", payload.len());
//!         Ok(())
//!     })
//!     .build();
//!
//! peer.connect("127.0.0.1", 7400)?;
//! # Ok(())
//! # }
//! ```

pub mod acceptor;
pub mod config;
pub mod handler;
pub mod peer;
pub mod shutdown;
pub mod watchdog;

pub use acceptor::{Acceptor, AcceptorObserver, AcceptorOptions};
pub use config::PeerConfig;
pub use handler::{Callbacks, HandlerError, HandlerResult, NoopHandler, PeerHandler};
pub use peer::{Peer, PeerBuilder, PeerStats};

pub use pairlink_common::{CloseReason, LinkError, PeerId, PeerState, Role};
