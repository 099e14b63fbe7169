//! Shared helpers for the integration tests

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;

use pairlink_common::protocol::handshake::{build_hello, HelloKind, CHECK_CODE};
use pairlink_peer::{
    Acceptor, AcceptorOptions, CloseReason, HandlerResult, Peer, PeerConfig, PeerHandler,
};

/// Upper bound for anything a test waits on
pub const WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Connected,
    Closed(CloseReason),
    Bytes(Bytes),
    Text(String),
}

/// Handler that forwards every event to a channel
pub struct Recorder {
    tx: mpsc::UnboundedSender<Event>,
}

impl PeerHandler for Recorder {
    fn on_connect(&self, _peer: &Peer) {
        let _ = self.tx.send(Event::Connected);
    }

    fn on_close(&self, _peer: &Peer, reason: CloseReason) {
        let _ = self.tx.send(Event::Closed(reason));
    }

    fn on_bytes(&self, _peer: &Peer, payload: Bytes) -> HandlerResult {
        let _ = self.tx.send(Event::Bytes(payload));
        Ok(())
    }

    fn on_text(&self, _peer: &Peer, text: String) -> HandlerResult {
        let _ = self.tx.send(Event::Text(text));
        Ok(())
    }
}

/// Receiving end of a [`Recorder`]
pub struct Events {
    rx: mpsc::UnboundedReceiver<Event>,
}

impl Events {
    pub async fn next(&mut self) -> Event {
        timeout(WAIT, self.rx.recv())
            .await
            .expect("timed out waiting for an event")
            .expect("event channel closed")
    }

    /// Skip events until a close arrives
    pub async fn closed(&mut self) -> CloseReason {
        loop {
            if let Event::Closed(reason) = self.next().await {
                return reason;
            }
        }
    }

    /// Assert that nothing arrives for `window`
    pub async fn assert_quiet(&mut self, window: Duration) {
        if let Ok(Some(event)) = timeout(window, self.rx.recv()).await {
            panic!("unexpected event: {:?}", event);
        }
    }
}

pub fn recorder() -> (Arc<Recorder>, Events) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Arc::new(Recorder { tx }), Events { rx })
}

pub fn config(secret: Option<&str>) -> PeerConfig {
    PeerConfig {
        secret: secret.map(str::to_string),
        handshake_timeout_ms: 2_000,
        ..Default::default()
    }
}

/// Acceptor on an ephemeral loopback port whose peers report to one channel
pub async fn listen(config: PeerConfig) -> (Acceptor, Events) {
    let (handler, events) = recorder();
    let acceptor = Acceptor::bind("127.0.0.1:0", AcceptorOptions { config, handler })
        .await
        .expect("bind acceptor");
    (acceptor, events)
}

/// Dialer (not yet started) reporting to its own channel
pub fn dialer(config: PeerConfig) -> (Peer, Events) {
    let (handler, events) = recorder();
    let peer = Peer::builder().config(config).handler(handler).build();
    (peer, events)
}

/// Dial the acceptor and wait for both sides to connect
pub async fn connected_pair(
    acceptor: &Acceptor,
    server: &mut Events,
    config: PeerConfig,
) -> (Peer, Events) {
    let (peer, mut events) = dialer(config);
    peer.connect("127.0.0.1", acceptor.local_addr().port())
        .expect("start dial");
    assert_eq!(events.next().await, Event::Connected);
    assert_eq!(server.next().await, Event::Connected);
    (peer, events)
}

/// Poll `cond` until it holds
pub async fn wait_for(mut cond: impl FnMut() -> bool) {
    timeout(WAIT, async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not met in time");
}

/// Complete the dialer side of the handshake by hand
pub async fn raw_dial(addr: SocketAddr, secret: Option<&str>) -> TcpStream {
    let mut stream = TcpStream::connect(addr).await.expect("raw connect");

    let expected = build_hello(HelloKind::Server, secret);
    let mut hello = vec![0u8; expected.len()];
    stream.read_exact(&mut hello).await.expect("read server hello");
    assert_eq!(&hello[..], &expected[..]);

    stream
        .write_all(&build_hello(HelloKind::Client, secret))
        .await
        .expect("write client hello");

    let mut code = [0u8; 1];
    stream.read_exact(&mut code).await.expect("read check code");
    assert_eq!(code[0], CHECK_CODE);

    stream
}

/// Plain listener standing in for a misbehaving acceptor
pub async fn raw_listener() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind raw listener");
    let port = listener.local_addr().expect("local addr").port();
    (listener, port)
}

/// Accept one connection, send the server hello and consume the client hello
pub async fn raw_accept_until_check_code(
    listener: &TcpListener,
    secret: Option<&str>,
) -> TcpStream {
    let (mut stream, _) = listener.accept().await.expect("raw accept");

    stream
        .write_all(&build_hello(HelloKind::Server, secret))
        .await
        .expect("write server hello");

    let expected = build_hello(HelloKind::Client, secret);
    let mut hello = vec![0u8; expected.len()];
    stream.read_exact(&mut hello).await.expect("read client hello");
    assert_eq!(&hello[..], &expected[..]);

    stream
}
