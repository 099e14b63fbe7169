//! Handshake behaviour over real loopback sockets

mod common;

use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use common::{
    config, connected_pair, dialer, listen, raw_accept_until_check_code, raw_listener, recorder,
    wait_for, Event, WAIT,
};
use pairlink_common::protocol::handshake::{build_hello, HelloKind, CHECK_CODE};
use pairlink_peer::{CloseReason, LinkError, Peer, PeerState, Role};

#[tokio::test]
async fn test_handshake_success() {
    let (acceptor, mut server) = listen(config(Some("s3cret"))).await;
    let (peer, mut client) = connected_pair(&acceptor, &mut server, config(Some("s3cret"))).await;

    assert!(peer.is_connected());
    assert_eq!(peer.role(), Role::Dialer);
    assert_eq!(peer.close_reason(), None);

    wait_for(|| acceptor.peer_count() == 1).await;
    let remote = acceptor.connected_peers().pop().unwrap();
    assert_eq!(remote.role(), Role::Acceptor);
    assert_eq!(remote.state(), PeerState::Connected);

    // Each side sees the other's address
    assert_eq!(peer.remote_addr(), Some(acceptor.local_addr()));
    assert_eq!(peer.local_addr(), remote.remote_addr());

    // on_connect fires exactly once per side
    client.assert_quiet(Duration::from_millis(100)).await;
    server.assert_quiet(Duration::from_millis(100)).await;

    acceptor.shutdown();
}

#[tokio::test]
async fn test_handshake_without_secret() {
    let (acceptor, mut server) = listen(config(None)).await;
    let (peer, _client) = connected_pair(&acceptor, &mut server, config(None)).await;
    assert!(peer.is_connected());
    assert_eq!(peer.secret(), None);
}

#[tokio::test]
async fn test_auth_rejection() {
    let (acceptor, mut server) = listen(config(Some("alpha"))).await;
    let (peer, mut client) = dialer(config(Some("bravo")));

    peer.connect("127.0.0.1", acceptor.local_addr().port()).unwrap();

    // The first event on both sides is the close; neither connects
    assert_eq!(client.next().await, Event::Closed(CloseReason::BadHello));
    assert_eq!(server.next().await, Event::Closed(CloseReason::BadHello));

    assert!(peer.is_closed());
    assert_eq!(peer.close_reason(), Some(CloseReason::BadHello));
    assert_eq!(acceptor.peer_count(), 0);
    assert_eq!(acceptor.accepted_count(), 1);
}

#[tokio::test]
async fn test_connect_refused() {
    // Grab a free port, then release it so nothing listens there
    let (listener, port) = raw_listener().await;
    drop(listener);

    let (peer, mut client) = dialer(config(None));
    peer.connect("127.0.0.1", port).unwrap();

    assert_eq!(client.next().await, Event::Closed(CloseReason::CannotConnect));
    assert_eq!(peer.remote_addr(), None);
}

#[tokio::test]
async fn test_dial_timeout() {
    let timeout = Duration::from_millis(300);
    let (handler, mut client) = recorder();
    let peer = Peer::builder()
        .handshake_timeout(timeout)
        .handler(handler)
        .build();

    // Non-routable address: the SYN goes unanswered
    let started = Instant::now();
    peer.connect("10.255.255.1", 7400).unwrap();
    assert_eq!(peer.state(), PeerState::Dialing);

    let reason = client.closed().await;
    let elapsed = started.elapsed();
    if reason == CloseReason::CannotConnect && elapsed < timeout {
        // Hosts with no route at all refuse the connect before the watchdog
        return;
    }
    assert_eq!(reason, CloseReason::DialTimeout);
    assert!(elapsed >= timeout - Duration::from_millis(50), "closed too early: {:?}", elapsed);
    assert!(elapsed < timeout + Duration::from_secs(2), "closed too late: {:?}", elapsed);
    assert_eq!(peer.remote_addr(), None);
    client.assert_quiet(Duration::from_millis(100)).await;
}

#[tokio::test]
async fn test_hello_timeout() {
    let (listener, port) = raw_listener().await;
    let timeout = Duration::from_millis(300);

    let (handler, mut client) = recorder();
    let peer = Peer::builder()
        .handshake_timeout(timeout)
        .handler(handler)
        .build();

    let started = Instant::now();
    peer.connect("127.0.0.1", port).unwrap();

    // Accept and stay silent
    let (_silent, _) = listener.accept().await.unwrap();

    assert_eq!(client.closed().await, CloseReason::HelloTimeout);
    let elapsed = started.elapsed();
    assert!(elapsed >= timeout - Duration::from_millis(50), "closed too early: {:?}", elapsed);
    assert!(elapsed < timeout + Duration::from_secs(2), "closed too late: {:?}", elapsed);
}

#[tokio::test]
async fn test_acceptor_hello_timeout() {
    let mut cfg = config(Some("s3cret"));
    cfg.handshake_timeout_ms = 300;
    let (acceptor, mut server) = listen(cfg).await;

    // Connect but never answer the server hello
    let _silent = tokio::net::TcpStream::connect(acceptor.local_addr())
        .await
        .unwrap();

    assert_eq!(server.next().await, Event::Closed(CloseReason::HelloTimeout));
    assert_eq!(acceptor.peer_count(), 0);
}

#[tokio::test]
async fn test_check_code_timeout() {
    let (listener, port) = raw_listener().await;
    let (handler, mut client) = recorder();
    let peer = Peer::builder()
        .secret("s3cret")
        .handshake_timeout(Duration::from_millis(300))
        .handler(handler)
        .build();

    peer.connect("127.0.0.1", port).unwrap();

    // Hold the socket open without sending the check code
    let _stream = raw_accept_until_check_code(&listener, Some("s3cret")).await;

    assert_eq!(client.next().await, Event::Closed(CloseReason::CheckCodeTimeout));
}

#[tokio::test]
async fn test_bad_check_code() {
    let (listener, port) = raw_listener().await;
    let (peer, mut client) = dialer(config(Some("s3cret")));

    peer.connect("127.0.0.1", port).unwrap();

    let mut stream = raw_accept_until_check_code(&listener, Some("s3cret")).await;
    stream.write_all(&[0x15]).await.unwrap();

    assert_eq!(client.next().await, Event::Closed(CloseReason::BadCheckCode));
    assert!(peer.is_closed());
}

#[tokio::test]
async fn test_missing_check_code() {
    let (listener, port) = raw_listener().await;
    let (peer, mut client) = dialer(config(Some("s3cret")));

    peer.connect("127.0.0.1", port).unwrap();

    let stream = raw_accept_until_check_code(&listener, Some("s3cret")).await;
    drop(stream);

    assert_eq!(client.next().await, Event::Closed(CloseReason::CannotReadCheckCode));
}

#[tokio::test]
async fn test_hello_cut_short() {
    let (listener, port) = raw_listener().await;
    let (peer, mut client) = dialer(config(Some("s3cret")));

    peer.connect("127.0.0.1", port).unwrap();

    // Half a hello, then EOF
    let (mut stream, _) = listener.accept().await.unwrap();
    stream.write_all(b"PAIRLINK/1 SERV").await.unwrap();
    drop(stream);

    assert_eq!(client.next().await, Event::Closed(CloseReason::CannotReadHello));
}

#[tokio::test]
async fn test_fragmented_hello_is_accepted() {
    let (listener, port) = raw_listener().await;
    let (peer, mut client) = dialer(config(Some("s3cret")));

    peer.connect("127.0.0.1", port).unwrap();

    let (mut stream, _) = listener.accept().await.unwrap();
    let hello = build_hello(HelloKind::Server, Some("s3cret"));
    for chunk in hello.chunks(4) {
        stream.write_all(chunk).await.unwrap();
        stream.flush().await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let expected = build_hello(HelloKind::Client, Some("s3cret"));
    let mut received = vec![0u8; expected.len()];
    stream.read_exact(&mut received).await.unwrap();
    assert_eq!(&received[..], &expected[..]);

    stream.write_all(&[CHECK_CODE]).await.unwrap();

    assert_eq!(client.next().await, Event::Connected);
    assert!(peer.is_connected());
}

#[tokio::test]
async fn test_no_reuse_after_close() {
    let (acceptor, mut server) = listen(config(None)).await;
    let (peer, mut client) = connected_pair(&acceptor, &mut server, config(None)).await;

    peer.close();
    assert_eq!(client.next().await, Event::Closed(CloseReason::LocalClose));

    let port = acceptor.local_addr().port();
    assert!(matches!(peer.connect("127.0.0.1", port), Err(LinkError::AlreadyStarted)));
    assert!(!peer.send_text("late"));
    assert_eq!(peer.close_reason(), Some(CloseReason::LocalClose));
}

#[tokio::test]
async fn test_shutdown_closes_peer_finishing_handshake() {
    let (acceptor, mut server) = listen(config(Some("k"))).await;

    let mut stream = TcpStream::connect(acceptor.local_addr()).await.unwrap();
    let expected = build_hello(HelloKind::Server, Some("k"));
    let mut hello = vec![0u8; expected.len()];
    stream.read_exact(&mut hello).await.unwrap();

    // Shut down while the acceptor side waits for the client hello
    acceptor.shutdown();
    stream
        .write_all(&build_hello(HelloKind::Client, Some("k")))
        .await
        .unwrap();

    assert_eq!(server.next().await, Event::Connected);
    assert_eq!(server.next().await, Event::Closed(CloseReason::LocalClose));
    assert_eq!(acceptor.peer_count(), 0);

    let mut code = [0u8; 1];
    stream.read_exact(&mut code).await.unwrap();
    assert_eq!(code[0], CHECK_CODE);

    let mut rest = Vec::new();
    let read = tokio::time::timeout(WAIT, stream.read_to_end(&mut rest))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(read, 0);
}
