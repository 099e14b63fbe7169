//! Peer: one endpoint of a pairlink connection
//!
//! A peer is either dialed out with [`Peer::connect`] or adopted from a
//! listener with [`PeerBuilder::adopt`]. Both paths run the same handshake
//! state machine on a background task:
//!
//! ```text
//! dialer:   Closed -> Dialing -> AwaitingHello -> AwaitingCheckCode -> Connected
//! acceptor: Closed -> AwaitingHello -> Connected
//! ```
//!
//! Any failure, timeout or local `close()` moves the peer to `Closed`, which
//! is terminal. The close reason is delivered once to the handler's
//! `on_close`.
//!
//! Once connected the task turns into the framed read loop, and a second
//! task owns the write half of the socket. All outbound frames go through
//! that single writer, so concurrent senders never interleave on the wire.
//! A local `close()` lets the writer finish the frames already queued before
//! the socket is shut down; every other close drops them.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, info, warn};

use pairlink_common::{
    error::{LinkError, Result},
    protocol::{
        framing::{Frame, FrameCodec, FrameTag, RawFrame},
        handshake::{build_hello, check_hello, HelloKind, HelloProgress, CHECK_CODE},
    },
    types::{CloseReason, PeerId, PeerState, Role},
};

use crate::acceptor::AcceptorObserver;
use crate::config::PeerConfig;
use crate::handler::{Callbacks, HandlerResult, NoopHandler, PeerHandler};
use crate::shutdown::ShutdownTrigger;
use crate::watchdog::Watchdog;

/// Read size while collecting a hello
const HELLO_READ_CHUNK: usize = 512;

/// Snapshot of a peer's traffic counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PeerStats {
    pub frames_in: u64,
    pub frames_out: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
}

#[derive(Debug, Default)]
struct Counters {
    frames_in: AtomicU64,
    frames_out: AtomicU64,
    bytes_in: AtomicU64,
    bytes_out: AtomicU64,
}

impl Counters {
    fn record_in(&self, bytes: usize) {
        self.frames_in.fetch_add(1, Ordering::Relaxed);
        self.bytes_in.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    fn record_out(&self, bytes: usize) {
        self.frames_out.fetch_add(1, Ordering::Relaxed);
        self.bytes_out.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    fn snapshot(&self) -> PeerStats {
        PeerStats {
            frames_in: self.frames_in.load(Ordering::Relaxed),
            frames_out: self.frames_out.load(Ordering::Relaxed),
            bytes_in: self.bytes_in.load(Ordering::Relaxed),
            bytes_out: self.bytes_out.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Status {
    state: PeerState,
    close_reason: Option<CloseReason>,
}

struct PeerInner {
    id: PeerId,
    role: Role,
    config: PeerConfig,
    handler: Arc<dyn PeerHandler>,
    /// Set only for adopted peers
    acceptor: Option<Weak<dyn AcceptorObserver>>,
    status: Mutex<Status>,
    started: AtomicBool,
    remote_addr: OnceLock<SocketAddr>,
    local_addr: OnceLock<SocketAddr>,
    watchdog: Watchdog,
    /// Triggered on close; the socket tasks exit on it
    shutdown: ShutdownTrigger,
    /// Present only while connected
    outbound: Mutex<Option<mpsc::UnboundedSender<Frame>>>,
    /// Triggered once the writer has released the socket
    flushed: ShutdownTrigger,
    counters: Counters,
}

/// Builder for [`Peer`]
///
/// Everything a peer needs is fixed here, before the handshake starts.
#[derive(Default)]
pub struct PeerBuilder {
    config: PeerConfig,
    handler: Option<Arc<dyn PeerHandler>>,
    callbacks: Callbacks,
}

impl PeerBuilder {
    /// Replace the whole configuration (including the secret)
    pub fn config(mut self, config: PeerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn secret(mut self, secret: impl Into<String>) -> Self {
        self.config.secret = Some(secret.into());
        self
    }

    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        let millis = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self.config.handshake_timeout_ms = millis.max(1);
        self
    }

    /// Close the peer when no frame arrives for this long (whole seconds)
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.idle_timeout_secs = Some(timeout.as_secs().max(1));
        self
    }

    pub fn max_payload_size(mut self, max: u32) -> Self {
        self.config.max_payload_size = max;
        self
    }

    /// Use a handler object. Takes precedence over the `on_*` closures.
    pub fn handler(mut self, handler: Arc<dyn PeerHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn on_connect<F>(mut self, f: F) -> Self
    where
        F: Fn(&Peer) + Send + Sync + 'static,
    {
        self.callbacks = self.callbacks.with_connect(f);
        self
    }

    pub fn on_close<F>(mut self, f: F) -> Self
    where
        F: Fn(&Peer, CloseReason) + Send + Sync + 'static,
    {
        self.callbacks = self.callbacks.with_close(f);
        self
    }

    pub fn on_bytes<F>(mut self, f: F) -> Self
    where
        F: Fn(&Peer, Bytes) -> HandlerResult + Send + Sync + 'static,
    {
        self.callbacks = self.callbacks.with_bytes(f);
        self
    }

    pub fn on_text<F>(mut self, f: F) -> Self
    where
        F: Fn(&Peer, String) -> HandlerResult + Send + Sync + 'static,
    {
        self.callbacks = self.callbacks.with_text(f);
        self
    }

    /// Build a dialer. Call [`Peer::connect`] to start it.
    pub fn build(mut self) -> Peer {
        let handler = self.resolve_handler();
        Peer::new(Role::Dialer, self.config, handler, None)
    }

    /// Build an acceptor-side peer on an accepted socket and start the
    /// inbound handshake immediately
    ///
    /// Must be called from within a Tokio runtime.
    pub fn adopt(mut self, stream: TcpStream, acceptor: Weak<dyn AcceptorObserver>) -> Peer {
        let handler = self.resolve_handler();
        let peer = Peer::new(Role::Acceptor, self.config, handler, Some(acceptor));
        peer.start_inbound(stream);
        peer
    }

    fn resolve_handler(&mut self) -> Arc<dyn PeerHandler> {
        if let Some(handler) = self.handler.take() {
            return handler;
        }
        let callbacks = std::mem::take(&mut self.callbacks);
        if callbacks.is_empty() {
            Arc::new(NoopHandler)
        } else {
            Arc::new(callbacks)
        }
    }
}

/// One endpoint of a pairlink connection
///
/// Cheap to clone; all clones refer to the same connection.
#[derive(Clone)]
pub struct Peer {
    inner: Arc<PeerInner>,
}

impl Peer {
    pub fn builder() -> PeerBuilder {
        PeerBuilder::default()
    }

    fn new(
        role: Role,
        config: PeerConfig,
        handler: Arc<dyn PeerHandler>,
        acceptor: Option<Weak<dyn AcceptorObserver>>,
    ) -> Self {
        let watchdog = Watchdog::new(config.handshake_timeout());
        Self {
            inner: Arc::new(PeerInner {
                id: PeerId::new(),
                role,
                config,
                handler,
                acceptor,
                status: Mutex::new(Status::default()),
                started: AtomicBool::new(false),
                remote_addr: OnceLock::new(),
                local_addr: OnceLock::new(),
                watchdog,
                shutdown: ShutdownTrigger::new(),
                outbound: Mutex::new(None),
                flushed: ShutdownTrigger::new(),
                counters: Counters::default(),
            }),
        }
    }

    // === Accessors ===

    pub fn id(&self) -> PeerId {
        self.inner.id
    }

    pub fn role(&self) -> Role {
        self.inner.role
    }

    pub fn state(&self) -> PeerState {
        self.inner.status.lock().state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == PeerState::Connected
    }

    pub fn is_closed(&self) -> bool {
        self.state() == PeerState::Closed
    }

    /// Reason for the close, once the peer has closed
    pub fn close_reason(&self) -> Option<CloseReason> {
        self.inner.status.lock().close_reason
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.inner.remote_addr.get().copied()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.local_addr.get().copied()
    }

    /// Shared secret used in the handshake
    pub fn secret(&self) -> Option<&str> {
        self.inner.config.secret.as_deref()
    }

    pub fn config(&self) -> &PeerConfig {
        &self.inner.config
    }

    pub fn stats(&self) -> PeerStats {
        self.inner.counters.snapshot()
    }

    // === Public operations ===

    /// Dial `host:port` and run the outbound handshake in the background
    ///
    /// Returns immediately. Connection and handshake failures are reported
    /// through `on_close`; the only errors returned here are an invalid
    /// configuration and [`LinkError::AlreadyStarted`] for a peer that has
    /// already been used. Must be called from within a Tokio runtime.
    pub fn connect(&self, host: impl Into<String>, port: u16) -> Result<()> {
        self.inner.config.validate()?;
        self.begin(PeerState::Dialing)?;

        let host = host.into();
        debug!("Peer {} dialing {}:{}", self.id(), host, port);

        self.arm_watchdog(PeerState::Dialing);
        let peer = self.clone();
        tokio::spawn(async move { peer.run_dialer(host, port).await });

        Ok(())
    }

    /// Queue a bytes frame
    ///
    /// Returns `false` (and sends nothing) when the peer is not connected or
    /// the payload is empty or too large.
    pub fn send_bytes(&self, payload: impl Into<Bytes>) -> bool {
        self.enqueue(Frame::Bytes(payload.into()))
    }

    /// Queue a text frame. Same rules as [`Peer::send_bytes`].
    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.enqueue(Frame::Text(text.into()))
    }

    /// Close the peer. Idempotent.
    ///
    /// Frames already accepted by `send_*` are still written before the
    /// socket is shut down; see [`Peer::closed`].
    pub fn close(&self) {
        self.finish(CloseReason::LocalClose, None);
    }

    /// Wait until the peer has closed and released its socket
    ///
    /// After a local close this includes writing out the queued frames.
    /// Returns at once for a peer that was never started.
    pub async fn closed(&self) {
        if !self.inner.started.load(Ordering::Acquire) {
            return;
        }
        self.inner.flushed.subscribe().wait().await;
    }

    // === Lifecycle ===

    fn begin(&self, state: PeerState) -> Result<()> {
        if self.inner.started.swap(true, Ordering::AcqRel) {
            return Err(LinkError::AlreadyStarted);
        }
        self.inner.status.lock().state = state;
        Ok(())
    }

    /// Move `from -> to`; false if the peer is no longer in `from`
    fn advance(&self, from: PeerState, to: PeerState) -> bool {
        let mut status = self.inner.status.lock();
        if status.state != from {
            return false;
        }
        status.state = to;
        true
    }

    fn fail(&self, reason: CloseReason) {
        self.finish(reason, None);
    }

    /// Transition to `Closed` unless already there
    ///
    /// With `only_from`, the close happens only if the peer is still in that
    /// state. Returns whether this call performed the close.
    fn finish(&self, reason: CloseReason, only_from: Option<PeerState>) -> bool {
        let previous = {
            let mut status = self.inner.status.lock();
            if status.state == PeerState::Closed {
                return false;
            }
            if only_from.map_or(false, |expected| expected != status.state) {
                return false;
            }
            let previous = status.state;
            status.state = PeerState::Closed;
            status.close_reason = Some(reason);
            previous
        };

        self.inner.watchdog.cancel();
        // Sender goes first so the writer sees the end of its queue
        self.inner.outbound.lock().take();
        self.inner.shutdown.trigger();
        if previous != PeerState::Connected {
            self.inner.flushed.trigger();
        }

        if reason.is_timeout() || reason.is_handshake_failure() || reason.is_protocol_violation() {
            warn!("Peer {} closed in state {}: {}", self.id(), previous, reason);
        } else {
            info!("Peer {} closed in state {}: {}", self.id(), previous, reason);
        }

        self.inner.handler.on_close(self, reason);

        if previous == PeerState::Connected {
            if let Some(acceptor) = self.acceptor() {
                acceptor.notify_closed(self, reason);
            }
        }

        true
    }

    fn arm_watchdog(&self, state: PeerState) {
        let inner = Arc::downgrade(&self.inner);
        self.inner.watchdog.arm(move || {
            let (Some(inner), Some(reason)) = (inner.upgrade(), state.timeout_reason()) else {
                return;
            };
            Peer { inner }.finish(reason, Some(state));
        });
    }

    fn acceptor(&self) -> Option<Arc<dyn AcceptorObserver>> {
        self.inner.acceptor.as_ref().and_then(Weak::upgrade)
    }

    fn record_addresses(&self, remote: SocketAddr, local: Option<SocketAddr>) {
        let _ = self.inner.remote_addr.set(remote);
        if let Some(local) = local {
            let _ = self.inner.local_addr.set(local);
        }
    }

    fn current_reason(&self) -> CloseReason {
        self.close_reason().unwrap_or(CloseReason::LocalClose)
    }

    fn codec(&self) -> FrameCodec {
        FrameCodec::new().with_max_size(self.inner.config.max_payload_size)
    }

    // === Handshake ===

    async fn run_dialer(self, host: String, port: u16) {
        let mut shutdown = self.inner.shutdown.subscribe();

        let connected = tokio::select! {
            biased;
            _ = shutdown.wait() => return,
            result = TcpStream::connect((host.as_str(), port)) => result,
        };

        let mut stream = match connected {
            Ok(stream) => stream,
            Err(e) => {
                debug!("Peer {} cannot connect to {}:{}: {}", self.id(), host, port, e);
                self.fail(CloseReason::CannotConnect);
                return;
            }
        };

        let remote = match stream.peer_addr() {
            Ok(addr) => addr,
            Err(e) => {
                debug!("Peer {} cannot read remote address: {}", self.id(), e);
                self.fail(CloseReason::CannotReadRemoteAddress);
                return;
            }
        };
        self.record_addresses(remote, stream.local_addr().ok());

        if !self.advance(PeerState::Dialing, PeerState::AwaitingHello) {
            return;
        }
        self.arm_watchdog(PeerState::AwaitingHello);
        debug!("Peer {} reached {}, awaiting server hello", self.id(), remote);

        let outcome = tokio::select! {
            biased;
            _ = shutdown.wait() => return,
            outcome = self.dialer_handshake(&mut stream) => outcome,
        };

        match outcome {
            Ok(()) => self.run_connected(stream, PeerState::AwaitingCheckCode).await,
            Err(reason) => self.fail(reason),
        }
    }

    async fn dialer_handshake(&self, stream: &mut TcpStream) -> std::result::Result<(), CloseReason> {
        let secret = self.secret();

        let client_hello = build_hello(HelloKind::Client, secret);

        if let Err(reason) = self
            .read_hello(stream, &build_hello(HelloKind::Server, secret))
            .await
        {
            if reason == CloseReason::BadHello {
                // Best effort; the acceptor then rejects our hello in turn
                let _ = stream.write_all(&client_hello).await;
            }
            return Err(reason);
        }

        if !self.advance(PeerState::AwaitingHello, PeerState::AwaitingCheckCode) {
            return Err(self.current_reason());
        }
        self.arm_watchdog(PeerState::AwaitingCheckCode);

        stream.write_all(&client_hello).await.map_err(|e| {
            debug!("Peer {} cannot send client hello: {}", self.id(), e);
            CloseReason::CannotSendHello
        })?;

        let mut code = [0u8; 1];
        stream.read_exact(&mut code).await.map_err(|e| {
            debug!("Peer {} cannot read check code: {}", self.id(), e);
            CloseReason::CannotReadCheckCode
        })?;

        if code[0] != CHECK_CODE {
            debug!("Peer {} got check code {:#04x}", self.id(), code[0]);
            return Err(CloseReason::BadCheckCode);
        }

        Ok(())
    }

    fn start_inbound(&self, stream: TcpStream) {
        if self.begin(PeerState::AwaitingHello).is_err() {
            return;
        }

        let remote = match stream.peer_addr() {
            Ok(addr) => addr,
            Err(e) => {
                debug!("Peer {} cannot read remote address: {}", self.id(), e);
                self.fail(CloseReason::CannotReadRemoteAddress);
                return;
            }
        };
        self.record_addresses(remote, stream.local_addr().ok());

        self.arm_watchdog(PeerState::AwaitingHello);
        debug!("Peer {} adopted connection from {}", self.id(), remote);

        let peer = self.clone();
        tokio::spawn(async move { peer.run_acceptor(stream).await });
    }

    async fn run_acceptor(self, mut stream: TcpStream) {
        let mut shutdown = self.inner.shutdown.subscribe();

        let outcome = tokio::select! {
            biased;
            _ = shutdown.wait() => return,
            outcome = self.acceptor_handshake(&mut stream) => outcome,
        };

        match outcome {
            Ok(()) => self.run_connected(stream, PeerState::AwaitingHello).await,
            Err(reason) => self.fail(reason),
        }
    }

    async fn acceptor_handshake(&self, stream: &mut TcpStream) -> std::result::Result<(), CloseReason> {
        let secret = self.secret();

        stream
            .write_all(&build_hello(HelloKind::Server, secret))
            .await
            .map_err(|e| {
                debug!("Peer {} cannot send server hello: {}", self.id(), e);
                CloseReason::CannotSendHello
            })?;

        self.read_hello(stream, &build_hello(HelloKind::Client, secret))
            .await?;

        stream.write_all(&[CHECK_CODE]).await.map_err(|e| {
            debug!("Peer {} cannot send check code: {}", self.id(), e);
            CloseReason::CannotSendCheckCode
        })?;

        Ok(())
    }

    /// Collect bytes until they match `expected` exactly or diverge from it
    async fn read_hello(
        &self,
        stream: &mut TcpStream,
        expected: &[u8],
    ) -> std::result::Result<(), CloseReason> {
        let mut received = Vec::with_capacity(expected.len());
        let mut chunk = [0u8; HELLO_READ_CHUNK];

        loop {
            let n = stream.read(&mut chunk).await.map_err(|e| {
                debug!("Peer {} cannot read hello: {}", self.id(), e);
                CloseReason::CannotReadHello
            })?;
            if n == 0 {
                debug!("Peer {} connection closed before hello", self.id());
                return Err(CloseReason::CannotReadHello);
            }

            received.extend_from_slice(&chunk[..n]);
            match check_hello(expected, &received) {
                HelloProgress::Complete => return Ok(()),
                HelloProgress::Incomplete => continue,
                HelloProgress::Mismatch => return Err(CloseReason::BadHello),
            }
        }
    }

    // === Connected phase ===

    async fn run_connected(&self, stream: TcpStream, from: PeerState) {
        let (read_half, write_half) = stream.into_split();

        // Installed before the state flips so on_connect can already send
        let (tx, rx) = mpsc::unbounded_channel();
        *self.inner.outbound.lock() = Some(tx);

        if !self.advance(from, PeerState::Connected) {
            self.inner.outbound.lock().take();
            return;
        }
        self.inner.watchdog.cancel();

        tokio::spawn(self.clone().run_writer(write_half, rx));

        info!(
            "Peer {} connected to {} as {}",
            self.id(),
            self.remote_addr()
                .map_or_else(|| "unknown".to_string(), |addr| addr.to_string()),
            self.role()
        );

        self.inner.handler.on_connect(self);
        if let Some(acceptor) = self.acceptor() {
            acceptor.notify_connected(self);
        }

        self.read_loop(read_half).await;
    }

    async fn read_loop(&self, read_half: OwnedReadHalf) {
        let mut frames = FramedRead::new(read_half, self.codec());
        let mut shutdown = self.inner.shutdown.subscribe();
        let idle = self.inner.config.idle_timeout();

        loop {
            let next = tokio::select! {
                biased;
                _ = shutdown.wait() => return,
                next = self.next_frame(&mut frames, idle) => next,
            };

            let outcome = next.and_then(|frame| self.dispatch(frame));
            if let Err(reason) = outcome {
                self.fail(reason);
                return;
            }
        }
    }

    async fn next_frame(
        &self,
        frames: &mut FramedRead<OwnedReadHalf, FrameCodec>,
        idle: Option<Duration>,
    ) -> std::result::Result<RawFrame, CloseReason> {
        let next = match idle {
            Some(limit) => tokio::time::timeout(limit, frames.next())
                .await
                .map_err(|_| CloseReason::IdleTimeout)?,
            None => frames.next().await,
        };

        match next {
            Some(Ok(frame)) => Ok(frame),
            Some(Err(e)) => {
                let reason = match e {
                    LinkError::UnknownTag(_) => CloseReason::UnknownTag,
                    LinkError::InvalidFrameSize { .. } | LinkError::MalformedLength(_) => {
                        CloseReason::InvalidFrameSize
                    }
                    _ => CloseReason::IoError,
                };
                debug!("Peer {} read error: {}", self.id(), e);
                Err(reason)
            }
            None => Err(CloseReason::RemoteClosed),
        }
    }

    fn dispatch(&self, frame: RawFrame) -> std::result::Result<(), CloseReason> {
        self.inner.counters.record_in(frame.payload.len());

        let result = match frame.tag {
            FrameTag::Bytes => self.inner.handler.on_bytes(self, frame.payload),
            FrameTag::Text => match String::from_utf8(frame.payload.to_vec()) {
                Ok(text) => self.inner.handler.on_text(self, text),
                Err(e) => {
                    warn!("Peer {} received a text frame that is not UTF-8: {}", self.id(), e);
                    return Err(CloseReason::CallbackOrDecodeError);
                }
            },
        };

        result.map_err(|e| {
            warn!("Peer {} handler failed: {}", self.id(), e);
            CloseReason::CallbackOrDecodeError
        })
    }

    fn enqueue(&self, frame: Frame) -> bool {
        if !self.is_connected() {
            debug!("Peer {} not connected, dropping {:?} frame", self.id(), frame.tag());
            return false;
        }
        if frame.is_empty() {
            debug!("Peer {} dropping empty {:?} frame", self.id(), frame.tag());
            return false;
        }
        let max = self.codec().max_size() as usize;
        if frame.len() > max {
            warn!(
                "Peer {} dropping {:?} frame of {} bytes (max: {})",
                self.id(),
                frame.tag(),
                frame.len(),
                max
            );
            return false;
        }

        match self.inner.outbound.lock().as_ref() {
            Some(tx) => tx.send(frame).is_ok(),
            None => false,
        }
    }

    async fn run_writer(self, write_half: OwnedWriteHalf, mut rx: mpsc::UnboundedReceiver<Frame>) {
        let mut sink = FramedWrite::new(write_half, self.codec());
        let mut shutdown = self.inner.shutdown.subscribe();
        // Length of a frame whose write was cut short by shutdown; its bytes
        // stay buffered in the sink
        let mut interrupted = None;

        loop {
            let frame = tokio::select! {
                biased;
                _ = shutdown.wait() => break,
                frame = rx.recv() => match frame {
                    Some(frame) => frame,
                    None => break,
                },
            };

            let len = frame.len();
            let sent = tokio::select! {
                biased;
                _ = shutdown.wait() => {
                    interrupted = Some(len);
                    break;
                }
                sent = sink.send(frame) => sent,
            };

            match sent {
                Ok(()) => self.inner.counters.record_out(len),
                Err(e) => {
                    debug!("Peer {} write error: {}", self.id(), e);
                    self.fail(CloseReason::SendFailed);
                    break;
                }
            }
        }

        if self.close_reason() == Some(CloseReason::LocalClose) {
            self.flush_on_close(&mut sink, &mut rx, interrupted).await;
        }

        drop(sink);
        self.inner.flushed.trigger();
    }

    /// Write out what is still queued, then shut down the write half
    ///
    /// Bounded by the handshake timeout so a stalled remote cannot hold the
    /// socket open.
    async fn flush_on_close(
        &self,
        sink: &mut FramedWrite<OwnedWriteHalf, FrameCodec>,
        rx: &mut mpsc::UnboundedReceiver<Frame>,
        interrupted: Option<usize>,
    ) {
        let counters = &self.inner.counters;
        let drain = async {
            // The sender is already gone, so recv ends with the queue
            let mut written = Vec::new();
            while let Some(frame) = rx.recv().await {
                written.push(frame.len());
                sink.feed(frame).await?;
            }
            sink.close().await?;
            Ok::<_, LinkError>(written)
        };

        match tokio::time::timeout(self.inner.config.handshake_timeout(), drain).await {
            Ok(Ok(written)) => {
                for len in interrupted.into_iter().chain(written.iter().copied()) {
                    counters.record_out(len);
                }
                debug!("Peer {} flushed {} queued frame(s) on close", self.id(), written.len());
            }
            Ok(Err(e)) => debug!("Peer {} flush on close failed: {}", self.id(), e),
            Err(_) => debug!("Peer {} gave up flushing on close", self.id()),
        }
    }
}

impl fmt::Debug for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = *self.inner.status.lock();
        f.debug_struct("Peer")
            .field("id", &self.inner.id)
            .field("role", &self.inner.role)
            .field("state", &status.state)
            .field("close_reason", &status.close_reason)
            .field("remote_addr", &self.remote_addr())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let peer = Peer::builder().build();
        assert_eq!(peer.role(), Role::Dialer);
        assert_eq!(peer.state(), PeerState::Closed);
        assert!(peer.is_closed());
        assert!(!peer.is_connected());
        assert_eq!(peer.close_reason(), None);
        assert_eq!(peer.secret(), None);
        assert_eq!(peer.remote_addr(), None);
        assert_eq!(peer.stats(), PeerStats::default());
    }

    #[test]
    fn test_builder_settings() {
        let peer = Peer::builder()
            .secret("s3cret")
            .handshake_timeout(Duration::from_millis(250))
            .idle_timeout(Duration::from_secs(30))
            .max_payload_size(1024)
            .build();

        assert_eq!(peer.secret(), Some("s3cret"));
        assert_eq!(peer.config().handshake_timeout(), Duration::from_millis(250));
        assert_eq!(peer.config().idle_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(peer.config().max_payload_size, 1024);
    }

    #[test]
    fn test_send_while_not_connected_is_noop() {
        let peer = Peer::builder().build();
        assert!(!peer.send_bytes(vec![1, 2, 3]));
        assert!(!peer.send_text("hello"));
        assert_eq!(peer.stats().frames_out, 0);
    }

    #[test]
    fn test_close_before_start_is_noop() {
        let closes = Arc::new(AtomicU64::new(0));
        let counter = closes.clone();
        let peer = Peer::builder()
            .on_close(move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .build();

        peer.close();
        assert_eq!(closes.load(Ordering::SeqCst), 0);
        assert_eq!(peer.close_reason(), None);
    }

    #[tokio::test]
    async fn test_connect_twice_fails() {
        let peer = Peer::builder()
            .handshake_timeout(Duration::from_millis(200))
            .build();

        peer.connect("127.0.0.1", 9).unwrap();
        assert!(matches!(peer.connect("127.0.0.1", 9), Err(LinkError::AlreadyStarted)));
        peer.close();
        assert!(matches!(peer.connect("127.0.0.1", 9), Err(LinkError::AlreadyStarted)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dialing_watchdog_reports_dial_timeout() {
        let peer = Peer::builder()
            .handshake_timeout(Duration::from_millis(300))
            .build();
        peer.begin(PeerState::Dialing).unwrap();
        peer.arm_watchdog(PeerState::Dialing);

        tokio::time::sleep(Duration::from_millis(299)).await;
        assert_eq!(peer.state(), PeerState::Dialing);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(peer.state(), PeerState::Closed);
        assert_eq!(peer.close_reason(), Some(CloseReason::DialTimeout));

        // Nothing was ever connected, so there is no writer to wait for
        tokio::time::timeout(Duration::from_secs(1), peer.closed())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_closed_returns_for_unstarted_peer() {
        let peer = Peer::builder().build();
        peer.close();
        tokio::time::timeout(Duration::from_secs(1), peer.closed())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_connect_rejects_invalid_config() {
        let peer = Peer::builder().max_payload_size(0).build();
        assert!(matches!(peer.connect("127.0.0.1", 9), Err(LinkError::ConfigError(_))));
        // The failed attempt did not consume the peer
        assert_eq!(peer.state(), PeerState::Closed);
    }
}
