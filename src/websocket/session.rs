//! WebSocket Session
//!
//! One connected viewer: an inbound loop that only watches for liveness and
//! an outbound loop that writes broadcast payloads and keepalive pings.
//! Whichever loop fails first tears the session down; the other one follows
//! through the session's cancellation token.

use bytes::{BufMut, Bytes, BytesMut};
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout, timeout_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::hub::{ConnectionHub, HubError, SessionId};
use super::queue::{OutboundQueue, Payload};
use super::transport::{Frame, FrameSink, FrameStream, TransportError};

/// Separator between payloads coalesced into one frame
pub const PAYLOAD_DELIMITER: u8 = b'\n';

/// Keepalive and write timing for sessions
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Time allowed to write one frame
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,
    /// Time allowed between pongs before the peer is considered dead
    #[serde(default = "default_pong_timeout_ms")]
    pub pong_timeout_ms: u64,
    /// Ping period; defaults to 9/10 of the pong timeout
    #[serde(default)]
    pub ping_interval_ms: Option<u64>,
    /// Largest inbound message accepted, in bytes
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

fn default_write_timeout_ms() -> u64 {
    10_000
}

fn default_pong_timeout_ms() -> u64 {
    60_000
}

fn default_max_message_size() -> usize {
    1024
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            write_timeout_ms: default_write_timeout_ms(),
            pong_timeout_ms: default_pong_timeout_ms(),
            ping_interval_ms: None,
            max_message_size: default_max_message_size(),
        }
    }
}

impl SessionConfig {
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn pong_timeout(&self) -> Duration {
        Duration::from_millis(self.pong_timeout_ms)
    }

    pub fn ping_interval(&self) -> Duration {
        match self.ping_interval_ms {
            Some(ms) => Duration::from_millis(ms),
            None => self.pong_timeout() * 9 / 10,
        }
    }

    /// Pings must go out before the pong deadline can expire
    pub fn validate(&self) -> Result<(), String> {
        if self.pong_timeout_ms == 0 || self.write_timeout_ms == 0 {
            return Err("session timeouts must be non-zero".to_string());
        }
        let ping = self.ping_interval();
        if ping.is_zero() || ping >= self.pong_timeout() {
            return Err(format!(
                "ping interval ({:?}) must be non-zero and shorter than pong timeout ({:?})",
                ping,
                self.pong_timeout()
            ));
        }
        Ok(())
    }
}

/// Why a session loop stopped
#[derive(Debug)]
pub enum SessionEnd {
    /// The hub closed the outbound queue
    Unregistered,
    /// The other loop ended first
    Cancelled,
    /// The peer sent a close frame or went away
    PeerClosed,
    Failed(TransportError),
}

/// State shared by a session's two loops
struct Shared {
    id: SessionId,
    hub: ConnectionHub,
    queue: Arc<OutboundQueue>,
    cancel: CancellationToken,
    torn_down: AtomicBool,
}

impl Shared {
    /// Stop both loops and ask the hub to drop the session, exactly once
    async fn teardown(&self, end: &SessionEnd) {
        self.cancel.cancel();
        if self.torn_down.swap(true, Ordering::AcqRel) {
            return;
        }

        match end {
            SessionEnd::Failed(e) => {
                tracing::info!(session_id = %self.id, error = %e, "Session failed")
            }
            other => tracing::debug!(session_id = %self.id, reason = ?other, "Session ending"),
        }
        self.hub.unregister(self.id).await;
    }
}

/// One viewer connection
pub struct Session {
    shared: Arc<Shared>,
    config: SessionConfig,
}

impl Session {
    /// Register a new session with the hub.
    ///
    /// Returns only after the hub admitted it, so the caller can start the
    /// loops knowing no broadcast will be missed.
    pub async fn register(hub: &ConnectionHub, config: SessionConfig) -> Result<Self, HubError> {
        let id = SessionId::new_v4();
        let queue = hub.new_queue();
        hub.register(id, Arc::clone(&queue)).await?;

        Ok(Self {
            shared: Arc::new(Shared {
                id,
                hub: hub.clone(),
                queue,
                cancel: CancellationToken::new(),
                torn_down: AtomicBool::new(false),
            }),
            config,
        })
    }

    pub fn id(&self) -> SessionId {
        self.shared.id
    }

    /// Run both loops until the session ends
    pub async fn run<W, R>(self, sink: W, stream: R)
    where
        W: FrameSink + 'static,
        R: FrameStream + 'static,
    {
        let id = self.shared.id;
        let outbound = tokio::spawn(write_loop(
            Arc::clone(&self.shared),
            sink,
            self.config.clone(),
        ));
        let inbound = tokio::spawn(read_loop(
            Arc::clone(&self.shared),
            stream,
            self.config.pong_timeout(),
        ));

        let (outbound, inbound) = tokio::join!(outbound, inbound);
        if let Err(e) = outbound {
            tracing::error!(session_id = %id, error = %e, "Outbound loop panicked");
        }
        if let Err(e) = inbound {
            tracing::error!(session_id = %id, error = %e, "Inbound loop panicked");
        }

        // Covers the panic paths above; a no-op otherwise
        self.shared.teardown(&SessionEnd::Cancelled).await;

        tracing::info!(
            session_id = %id,
            dropped = self.shared.queue.dropped(),
            "Session closed"
        );
    }
}

/// Inbound loop: discard everything, refresh the deadline on pong
async fn read_loop<R: FrameStream>(shared: Arc<Shared>, mut stream: R, pong_timeout: Duration) {
    let mut deadline = Instant::now() + pong_timeout;

    let end = loop {
        let next = tokio::select! {
            _ = shared.cancel.cancelled() => break SessionEnd::Cancelled,
            next = timeout_at(deadline, stream.next_frame()) => next,
        };

        match next {
            Err(_) => break SessionEnd::Failed(TransportError::PongTimeout(pong_timeout)),
            Ok(None) | Ok(Some(Ok(Frame::Close))) => break SessionEnd::PeerClosed,
            Ok(Some(Err(e))) => break SessionEnd::Failed(e),
            Ok(Some(Ok(Frame::Pong))) => {
                deadline = Instant::now() + pong_timeout;
            }
            Ok(Some(Ok(_))) => {
                tracing::trace!(session_id = %shared.id, "Discarding inbound frame");
            }
        }
    };

    shared.teardown(&end).await;
}

/// Outbound loop: coalesce queued payloads into frames, ping on a timer
async fn write_loop<W: FrameSink>(shared: Arc<Shared>, mut sink: W, config: SessionConfig) {
    let write_timeout = config.write_timeout();
    let ping_interval = config.ping_interval();
    let mut ping = tokio::time::interval_at(Instant::now() + ping_interval, ping_interval);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let end = loop {
        tokio::select! {
            _ = shared.cancel.cancelled() => {
                let _ = timeout(write_timeout, sink.send(Frame::Close)).await;
                break SessionEnd::Cancelled;
            }
            next = shared.queue.recv() => match next {
                Some(first) => {
                    let frame = Frame::Text(coalesce(first, shared.queue.drain()));
                    if let Err(e) = write(&mut sink, frame, write_timeout).await {
                        break SessionEnd::Failed(e);
                    }
                }
                None => {
                    let _ = timeout(write_timeout, sink.send(Frame::Close)).await;
                    break SessionEnd::Unregistered;
                }
            },
            _ = ping.tick() => {
                if let Err(e) = write(&mut sink, Frame::Ping, write_timeout).await {
                    break SessionEnd::Failed(e);
                }
            }
        }
    };

    // The ticker is dropped with this frame
    shared.teardown(&end).await;
}

async fn write<W: FrameSink>(
    sink: &mut W,
    frame: Frame,
    write_timeout: Duration,
) -> Result<(), TransportError> {
    match timeout(write_timeout, sink.send(frame)).await {
        Ok(result) => result,
        Err(_) => Err(TransportError::WriteTimeout(write_timeout)),
    }
}

/// Join payloads with [`PAYLOAD_DELIMITER`] into one buffer
pub fn coalesce(first: Payload, rest: Vec<Payload>) -> Bytes {
    if rest.is_empty() {
        return first;
    }

    let len = first.len() + rest.iter().map(|p| p.len() + 1).sum::<usize>();
    let mut buf = BytesMut::with_capacity(len);
    buf.put_slice(&first);
    for payload in rest {
        buf.put_u8(PAYLOAD_DELIMITER);
        buf.put_slice(&payload);
    }
    buf.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::hub::HubConfig;
    use async_trait::async_trait;
    use tokio::sync::mpsc;

    /// Records every frame written; can be told to fail or stall
    struct TestSink {
        written: mpsc::UnboundedSender<Frame>,
        fail_pings: bool,
        stall: bool,
    }

    #[async_trait]
    impl FrameSink for TestSink {
        async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
            if self.stall {
                std::future::pending::<()>().await;
            }
            if self.fail_pings && frame == Frame::Ping {
                return Err(TransportError::Io("broken pipe".to_string()));
            }
            let _ = self.written.send(frame);
            Ok(())
        }
    }

    /// Yields whatever the test feeds it; ends when the feeder is dropped
    struct TestStream {
        frames: mpsc::UnboundedReceiver<Result<Frame, TransportError>>,
    }

    #[async_trait]
    impl FrameStream for TestStream {
        async fn next_frame(&mut self) -> Option<Result<Frame, TransportError>> {
            self.frames.recv().await
        }
    }

    struct Harness {
        written: mpsc::UnboundedReceiver<Frame>,
        inbound: mpsc::UnboundedSender<Result<Frame, TransportError>>,
        handle: tokio::task::JoinHandle<()>,
        id: SessionId,
    }

    fn config() -> SessionConfig {
        SessionConfig {
            write_timeout_ms: 1_000,
            pong_timeout_ms: 10_000,
            ping_interval_ms: Some(4_000),
            ..Default::default()
        }
    }

    async fn start(hub: &ConnectionHub, config: SessionConfig, sink_fails_pings: bool) -> Harness {
        let (written_tx, written) = mpsc::unbounded_channel();
        let (inbound, frames) = mpsc::unbounded_channel();
        let session = Session::register(hub, config).await.unwrap();
        let id = session.id();
        let sink = TestSink {
            written: written_tx,
            fail_pings: sink_fails_pings,
            stall: false,
        };
        let handle = tokio::spawn(session.run(sink, TestStream { frames }));
        Harness {
            written,
            inbound,
            handle,
            id,
        }
    }

    fn text(s: &str) -> Frame {
        Frame::Text(Bytes::copy_from_slice(s.as_bytes()))
    }

    #[test]
    fn test_ping_interval_defaults_below_pong_timeout() {
        let config = SessionConfig::default();
        assert_eq!(config.pong_timeout(), Duration::from_secs(60));
        assert_eq!(config.ping_interval(), Duration::from_secs(54));
        assert!(config.validate().is_ok());

        let bad = SessionConfig {
            ping_interval_ms: Some(60_000),
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_coalesce_joins_with_delimiter() {
        let joined = coalesce(
            Bytes::from_static(b"a"),
            vec![Bytes::from_static(b"b"), Bytes::from_static(b"c")],
        );
        assert_eq!(&joined[..], b"a\nb\nc");

        let single = coalesce(Bytes::from_static(b"{\"x\":1}"), Vec::new());
        assert_eq!(&single[..], b"{\"x\":1}");
    }

    #[tokio::test]
    async fn test_queued_payloads_are_written_as_one_frame() {
        let hub = ConnectionHub::spawn(HubConfig::default());
        let session = Session::register(&hub, config()).await.unwrap();

        // Queue three payloads before the outbound loop gets to run
        for p in ["a", "b", "c"] {
            hub.broadcast(Bytes::from_static(p.as_bytes())).await.unwrap();
        }
        hub.connection_count().await;

        let (written_tx, mut written) = mpsc::unbounded_channel();
        let (_inbound, frames) = mpsc::unbounded_channel();
        let sink = TestSink {
            written: written_tx,
            fail_pings: false,
            stall: false,
        };
        tokio::spawn(session.run(sink, TestStream { frames }));

        assert_eq!(written.recv().await, Some(text("a\nb\nc")));
        hub.close().await;
        assert_eq!(written.recv().await, Some(Frame::Close));
    }

    #[tokio::test]
    async fn test_two_sessions_end_to_end() {
        let hub = ConnectionHub::spawn(HubConfig::default());
        let mut first = start(&hub, config(), false).await;
        let mut second = start(&hub, config(), false).await;

        hub.broadcast(Bytes::from_static(br#"{"x":1}"#)).await.unwrap();
        assert_eq!(first.written.recv().await, Some(text(r#"{"x":1}"#)));
        assert_eq!(second.written.recv().await, Some(text(r#"{"x":1}"#)));

        hub.unregister(first.id).await;
        assert_eq!(first.written.recv().await, Some(Frame::Close));
        first.handle.await.unwrap();

        hub.broadcast(Bytes::from_static(br#"{"x":2}"#)).await.unwrap();
        assert_eq!(second.written.recv().await, Some(text(r#"{"x":2}"#)));
        assert_eq!(first.written.recv().await, None);
        assert_eq!(hub.connection_count().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_peer_is_dropped_at_pong_timeout() {
        let hub = ConnectionHub::spawn(HubConfig::default());
        let started = Instant::now();
        let mut harness = start(&hub, config(), false).await;

        harness.handle.await.unwrap();
        let elapsed = started.elapsed();

        assert!(elapsed >= Duration::from_millis(10_000));
        assert!(elapsed < Duration::from_millis(10_000 + 100));
        assert_eq!(hub.connection_count().await, 0);

        // Two pings went out before the deadline, then the close frame
        assert_eq!(harness.written.recv().await, Some(Frame::Ping));
        assert_eq!(harness.written.recv().await, Some(Frame::Ping));
        assert_eq!(harness.written.recv().await, Some(Frame::Close));
        drop(harness.inbound);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pong_extends_the_deadline() {
        let hub = ConnectionHub::spawn(HubConfig::default());
        let started = Instant::now();
        let harness = start(&hub, config(), false).await;

        tokio::time::sleep(Duration::from_millis(8_000)).await;
        harness.inbound.send(Ok(Frame::Pong)).unwrap();
        tokio::time::sleep(Duration::from_millis(8_000)).await;
        assert_eq!(hub.connection_count().await, 1);

        harness.handle.await.unwrap();
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(18_000));
        assert!(elapsed < Duration::from_millis(18_000 + 100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_inbound_application_data_is_ignored() {
        let hub = ConnectionHub::spawn(HubConfig::default());
        let harness = start(&hub, config(), false).await;

        for _ in 0..5 {
            harness.inbound.send(Ok(Frame::Other)).unwrap();
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(hub.connection_count().await, 1);

        // Application data does not count as a pong
        harness.handle.await.unwrap();
        assert_eq!(hub.connection_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ping_failure_tears_session_down() {
        let hub = ConnectionHub::spawn(HubConfig::default());
        let started = Instant::now();
        let harness = start(&hub, config(), true).await;

        harness.handle.await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(4_000));
        assert!(started.elapsed() < Duration::from_millis(5_000));
        assert_eq!(hub.connection_count().await, 0);
        drop(harness.inbound);
    }

    #[tokio::test]
    async fn test_read_error_tears_session_down() {
        let hub = ConnectionHub::spawn(HubConfig::default());
        let mut harness = start(&hub, config(), false).await;

        harness
            .inbound
            .send(Err(TransportError::Io("reset by peer".to_string())))
            .unwrap();
        harness.handle.await.unwrap();

        assert_eq!(hub.connection_count().await, 0);
        assert_eq!(harness.written.recv().await, Some(Frame::Close));
    }

    #[tokio::test]
    async fn test_peer_close_tears_session_down() {
        let hub = ConnectionHub::spawn(HubConfig::default());
        let harness = start(&hub, config(), false).await;

        drop(harness.inbound);
        harness.handle.await.unwrap();
        assert_eq!(hub.connection_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_write_times_out() {
        let hub = ConnectionHub::spawn(HubConfig::default());
        let session = Session::register(&hub, config()).await.unwrap();
        let (written_tx, _written) = mpsc::unbounded_channel();
        let (_inbound, frames) = mpsc::unbounded_channel();
        let sink = TestSink {
            written: written_tx,
            fail_pings: false,
            stall: true,
        };
        let handle = tokio::spawn(session.run(sink, TestStream { frames }));

        hub.broadcast(Bytes::from_static(b"stuck")).await.unwrap();
        handle.await.unwrap();
        assert_eq!(hub.connection_count().await, 0);
    }

    #[tokio::test]
    async fn test_hub_close_ends_sessions() {
        let hub = ConnectionHub::spawn(HubConfig::default());
        let mut a = start(&hub, config(), false).await;
        let mut b = start(&hub, config(), false).await;

        hub.close().await;

        a.handle.await.unwrap();
        b.handle.await.unwrap();
        assert_eq!(a.written.recv().await, Some(Frame::Close));
        assert_eq!(b.written.recv().await, Some(Frame::Close));
    }
}
