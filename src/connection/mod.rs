//! Connection Manager
//!
//! Owns the push-channel session: `Connecting -> Connected -> Disconnected ->
//! Connecting`, forever. Every connect attempt opens exactly one session; a
//! failure only ever shows up as a Disconnected transition followed by a
//! backoff wait. While connected, an application-level `ping` text frame is
//! sent on a fixed heartbeat interval.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use crate::state::PushMessage;

pub mod ws;

pub use ws::{derive_ws_url, WsTransport};

/// Text of the keepalive frame
pub const HEARTBEAT_TEXT: &str = "ping";

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("connection refused: {0}")]
    Refused(String),
}

/// Opens sessions to the push channel
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn Session>, TransportError>;
}

/// One open push-channel session
#[async_trait]
pub trait Session: Send {
    /// Next text frame; `Ok(None)` once the peer closed the session
    async fn recv(&mut self) -> Result<Option<String>, TransportError>;

    async fn send_text(&mut self, text: &str) -> Result<(), TransportError>;
}

/// Receiver of decoded pushes and connect notifications
pub trait PushSink: Send + Sync {
    fn push(&self, message: PushMessage);

    /// A session was just established
    fn connected(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Disconnected { retry_in: Duration },
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionStatus::Connecting => write!(f, "connecting"),
            ConnectionStatus::Connected => write!(f, "connected"),
            ConnectionStatus::Disconnected { retry_in } => {
                write!(f, "disconnected (retry in {}ms)", retry_in.as_millis())
            }
        }
    }
}

pub type StatusCallback = Arc<dyn Fn(ConnectionStatus) + Send + Sync>;

/// Exponential reconnect delay
///
/// [`Backoff::next_delay`] hands out the current delay and doubles it, up to
/// the ceiling. [`Backoff::reset`] goes back to the floor.
#[derive(Debug, Clone)]
pub struct Backoff {
    floor: Duration,
    ceiling: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(floor: Duration, ceiling: Duration) -> Self {
        let ceiling = ceiling.max(floor);
        Self {
            floor,
            ceiling,
            current: floor,
        }
    }

    pub fn reset(&mut self) {
        self.current = self.floor;
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.ceiling);
        delay
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(500), Duration::from_secs(10))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionSettings {
    pub reconnect_floor: Duration,
    pub reconnect_ceiling: Duration,
    pub heartbeat: Duration,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            reconnect_floor: Duration::from_millis(500),
            reconnect_ceiling: Duration::from_secs(10),
            heartbeat: Duration::from_secs(15),
        }
    }
}

pub struct ConnectionManager {
    transport: Arc<dyn Transport>,
    sink: Arc<dyn PushSink>,
    heartbeat: Duration,
    backoff: Backoff,
    status: Arc<RwLock<ConnectionStatus>>,
    on_status: Option<StatusCallback>,
}

impl ConnectionManager {
    pub fn new(
        transport: Arc<dyn Transport>,
        sink: Arc<dyn PushSink>,
        settings: ConnectionSettings,
    ) -> Self {
        Self {
            transport,
            sink,
            heartbeat: settings.heartbeat,
            backoff: Backoff::new(settings.reconnect_floor, settings.reconnect_ceiling),
            status: Arc::new(RwLock::new(ConnectionStatus::Connecting)),
            on_status: None,
        }
    }

    /// Called on every status transition
    pub fn with_status_callback(mut self, callback: StatusCallback) -> Self {
        self.on_status = Some(callback);
        self
    }

    /// Shared view of the current status
    pub fn status(&self) -> Arc<RwLock<ConnectionStatus>> {
        self.status.clone()
    }

    /// Run the reconnect loop on its own task; abort the handle to stop it
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(mut self) {
        loop {
            self.set_status(ConnectionStatus::Connecting);

            match self.transport.connect().await {
                Ok(session) => {
                    self.backoff.reset();
                    self.set_status(ConnectionStatus::Connected);
                    self.sink.connected();
                    self.serve(session).await;
                }
                Err(e) => debug!("Push channel connect failed: {}", e),
            }

            let retry_in = self.backoff.next_delay();
            self.set_status(ConnectionStatus::Disconnected { retry_in });
            tokio::time::sleep(retry_in).await;
        }
    }

    fn set_status(&self, status: ConnectionStatus) {
        *self.status.write() = status;
        if let Some(callback) = &self.on_status {
            callback(status);
        }
    }

    /// Pump one session until it closes or fails
    async fn serve(&self, mut session: Box<dyn Session>) {
        let mut heartbeat = interval_at(Instant::now() + self.heartbeat, self.heartbeat);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                frame = session.recv() => match frame {
                    Ok(Some(text)) => self.dispatch(&text),
                    Ok(None) => {
                        info!("Push channel closed by peer");
                        return;
                    }
                    Err(e) => {
                        warn!("Push channel error: {}", e);
                        return;
                    }
                },
                _ = heartbeat.tick() => {
                    trace!("Heartbeat");
                    if let Err(e) = session.send_text(HEARTBEAT_TEXT).await {
                        warn!("Heartbeat failed: {}", e);
                        return;
                    }
                }
            }
        }
    }

    fn dispatch(&self, text: &str) {
        match serde_json::from_str::<PushMessage>(text) {
            Ok(message) => self.sink.push(message),
            Err(e) => debug!("Ignoring malformed push ({}): {}", e, text),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use tokio::sync::mpsc;

    struct FakeSession {
        incoming: mpsc::UnboundedReceiver<String>,
        sent: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Session for FakeSession {
        async fn recv(&mut self) -> Result<Option<String>, TransportError> {
            Ok(self.incoming.recv().await)
        }

        async fn send_text(&mut self, text: &str) -> Result<(), TransportError> {
            self.sent.lock().push(text.to_string());
            Ok(())
        }
    }

    /// Replays a script of sessions; `None` or an empty script fails the attempt
    #[derive(Default)]
    struct FakeTransport {
        script: Mutex<VecDeque<Option<FakeSession>>>,
        attempts: Mutex<Vec<Instant>>,
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn connect(&self) -> Result<Box<dyn Session>, TransportError> {
            self.attempts.lock().push(Instant::now());
            match self.script.lock().pop_front() {
                Some(Some(session)) => Ok(Box::new(session)),
                _ => Err(TransportError::Refused("test".into())),
            }
        }
    }

    impl FakeTransport {
        fn gaps_ms(&self) -> Vec<u128> {
            self.attempts
                .lock()
                .windows(2)
                .map(|w| (w[1] - w[0]).as_millis())
                .collect()
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        pushes: Mutex<Vec<PushMessage>>,
        connects: Mutex<usize>,
    }

    impl PushSink for RecordingSink {
        fn push(&self, message: PushMessage) {
            self.pushes.lock().push(message);
        }

        fn connected(&self) {
            *self.connects.lock() += 1;
        }
    }

    fn session() -> (FakeSession, mpsc::UnboundedSender<String>, Arc<Mutex<Vec<String>>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sent = Arc::new(Mutex::new(Vec::new()));
        (
            FakeSession {
                incoming: rx,
                sent: sent.clone(),
            },
            tx,
            sent,
        )
    }

    fn manager(transport: Arc<FakeTransport>, sink: Arc<RecordingSink>) -> ConnectionManager {
        ConnectionManager::new(transport, sink, ConnectionSettings::default())
    }

    #[test]
    fn test_backoff_doubles_to_ceiling() {
        let mut backoff = Backoff::default();
        let delays: Vec<u128> = (0..7).map(|_| backoff.next_delay().as_millis()).collect();
        assert_eq!(delays, vec![500, 1000, 2000, 4000, 8000, 10000, 10000]);

        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_connects_follow_backoff() {
        let transport = Arc::new(FakeTransport::default());
        let sink = Arc::new(RecordingSink::default());
        let task = manager(transport.clone(), sink.clone()).spawn();

        tokio::time::sleep(Duration::from_millis(35_600)).await;
        task.abort();

        assert_eq!(
            transport.gaps_ms(),
            vec![500, 1000, 2000, 4000, 8000, 10000, 10000]
        );
        assert_eq!(*sink.connects.lock(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_resets_after_connect() {
        let transport = Arc::new(FakeTransport::default());
        let (closed, tx, _) = session();
        drop(tx);
        transport
            .script
            .lock()
            .extend([None, None, Some(closed), None]);
        let sink = Arc::new(RecordingSink::default());
        let task = manager(transport.clone(), sink.clone()).spawn();

        tokio::time::sleep(Duration::from_millis(3_100)).await;
        task.abort();

        assert_eq!(transport.gaps_ms(), vec![500, 1000, 500, 1000]);
        assert_eq!(*sink.connects.lock(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_while_connected() {
        let transport = Arc::new(FakeTransport::default());
        let (open, _tx, sent) = session();
        transport.script.lock().push_back(Some(open));
        let sink = Arc::new(RecordingSink::default());
        let manager = manager(transport.clone(), sink);
        let status = manager.status();
        let task = manager.spawn();

        tokio::time::sleep(Duration::from_secs(46)).await;
        assert_eq!(*status.read(), ConnectionStatus::Connected);
        task.abort();

        assert_eq!(*sent.lock(), vec!["ping", "ping", "ping"]);
        assert_eq!(transport.attempts.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pushes_are_dispatched_and_malformed_ignored() {
        let transport = Arc::new(FakeTransport::default());
        let (open, tx, _) = session();
        transport.script.lock().push_back(Some(open));
        let sink = Arc::new(RecordingSink::default());
        let task = manager(transport, sink.clone()).spawn();

        tx.send(r#"{"type":"bank","state":{"current_bank":2}}"#.into())
            .unwrap();
        tx.send("not json".into()).unwrap();
        tx.send(r#"{"type":"update"}"#.into()).unwrap();
        tx.send(r#"{"state":{"current_bank":3}}"#.into()).unwrap();

        tokio::time::sleep(Duration::from_millis(10)).await;
        task.abort();

        let pushes = sink.pushes.lock();
        assert_eq!(pushes.len(), 2);
        assert!(pushes[0].is_bank_change());
        assert_eq!(pushes[1].state.current_bank, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_callback_sees_transitions() {
        let transport = Arc::new(FakeTransport::default());
        let (closed, tx, _) = session();
        drop(tx);
        transport.script.lock().push_back(Some(closed));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let task = manager(transport, Arc::new(RecordingSink::default()))
            .with_status_callback(Arc::new(move |status| seen_clone.lock().push(status)))
            .spawn();

        tokio::time::sleep(Duration::from_millis(100)).await;
        task.abort();

        assert_eq!(
            seen.lock()[..3],
            [
                ConnectionStatus::Connecting,
                ConnectionStatus::Connected,
                ConnectionStatus::Disconnected {
                    retry_in: Duration::from_millis(500)
                },
            ]
        );
    }
}
