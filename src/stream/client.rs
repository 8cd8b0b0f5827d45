//! Reconnect-aware log stream client.
//!
//! One connection at a time is pumped by a background task. The task reports
//! raw [`TransportSignal`]s tagged with its generation; the state machine
//! decides what they mean.

use crate::models::{ConnectionState, LogEvent};
use crate::stream::state::{LogBuffer, LogStreamMachine, TransportSignal};
use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, info};

const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Failed to connect to {url}: {reason}")]
    Connect { url: String, reason: String },

    #[error("Log stream read failed: {0}")]
    Read(String),

    #[error("Invalid log stream URL '{0}'")]
    InvalidUrl(String),
}

/// Opens connections to the log endpoint.
#[async_trait]
pub trait LogTransport: Send + Sync {
    async fn open(&self, url: &str) -> Result<Box<dyn LogConnection>, TransportError>;
}

/// One open connection.
#[async_trait]
pub trait LogConnection: Send {
    /// Next text payload; `None` once the peer has closed.
    async fn next_frame(&mut self) -> Option<Result<String, TransportError>>;

    /// Close our side of the connection.
    async fn close(&mut self);
}

struct ActiveConnection {
    generation: u64,
    shutdown: oneshot::Sender<()>,
}

impl ActiveConnection {
    fn shut_down(self) {
        // The pump may already be gone; that is fine.
        let _ = self.shutdown.send(());
        debug!("Closing log connection {}", self.generation);
    }
}

struct Inner {
    machine: LogStreamMachine,
    active: Option<ActiveConnection>,
}

struct Shared {
    inner: Mutex<Inner>,
    events_tx: broadcast::Sender<LogEvent>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, events: Vec<LogEvent>) {
        for event in events {
            // No subscribers is not an error.
            let _ = self.events_tx.send(event);
        }
    }

    fn apply(&self, generation: u64, signal: TransportSignal) {
        let appended = self.lock().machine.apply(generation, signal);
        self.publish(appended);
    }
}

/// Client for the backend's structured log stream.
pub struct LogStreamClient {
    url: String,
    transport: Arc<dyn LogTransport>,
    shared: Arc<Shared>,
}

impl LogStreamClient {
    /// `capacity` bounds the buffer as a ring; `None` keeps every event.
    pub fn new(url: impl Into<String>, transport: Arc<dyn LogTransport>, capacity: Option<usize>) -> Self {
        let buffer = capacity.map_or_else(LogBuffer::unbounded, LogBuffer::with_capacity);
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Self {
            url: url.into(),
            transport,
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    machine: LogStreamMachine::new(buffer),
                    active: None,
                }),
                events_tx,
            }),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Open the stream. No-op (returns `false`) while connecting or connected.
    pub fn connect(&self) -> bool {
        let mut inner = self.shared.lock();
        let Some((generation, events)) = inner.machine.begin_connect(&self.url) else {
            return false;
        };

        if let Some(stale) = inner.active.take() {
            stale.shut_down();
        }
        info!("Connecting to log stream at {}", self.url);
        inner.active = Some(self.spawn_pump(generation));
        drop(inner);

        self.shared.publish(events);
        true
    }

    /// Replace the current connection with a fresh one, from any state.
    pub fn reconnect(&self) {
        let mut inner = self.shared.lock();
        if let Some(previous) = inner.active.take() {
            previous.shut_down();
        }

        let (generation, events) = inner.machine.supersede(&self.url);
        info!("Reconnecting to log stream at {}", self.url);
        inner.active = Some(self.spawn_pump(generation));
        drop(inner);

        self.shared.publish(events);
    }

    /// Close the current connection without surfacing a close event.
    pub fn disconnect(&self) -> bool {
        let mut inner = self.shared.lock();
        if let Some(active) = inner.active.take() {
            active.shut_down();
        }
        inner.machine.disconnect()
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.lock().machine.state()
    }

    /// Snapshot of the buffered events, oldest first.
    pub fn events(&self) -> Vec<LogEvent> {
        self.shared.lock().machine.buffer().to_vec()
    }

    pub fn evicted(&self) -> u64 {
        self.shared.lock().machine.buffer().evicted()
    }

    /// Live feed of events appended from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<LogEvent> {
        self.shared.events_tx.subscribe()
    }

    fn spawn_pump(&self, generation: u64) -> ActiveConnection {
        let (shutdown, shutdown_rx) = oneshot::channel();
        tokio::spawn(pump(
            Arc::clone(&self.shared),
            Arc::clone(&self.transport),
            self.url.clone(),
            generation,
            shutdown_rx,
        ));
        ActiveConnection {
            generation,
            shutdown,
        }
    }
}

impl Drop for LogStreamClient {
    fn drop(&mut self) {
        if let Some(active) = self.shared.lock().active.take() {
            active.shut_down();
        }
    }
}

async fn pump(
    shared: Arc<Shared>,
    transport: Arc<dyn LogTransport>,
    url: String,
    generation: u64,
    mut shutdown: oneshot::Receiver<()>,
) {
    let opened = tokio::select! {
        _ = &mut shutdown => return,
        opened = transport.open(&url) => opened,
    };

    let mut connection = match opened {
        Ok(connection) => connection,
        Err(e) => {
            shared.apply(generation, TransportSignal::Error(e.to_string()));
            shared.apply(generation, TransportSignal::Close);
            return;
        }
    };

    shared.apply(generation, TransportSignal::Open);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                connection.close().await;
                return;
            }
            frame = connection.next_frame() => match frame {
                Some(Ok(text)) => shared.apply(generation, TransportSignal::Message(text)),
                Some(Err(e)) => {
                    shared.apply(generation, TransportSignal::Error(e.to_string()));
                    connection.close().await;
                    shared.apply(generation, TransportSignal::Close);
                    return;
                }
                None => {
                    shared.apply(generation, TransportSignal::Close);
                    return;
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LogLevel;
    use crate::stream::testing::FakeTransport;

    const URL: &str = "ws://localhost:5000/ws/logs";

    async fn settle() {
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
    }

    fn client(transport: &Arc<FakeTransport>) -> LogStreamClient {
        let transport: Arc<dyn LogTransport> = transport.clone();
        LogStreamClient::new(URL, transport, None)
    }

    fn levels(client: &LogStreamClient) -> Vec<LogLevel> {
        client.events().iter().map(|e| e.level).collect()
    }

    #[tokio::test]
    async fn test_connect_open_and_messages() {
        let transport = Arc::new(FakeTransport::default());
        let client = client(&transport);
        let mut feed = client.subscribe();

        assert!(client.connect());
        assert_eq!(client.state(), ConnectionState::Connecting);
        assert!(!client.connect());
        settle().await;

        assert_eq!(client.state(), ConnectionState::Connected);
        assert_eq!(transport.opened(), 1);

        transport.send(0, Some(Ok(r#"{"level": "info", "message": "Fetching AAPL"}"#.into())));
        transport.send(0, Some(Ok("garbage".into())));
        settle().await;

        assert_eq!(
            levels(&client),
            vec![LogLevel::Info, LogLevel::Success, LogLevel::Info, LogLevel::Error]
        );
        assert_eq!(client.state(), ConnectionState::Connected);

        assert!(feed.recv().await.unwrap().message.contains(URL));
        assert_eq!(feed.recv().await.unwrap().level, LogLevel::Success);
        assert_eq!(feed.recv().await.unwrap().message, "Fetching AAPL");
    }

    #[tokio::test]
    async fn test_refused_connection_errors_then_disconnects() {
        let transport = Arc::new(FakeTransport::refusing());
        let client = client(&transport);

        client.connect();
        settle().await;

        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert_eq!(
            levels(&client),
            vec![LogLevel::Info, LogLevel::Error, LogLevel::Warning]
        );
        assert!(client.events()[1].message.contains("connection refused"));
    }

    #[tokio::test]
    async fn test_read_error_surfaces_error_and_close() {
        let transport = Arc::new(FakeTransport::default());
        let client = client(&transport);
        client.connect();
        settle().await;

        transport.send(0, Some(Err(TransportError::Read("reset by peer".into()))));
        settle().await;

        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert_eq!(
            levels(&client),
            vec![LogLevel::Info, LogLevel::Success, LogLevel::Error, LogLevel::Warning]
        );
        assert_eq!(transport.closed(), 1);
    }

    #[tokio::test]
    async fn test_reconnect_closes_previous_silently() {
        let transport = Arc::new(FakeTransport::default());
        let client = client(&transport);
        client.connect();
        settle().await;

        client.reconnect();
        settle().await;

        assert_eq!(transport.closed(), 1);
        assert_eq!(transport.opened(), 2);
        assert_eq!(client.state(), ConnectionState::Connected);

        // Late traffic on the old connection is dropped.
        let before = client.events().len();
        let _ = transport.senders.lock().unwrap()[0].send(Some(Ok("{}".into())));
        settle().await;
        assert_eq!(client.events().len(), before);
        assert!(!levels(&client).contains(&LogLevel::Warning));
    }

    #[tokio::test]
    async fn test_no_automatic_reconnect_after_close() {
        let transport = Arc::new(FakeTransport::default());
        let client = client(&transport);
        client.connect();
        settle().await;

        transport.send(0, None);
        settle().await;

        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert_eq!(transport.opened(), 1);
        assert_eq!(levels(&client).last(), Some(&LogLevel::Warning));

        assert!(client.connect());
        settle().await;
        assert_eq!(client.state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_disconnect_closes_socket() {
        let transport = Arc::new(FakeTransport::default());
        let client = client(&transport);
        client.connect();
        settle().await;
        let before = client.events().len();

        assert!(client.disconnect());
        settle().await;

        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert_eq!(transport.closed(), 1);
        assert_eq!(client.events().len(), before);
    }

    #[tokio::test]
    async fn test_bounded_buffer_counts_evictions() {
        let transport = Arc::new(FakeTransport::default());
        let dyn_transport: Arc<dyn LogTransport> = transport.clone();
        let client = LogStreamClient::new(URL, dyn_transport, Some(2));
        client.connect();
        settle().await;

        for i in 0..3 {
            transport.send(0, Some(Ok(format!(r#"{{"message": "line {}"}}"#, i))));
        }
        settle().await;

        let messages: Vec<_> = client.events().into_iter().map(|e| e.message).collect();
        assert_eq!(messages, vec!["line 1", "line 2"]);
        assert_eq!(client.evicted(), 3);
    }
}
