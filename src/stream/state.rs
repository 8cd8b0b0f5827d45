//! Connection state machine and log buffer for the log stream.
//!
//! Everything here is synchronous; the client drives it from its pump task
//! and tags every transport signal with the generation that produced it.

use crate::models::{ConnectionState, LogEvent};
use std::collections::VecDeque;
use tracing::debug;

/// Raw signal reported by a transport connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportSignal {
    Open,
    Message(String),
    Error(String),
    Close,
}

/// Append-only event buffer, optionally bounded.
///
/// With a capacity the buffer behaves as a ring: the oldest event is evicted
/// and counted.
#[derive(Debug, Clone, Default)]
pub struct LogBuffer {
    events: VecDeque<LogEvent>,
    capacity: Option<usize>,
    evicted: u64,
}

impl LogBuffer {
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(capacity.min(1024)),
            capacity: Some(capacity.max(1)),
            evicted: 0,
        }
    }

    pub fn push(&mut self, event: LogEvent) {
        if let Some(capacity) = self.capacity {
            while self.events.len() >= capacity {
                self.events.pop_front();
                self.evicted += 1;
            }
        }
        self.events.push_back(event);
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Events dropped by the ring policy so far.
    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    pub fn iter(&self) -> impl Iterator<Item = &LogEvent> {
        self.events.iter()
    }

    pub fn to_vec(&self) -> Vec<LogEvent> {
        self.events.iter().cloned().collect()
    }
}

/// Connection lifecycle plus the buffer it feeds.
#[derive(Debug)]
pub struct LogStreamMachine {
    state: ConnectionState,
    generation: u64,
    buffer: LogBuffer,
}

impl LogStreamMachine {
    pub fn new(buffer: LogBuffer) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            generation: 0,
            buffer,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Generation of the connection currently allowed to report signals.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn buffer(&self) -> &LogBuffer {
        &self.buffer
    }

    /// Start a connection unless one is already pending or open.
    ///
    /// Returns the new generation and the events appended.
    pub fn begin_connect(&mut self, url: &str) -> Option<(u64, Vec<LogEvent>)> {
        if matches!(
            self.state,
            ConnectionState::Connecting | ConnectionState::Connected
        ) {
            debug!("Log stream already {}, ignoring connect", self.state);
            return None;
        }
        Some(self.enter_connecting(format!("Connecting to {}", url)))
    }

    /// Start a new connection from any state, invalidating the previous one.
    pub fn supersede(&mut self, url: &str) -> (u64, Vec<LogEvent>) {
        self.enter_connecting(format!("Reconnecting to {}", url))
    }

    /// Drop the current connection without surfacing its close.
    ///
    /// Returns `false` if already disconnected.
    pub fn disconnect(&mut self) -> bool {
        if self.state == ConnectionState::Disconnected {
            return false;
        }
        self.generation += 1;
        self.state = ConnectionState::Disconnected;
        true
    }

    /// Apply a transport signal. Signals from older generations are ignored.
    pub fn apply(&mut self, generation: u64, signal: TransportSignal) -> Vec<LogEvent> {
        if generation != self.generation {
            debug!(
                "Ignoring {:?} from superseded connection {} (current {})",
                signal, generation, self.generation
            );
            return Vec::new();
        }

        let event = match signal {
            TransportSignal::Open => {
                self.state = ConnectionState::Connected;
                LogEvent::success("Log stream connected")
            }
            TransportSignal::Message(raw) => parse_event(&raw),
            TransportSignal::Error(reason) => {
                self.state = ConnectionState::Errored;
                LogEvent::error(format!("Log stream connection error: {}", reason))
            }
            TransportSignal::Close => {
                if self.state == ConnectionState::Disconnected {
                    return Vec::new();
                }
                self.state = ConnectionState::Disconnected;
                LogEvent::warning("Log stream closed")
            }
        };

        self.buffer.push(event.clone());
        vec![event]
    }

    fn enter_connecting(&mut self, message: String) -> (u64, Vec<LogEvent>) {
        self.generation += 1;
        self.state = ConnectionState::Connecting;
        let event = LogEvent::info(message);
        self.buffer.push(event.clone());
        (self.generation, vec![event])
    }
}

/// Parse one inbound payload; failures become an error event quoting the raw text.
fn parse_event(raw: &str) -> LogEvent {
    match serde_json::from_str::<LogEvent>(raw) {
        Ok(event) => event,
        Err(e) => LogEvent::error(format!("Unparseable log message ({}): {}", e, raw)),
    }
}
