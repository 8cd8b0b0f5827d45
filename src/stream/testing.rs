//! Scripted transport shared by the stream and console tests.

use crate::stream::client::{LogConnection, LogTransport, TransportError};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

type Frame = Option<Result<String, TransportError>>;

/// Transport whose connections replay frames pushed by the test.
#[derive(Default)]
pub(crate) struct FakeTransport {
    pub(crate) senders: Mutex<Vec<mpsc::UnboundedSender<Frame>>>,
    opened: AtomicUsize,
    closed: Arc<AtomicUsize>,
    refuse: bool,
}

struct FakeConnection {
    frames: mpsc::UnboundedReceiver<Frame>,
    closed: Arc<AtomicUsize>,
}

impl FakeTransport {
    pub(crate) fn refusing() -> Self {
        Self {
            refuse: true,
            ..Self::default()
        }
    }

    pub(crate) fn send(&self, connection: usize, frame: Frame) {
        let senders = self.senders.lock().unwrap();
        senders[connection].send(frame).unwrap();
    }

    pub(crate) fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub(crate) fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LogTransport for FakeTransport {
    async fn open(&self, url: &str) -> Result<Box<dyn LogConnection>, TransportError> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        if self.refuse {
            return Err(TransportError::Connect {
                url: url.to_string(),
                reason: "connection refused".to_string(),
            });
        }
        let (tx, rx) = mpsc::unbounded_channel();
        self.senders.lock().unwrap().push(tx);
        Ok(Box::new(FakeConnection {
            frames: rx,
            closed: Arc::clone(&self.closed),
        }))
    }
}

#[async_trait]
impl LogConnection for FakeConnection {
    async fn next_frame(&mut self) -> Option<Result<String, TransportError>> {
        self.frames.recv().await.flatten()
    }

    async fn close(&mut self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}
