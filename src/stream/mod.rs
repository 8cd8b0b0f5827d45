//! Live log stream from the analysis backend.

pub mod client;
pub mod state;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use client::LogStreamClient;
pub use transport::{log_stream_url, WsTransport};
