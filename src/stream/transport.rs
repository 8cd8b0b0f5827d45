//! WebSocket transport for the log stream.

use crate::stream::client::{LogConnection, LogTransport, TransportError};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Url;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

/// Path of the log endpoint on the analysis backend.
pub const LOG_STREAM_PATH: &str = "/ws/logs";

/// Derive the log stream URL from the HTTP API base URL.
///
/// `http` becomes `ws`, `https` becomes `wss`; any base path is kept.
pub fn log_stream_url(api_url: &str) -> Result<String, TransportError> {
    let mut url = Url::parse(api_url).map_err(|_| TransportError::InvalidUrl(api_url.to_string()))?;

    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        _ => return Err(TransportError::InvalidUrl(api_url.to_string())),
    };
    url.set_scheme(scheme)
        .map_err(|_| TransportError::InvalidUrl(api_url.to_string()))?;

    let path = format!("{}{}", url.path().trim_end_matches('/'), LOG_STREAM_PATH);
    url.set_path(&path);
    url.set_query(None);
    url.set_fragment(None);

    Ok(url.to_string())
}

/// Opens `tokio-tungstenite` connections.
#[derive(Debug, Default, Clone, Copy)]
pub struct WsTransport;

#[async_trait]
impl LogTransport for WsTransport {
    async fn open(&self, url: &str) -> Result<Box<dyn LogConnection>, TransportError> {
        let (stream, response) = connect_async(url)
            .await
            .map_err(|e| TransportError::Connect {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        debug!("Log stream handshake: HTTP {}", response.status());
        Ok(Box::new(WsConnection { stream }))
    }
}

struct WsConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl LogConnection for WsConnection {
    async fn next_frame(&mut self) -> Option<Result<String, TransportError>> {
        while let Some(message) = self.stream.next().await {
            match message {
                Ok(Message::Text(text)) => return Some(Ok(text)),
                Ok(Message::Binary(bytes)) => {
                    return Some(Ok(String::from_utf8_lossy(&bytes).into_owned()))
                }
                Ok(Message::Close(frame)) => {
                    debug!("Log stream closed by server: {:?}", frame);
                    return None;
                }
                // Pings are answered by tungstenite itself.
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => {}
                Err(e) => return Some(Err(TransportError::Read(e.to_string()))),
            }
        }
        None
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            warn!("Failed to close log stream cleanly: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_stream_url_from_http() {
        assert_eq!(
            log_stream_url("http://localhost:5000").unwrap(),
            "ws://localhost:5000/ws/logs"
        );
        assert_eq!(
            log_stream_url("https://ritadel.example.com/backend/").unwrap(),
            "wss://ritadel.example.com/backend/ws/logs"
        );
    }

    #[test]
    fn test_log_stream_url_rejects_other_schemes() {
        assert_eq!(
            log_stream_url("ftp://localhost"),
            Err(TransportError::InvalidUrl("ftp://localhost".to_string()))
        );
        assert!(log_stream_url("not a url").is_err());
    }
}
