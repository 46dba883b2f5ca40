//! WebSocket links over `tokio-tungstenite`.

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::debug;

use super::{Connector, Link, SessionError};

/// Opens WebSocket connections to a fixed server URL.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    /// Connector for `url` (for example `ws://localhost:8765`).
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    /// The server URL.
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Connector for WsConnector {
    type Link = WsLink;

    async fn open(&self) -> Result<WsLink, SessionError> {
        let (stream, response) = connect_async(self.url.as_str())
            .await
            .map_err(SessionError::connection)?;
        debug!(url = %self.url, status = %response.status(), "WebSocket connected");
        Ok(WsLink { stream })
    }
}

/// One open WebSocket connection.
pub struct WsLink {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl core::fmt::Debug for WsLink {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("WsLink").finish_non_exhaustive()
    }
}

impl Link for WsLink {
    async fn send_text(&mut self, text: String) -> Result<(), SessionError> {
        self.stream
            .send(Message::Text(text))
            .await
            .map_err(SessionError::connection)
    }

    async fn recv_text(&mut self) -> Result<Option<String>, SessionError> {
        // Pings are answered by tungstenite while reading; only data frames
        // and close are surfaced.
        while let Some(frame) = self.stream.next().await {
            match frame.map_err(SessionError::connection)? {
                Message::Text(text) => return Ok(Some(text)),
                Message::Binary(bytes) => match String::from_utf8(bytes) {
                    Ok(text) => return Ok(Some(text)),
                    Err(err) => debug!(error = %err, "Ignoring non-UTF-8 binary frame"),
                },
                Message::Close(_) => return Ok(None),
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
            }
        }
        Ok(None)
    }

    async fn close(&mut self) {
        if let Err(err) = self.stream.close(None).await {
            debug!(error = %err, "WebSocket close failed");
        }
    }
}
