//! The stream transport seam and its WebSocket implementation.

use std::future::Future;

use serde::{Deserialize, Serialize};

use crate::StreamError;

/// One named server-initiated event with a JSON body.
///
/// Wire format: each frame is a JSON object `{"event": name, "data": body}`.
/// `data` defaults to `null` when the server omits it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    pub event: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Establishes connections to the push endpoint.
pub trait StreamConnector: Send + Sync + 'static {
    /// The connection type produced by this connector.
    type Connection: StreamConnection;

    /// Opens a fresh connection. Reconnects always go through here; there
    /// are no resume-from-offset semantics.
    fn connect(
        &self,
    ) -> impl Future<Output = Result<Self::Connection, StreamError>> + Send;
}

/// A single established push connection yielding raw text frames.
pub trait StreamConnection: Send + 'static {
    /// The next frame from the server.
    ///
    /// `Ok(None)` means the connection closed cleanly. After returning an
    /// error, implementations should eventually return `Ok(None)` so the
    /// reader loop terminates.
    fn next_frame(
        &mut self,
    ) -> impl Future<Output = Result<Option<String>, StreamError>> + Send;
}

// ---------------------------------------------------------------------------
// WebSocket implementation
// ---------------------------------------------------------------------------

#[cfg(feature = "websocket")]
mod websocket {
    use futures_util::StreamExt;
    use tokio_tungstenite::tungstenite::Message;

    use super::*;

    type WsStream = tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >;

    /// [`StreamConnector`] dialing a WebSocket push endpoint.
    pub struct WebSocketConnector {
        url: String,
    }

    impl WebSocketConnector {
        pub fn new(url: impl Into<String>) -> Self {
            Self { url: url.into() }
        }
    }

    impl StreamConnector for WebSocketConnector {
        type Connection = WebSocketConnection;

        async fn connect(&self) -> Result<WebSocketConnection, StreamError> {
            let (ws, _) = tokio_tungstenite::connect_async(self.url.as_str())
                .await
                .map_err(|e| StreamError::Connect(e.to_string()))?;
            tracing::debug!(url = %self.url, "push stream connected");
            Ok(WebSocketConnection { ws })
        }
    }

    /// A single WebSocket push connection.
    pub struct WebSocketConnection {
        ws: WsStream,
    }

    impl StreamConnection for WebSocketConnection {
        async fn next_frame(&mut self) -> Result<Option<String>, StreamError> {
            loop {
                match self.ws.next().await {
                    Some(Ok(Message::Text(text))) => {
                        return Ok(Some(text.to_string()));
                    }
                    Some(Ok(Message::Binary(data))) => {
                        return Ok(Some(
                            String::from_utf8_lossy(&data).into_owned(),
                        ));
                    }
                    Some(Ok(Message::Close(_))) | None => return Ok(None),
                    Some(Ok(_)) => continue, // skip ping/pong/frame
                    Some(Err(e)) => {
                        return Err(StreamError::Connection(e.to_string()));
                    }
                }
            }
        }
    }
}

#[cfg(feature = "websocket")]
pub use websocket::{WebSocketConnection, WebSocketConnector};
