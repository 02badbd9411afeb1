//! WebSocket transport implementation.
//!
//! This module provides a WebSocket client transport using tokio-tungstenite.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use taskwire_protocol::codec::MAX_FRAME_SIZE;
use taskwire_protocol::{Encoded, Encoding, Frame, FrameCodec, ProtocolError};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        client::IntoClientRequest,
        http::{header::AUTHORIZATION, HeaderValue, StatusCode},
        Error as WsError, Message,
    },
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, error, info, warn};

use crate::traits::{Connection, ConnectionId, Credential, Transport, TransportError};

/// WebSocket transport configuration.
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// Server URL (`ws://` or `wss://`).
    pub url: String,
    /// Outbound frame encoding.
    pub encoding: Encoding,
    /// Maximum inbound message size in bytes. Larger messages are skipped.
    pub max_message_size: usize,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:5000/ws".to_string(),
            encoding: Encoding::Json,
            max_message_size: MAX_FRAME_SIZE,
        }
    }
}

/// WebSocket client transport.
pub struct WebSocketTransport {
    config: WebSocketConfig,
}

impl WebSocketTransport {
    /// Create a new WebSocket transport.
    #[must_use]
    pub fn new(config: WebSocketConfig) -> Self {
        Self { config }
    }

    /// Create a transport for `url` with default settings.
    #[must_use]
    pub fn with_url(url: impl Into<String>) -> Self {
        Self::new(WebSocketConfig {
            url: url.into(),
            ..Default::default()
        })
    }

    /// Get the configured server URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.config.url
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&self, credential: &Credential) -> Result<Box<dyn Connection>, TransportError> {
        let mut request = self
            .config
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| TransportError::ConnectFailed(format!("Invalid server URL: {}", e)))?;

        let header = HeaderValue::from_str(&credential.bearer()).map_err(|_| {
            TransportError::Unauthorized("credential is not a valid header value".into())
        })?;
        request.headers_mut().insert(AUTHORIZATION, header);

        debug!(url = %self.config.url, "Opening WebSocket");

        let (stream, response) = connect_async(request).await.map_err(handshake_error)?;

        let conn = WebSocketConnection::new(stream, &self.config);
        info!(
            connection = %conn.id,
            status = %response.status(),
            "WebSocket handshake completed"
        );
        Ok(Box::new(conn))
    }

    fn name(&self) -> &'static str {
        "websocket"
    }
}

/// Map a handshake failure onto the transport error taxonomy.
fn handshake_error(err: WsError) -> TransportError {
    match err {
        WsError::Http(response) => {
            let status = response.status();
            if is_auth_rejection(status) {
                TransportError::Unauthorized(format!("handshake rejected with {}", status))
            } else {
                TransportError::ConnectFailed(format!("handshake failed with {}", status))
            }
        }
        WsError::Io(e) => TransportError::Io(e),
        WsError::ConnectionClosed | WsError::AlreadyClosed => TransportError::ConnectionClosed,
        other => TransportError::ConnectFailed(other.to_string()),
    }
}

fn is_auth_rejection(status: StatusCode) -> bool {
    status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN
}

/// A WebSocket client connection.
pub struct WebSocketConnection {
    id: ConnectionId,
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    codec: FrameCodec,
    is_open: bool,
    max_message_size: usize,
}

impl WebSocketConnection {
    fn new(stream: WebSocketStream<MaybeTlsStream<TcpStream>>, config: &WebSocketConfig) -> Self {
        Self {
            id: ConnectionId::generate(),
            stream,
            codec: FrameCodec::new(config.encoding),
            is_open: true,
            max_message_size: config.max_message_size,
        }
    }
}

fn check_size(len: usize, max: usize) -> Result<(), ProtocolError> {
    if len > max {
        return Err(ProtocolError::FrameTooLarge(len));
    }
    Ok(())
}

#[async_trait]
impl Connection for WebSocketConnection {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    async fn recv(&mut self) -> Result<Option<Frame>, TransportError> {
        loop {
            let decoded = match self.stream.next().await {
                Some(Ok(Message::Text(text))) => check_size(text.len(), self.max_message_size)
                    .and_then(|()| self.codec.decode_text(&text)),
                Some(Ok(Message::Binary(data))) => check_size(data.len(), self.max_message_size)
                    .and_then(|()| self.codec.decode_binary(&data)),
                Some(Ok(Message::Ping(data))) => {
                    if let Err(e) = self.stream.send(Message::Pong(data)).await {
                        warn!(connection = %self.id, "Failed to send pong: {}", e);
                    }
                    continue;
                }
                Some(Ok(Message::Pong(_))) | Some(Ok(Message::Frame(_))) => continue,
                Some(Ok(Message::Close(frame))) => {
                    debug!(connection = %self.id, ?frame, "Received close frame");
                    self.is_open = false;
                    return Ok(None);
                }
                Some(Err(WsError::ConnectionClosed)) => {
                    debug!(connection = %self.id, "Connection closed");
                    self.is_open = false;
                    return Ok(None);
                }
                Some(Err(e)) => {
                    error!(connection = %self.id, "WebSocket error: {}", e);
                    self.is_open = false;
                    return Err(TransportError::ReceiveFailed(e.to_string()));
                }
                None => {
                    debug!(connection = %self.id, "WebSocket stream ended");
                    self.is_open = false;
                    return Ok(None);
                }
            };

            // One malformed or oversized frame does not take the connection down.
            match decoded {
                Ok(frame) => return Ok(Some(frame)),
                Err(e) => warn!(connection = %self.id, error = %e, "Dropping undecodable frame"),
            }
        }
    }

    async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        if !self.is_open {
            return Err(TransportError::ConnectionClosed);
        }

        let message = match self.codec.encode(&frame)? {
            Encoded::Text(text) => Message::Text(text),
            Encoded::Binary(data) => Message::Binary(data.to_vec()),
        };

        self.stream
            .send(message)
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if !self.is_open {
            return Ok(()); // Already closed
        }
        self.is_open = false;

        self.stream
            .close(None)
            .await
            .map_err(|e| TransportError::Other(format!("Failed to close: {}", e)))
    }

    fn is_open(&self) -> bool {
        self.is_open
    }
}
