//! Gemini Live WebSocket transport.
//!
//! Opens the BidiGenerateContent socket, sends the setup message and waits for
//! `setupComplete`. After that a background task pumps the socket: outbound
//! [`ClientMessage`]s are serialized and sent, inbound frames and close events
//! are forwarded to the session loop.
//!
//! The transport never reconnects. A closed socket ends the session.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use url::Url;

use super::config::GEMINI_LIVE_URL;
use crate::core::live::base::{
    LiveConnection, LiveError, LiveResult, LiveTransport, TransportEvent, is_transient_close,
};
use crate::core::live::messages::{ClientMessage, SetupConfig};

/// Channel capacity for outbound messages.
const WS_CHANNEL_CAPACITY: usize = 256;

/// Close code reported when the socket vanished without a close frame.
const ABNORMAL_CLOSURE: u16 = 1006;

/// Close code reported for a close frame without a status.
const NO_STATUS_RECEIVED: u16 = 1005;

/// Gemini Live transport.
#[derive(Debug, Clone)]
pub struct GeminiLiveTransport {
    url: String,
}

impl Default for GeminiLiveTransport {
    fn default() -> Self {
        Self::new(GEMINI_LIVE_URL)
    }
}

impl GeminiLiveTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    /// Endpoint without credentials, for logs.
    pub fn url(&self) -> &str {
        &self.url
    }

    fn build_ws_url(&self, api_key: &str) -> LiveResult<Url> {
        let mut url = Url::parse(&self.url)
            .map_err(|e| LiveError::ConnectionFailed(format!("invalid endpoint: {e}")))?;
        url.query_pairs_mut().append_pair("key", api_key);
        Ok(url)
    }
}

/// UTF-8 payload of a data frame.
fn frame_text(message: &Message) -> Option<String> {
    match message {
        Message::Text(text) => Some(text.to_string()),
        Message::Binary(data) => match String::from_utf8(data.to_vec()) {
            Ok(text) => Some(text),
            Err(_) => {
                tracing::warn!(bytes = data.len(), "Ignoring non-UTF-8 binary frame");
                None
            }
        },
        _ => None,
    }
}

fn close_parts(frame: Option<CloseFrame>) -> (u16, String) {
    match frame {
        Some(frame) => (u16::from(frame.code), frame.reason.to_string()),
        None => (NO_STATUS_RECEIVED, String::new()),
    }
}

fn is_setup_complete(text: &str) -> bool {
    serde_json::from_str::<serde_json::Value>(text)
        .map(|value| value.get("setupComplete").is_some())
        .unwrap_or(false)
}

#[async_trait]
impl LiveTransport for GeminiLiveTransport {
    async fn connect(&self, api_key: &str, setup: SetupConfig) -> LiveResult<LiveConnection> {
        let url = self.build_ws_url(api_key)?;

        let (ws_stream, _response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| LiveError::ConnectionFailed(e.to_string()))?;

        tracing::info!(endpoint = %self.url, model = %setup.model, "Connected to Gemini Live API");

        let (mut ws_sink, mut ws_stream) = ws_stream.split();

        let setup_json = serde_json::to_string(&ClientMessage::Setup(setup))
            .map_err(|e| LiveError::SerializationError(e.to_string()))?;
        ws_sink
            .send(Message::Text(setup_json.into()))
            .await
            .map_err(|e| LiveError::WebSocketError(e.to_string()))?;

        // Frames that arrive before the confirmation are replayed afterwards
        let mut early_frames = Vec::new();
        loop {
            match ws_stream.next().await {
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = close_parts(frame);
                    return Err(LiveError::ProtocolClose {
                        code,
                        transient: is_transient_close(code),
                        reason,
                    });
                }
                Some(Ok(Message::Ping(data))) => {
                    if let Err(e) = ws_sink.send(Message::Pong(data)).await {
                        return Err(LiveError::WebSocketError(e.to_string()));
                    }
                }
                Some(Ok(message)) => {
                    if let Some(text) = frame_text(&message) {
                        if is_setup_complete(&text) {
                            break;
                        }
                        early_frames.push(text);
                    }
                }
                Some(Err(e)) => return Err(LiveError::WebSocketError(e.to_string())),
                None => {
                    return Err(LiveError::ConnectionFailed(
                        "socket closed before setup completed".to_string(),
                    ));
                }
            }
        }

        tracing::debug!("Session setup confirmed");

        let (out_tx, mut out_rx) = mpsc::channel::<ClientMessage>(WS_CHANNEL_CAPACITY);
        let (in_tx, in_rx) = mpsc::unbounded_channel::<TransportEvent>();
        for text in early_frames {
            let _ = in_tx.send(TransportEvent::Frame(text));
        }

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    // Handle outgoing messages
                    outgoing = out_rx.recv() => match outgoing {
                        Some(message) => {
                            let json = match serde_json::to_string(&message) {
                                Ok(j) => j,
                                Err(e) => {
                                    tracing::error!("Failed to serialize {}: {}", message.kind(), e);
                                    continue;
                                }
                            };
                            if let Err(e) = ws_sink.send(Message::Text(json.into())).await {
                                tracing::error!("Failed to send WebSocket message: {}", e);
                                let _ = in_tx.send(TransportEvent::Error(e.to_string()));
                                break;
                            }
                        }
                        None => {
                            let frame = CloseFrame {
                                code: CloseCode::Normal,
                                reason: "client disconnect".into(),
                            };
                            if let Err(e) = ws_sink.send(Message::Close(Some(frame))).await {
                                tracing::debug!("Close frame not sent: {}", e);
                            }
                            break;
                        }
                    },

                    // Handle incoming messages
                    incoming = ws_stream.next() => match incoming {
                        Some(Ok(Message::Close(frame))) => {
                            let (code, reason) = close_parts(frame);
                            tracing::info!(code, reason = %reason, "WebSocket closed by server");
                            let _ = in_tx.send(TransportEvent::Closed { code, reason });
                            break;
                        }
                        Some(Ok(Message::Ping(data))) => {
                            if let Err(e) = ws_sink.send(Message::Pong(data)).await {
                                tracing::error!("Failed to send pong: {}", e);
                            }
                        }
                        Some(Ok(message)) => {
                            if let Some(text) = frame_text(&message)
                                && in_tx.send(TransportEvent::Frame(text)).is_err()
                            {
                                break;
                            }
                        }
                        Some(Err(e)) => {
                            tracing::error!("WebSocket error: {}", e);
                            let _ = in_tx.send(TransportEvent::Error(e.to_string()));
                            break;
                        }
                        None => {
                            let _ = in_tx.send(TransportEvent::Closed {
                                code: ABNORMAL_CLOSURE,
                                reason: "connection dropped".to_string(),
                            });
                            break;
                        }
                    },
                }
            }
            tracing::debug!("Gemini Live connection task finished");
        });

        Ok(LiveConnection {
            outbound: out_tx,
            inbound: in_rx,
            task: Some(task),
        })
    }
}
