//! WebSocket Mock Server for the Gemini Live protocol
//!
//! Accepts one connection, records the setup message and every later client
//! frame, then plays whatever the test scripts.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

use super::{TEST_TIMEOUT, eventually};

/// How the server answers the setup message.
#[derive(Debug, Clone)]
pub enum Handshake {
    /// Reply with `setupComplete`
    Confirm,
    /// Send these frames first, then `setupComplete`
    FramesThenConfirm(Vec<Value>),
    /// Close the socket instead of confirming
    Reject { code: u16, reason: String },
}

/// Scripted server behavior after the handshake.
#[derive(Debug, Clone)]
pub enum ServerAction {
    Send(Value),
    Close { code: u16, reason: String },
}

/// What the server observed.
#[derive(Debug, Default)]
pub struct Observed {
    pub request_uri: Option<String>,
    pub setup: Option<Value>,
    pub frames: Vec<Value>,
    pub client_close: Option<u16>,
}

pub struct GeminiMockServer {
    pub url: String,
    pub observed: Arc<Mutex<Observed>>,
    actions: mpsc::UnboundedSender<ServerAction>,
}

impl GeminiMockServer {
    pub fn send(&self, frame: Value) {
        let _ = self.actions.send(ServerAction::Send(frame));
    }

    pub fn close(&self, code: u16, reason: &str) {
        let _ = self.actions.send(ServerAction::Close {
            code,
            reason: reason.to_string(),
        });
    }

    /// Wait for a client frame matching `pred` and return it.
    pub async fn wait_for_frame<F>(&self, pred: F) -> Value
    where
        F: Fn(&Value) -> bool,
    {
        let observed = self.observed.clone();
        eventually(|| observed.lock().frames.iter().any(&pred)).await;
        let observed = self.observed.lock();
        observed
            .frames
            .iter()
            .find(|f| pred(f))
            .cloned()
            .expect("frame present")
    }

    /// Wait until the client sent a close frame.
    pub async fn wait_for_client_close(&self) -> u16 {
        let observed = self.observed.clone();
        eventually(|| observed.lock().client_close.is_some()).await;
        self.observed.lock().client_close.unwrap_or_default()
    }
}

/// Start a mock server on localhost for a single connection.
pub async fn spawn_gemini_mock(handshake: Handshake) -> GeminiMockServer {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock server");
    let addr = listener.local_addr().expect("local addr");
    let observed = Arc::new(Mutex::new(Observed::default()));
    let (actions_tx, mut actions_rx) = mpsc::unbounded_channel::<ServerAction>();

    let state = observed.clone();
    tokio::spawn(async move {
        let Ok((stream, _)) = listener.accept().await else {
            return;
        };
        let uri_state = state.clone();
        let record_uri = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
            uri_state.lock().request_uri = Some(req.uri().to_string());
            Ok(resp)
        };
        let ws = accept_hdr_async(stream, record_uri).await;
        let Ok(ws) = ws else {
            return;
        };
        let (mut write, mut read) = ws.split();

        // Setup message
        let setup = match tokio::time::timeout(TEST_TIMEOUT, read.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => serde_json::from_str::<Value>(&text).ok(),
            _ => return,
        };
        state.lock().setup = setup;

        match handshake {
            Handshake::Confirm => {
                let _ = write
                    .send(Message::Text(json!({ "setupComplete": {} }).to_string().into()))
                    .await;
            }
            Handshake::FramesThenConfirm(frames) => {
                for frame in frames {
                    let _ = write.send(Message::Text(frame.to_string().into())).await;
                }
                let _ = write
                    .send(Message::Text(json!({ "setupComplete": {} }).to_string().into()))
                    .await;
            }
            Handshake::Reject { code, reason } => {
                let _ = write
                    .send(Message::Close(Some(CloseFrame {
                        code: CloseCode::from(code),
                        reason: reason.into(),
                    })))
                    .await;
                return;
            }
        }

        loop {
            tokio::select! {
                action = actions_rx.recv() => match action {
                    Some(ServerAction::Send(frame)) => {
                        if write.send(Message::Text(frame.to_string().into())).await.is_err() {
                            break;
                        }
                    }
                    Some(ServerAction::Close { code, reason }) => {
                        let _ = write
                            .send(Message::Close(Some(CloseFrame {
                                code: CloseCode::from(code),
                                reason: reason.into(),
                            })))
                            .await;
                        // Drain until the client acknowledges
                        while let Some(Ok(_)) = read.next().await {}
                        break;
                    }
                    None => break,
                },
                incoming = read.next() => match incoming {
                    Some(Ok(Message::Text(text))) => {
                        if let Ok(value) = serde_json::from_str::<Value>(&text) {
                            state.lock().frames.push(value);
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        state.lock().client_close =
                            Some(frame.map(|f| u16::from(f.code)).unwrap_or(1005));
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(_)) | None => break,
                },
            }
        }
    });

    GeminiMockServer {
        url: format!("ws://{addr}/ws/live"),
        observed,
        actions: actions_tx,
    }
}
