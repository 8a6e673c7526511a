//! In-memory live transport
//!
//! Every successful `connect` hands a [`MockRemote`] to the test, which plays
//! the server: it reads what the client sent and pushes frames back.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;

use waav_live::core::live::messages::{ClientMessage, FunctionResponse, SetupConfig};
use waav_live::core::live::{LiveConnection, LiveError, LiveResult, LiveTransport, TransportEvent};

use super::TEST_TIMEOUT;

/// Server side of one mock connection.
pub struct MockRemote {
    pub api_key: String,
    pub setup: SetupConfig,
    pub outbound: mpsc::Receiver<ClientMessage>,
    pub inbound: mpsc::UnboundedSender<TransportEvent>,
}

impl MockRemote {
    /// Push one JSON frame to the client.
    pub fn send_frame(&self, frame: Value) {
        let _ = self.inbound.send(TransportEvent::Frame(frame.to_string()));
    }

    /// Push raw text, which need not be JSON.
    pub fn send_text(&self, text: &str) {
        let _ = self.inbound.send(TransportEvent::Frame(text.to_string()));
    }

    /// Close the channel from the server side.
    pub fn close(&self, code: u16, reason: &str) {
        let _ = self.inbound.send(TransportEvent::Closed {
            code,
            reason: reason.to_string(),
        });
    }

    /// Report a stream failure.
    pub fn fail(&self, error: &str) {
        let _ = self.inbound.send(TransportEvent::Error(error.to_string()));
    }

    /// Next message from the client, or `None` once the client closed.
    pub async fn next_message(&mut self) -> Option<ClientMessage> {
        tokio::time::timeout(TEST_TIMEOUT, self.outbound.recv())
            .await
            .expect("timed out waiting for a client message")
    }

    /// Next tool response, skipping microphone audio.
    pub async fn next_tool_response(&mut self) -> FunctionResponse {
        loop {
            match self.next_message().await {
                Some(ClientMessage::ToolResponse(mut response)) => {
                    assert_eq!(response.function_responses.len(), 1);
                    return response.function_responses.remove(0);
                }
                Some(_) => continue,
                None => panic!("client closed before sending a tool response"),
            }
        }
    }

    /// Wait until the client drops its side of the channel.
    pub async fn wait_closed(&mut self) {
        tokio::time::timeout(TEST_TIMEOUT, async {
            while self.outbound.recv().await.is_some() {}
        })
        .await
        .expect("client never closed the channel");
    }
}

/// Live transport double.
pub struct MockTransport {
    remotes: mpsc::UnboundedSender<MockRemote>,
    next_error: Mutex<Option<LiveError>>,
    hang: AtomicBool,
    connects: AtomicUsize,
}

impl MockTransport {
    /// The receiver yields one [`MockRemote`] per successful connect.
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<MockRemote>) {
        let (remotes, rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            remotes,
            next_error: Mutex::new(None),
            hang: AtomicBool::new(false),
            connects: AtomicUsize::new(0),
        });
        (transport, rx)
    }

    /// Fail the next connect with `error`.
    pub fn fail_next(&self, error: LiveError) {
        *self.next_error.lock() = Some(error);
    }

    /// Never confirm setup.
    pub fn hang(&self) {
        self.hang.store(true, Ordering::SeqCst);
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LiveTransport for MockTransport {
    async fn connect(&self, api_key: &str, setup: SetupConfig) -> LiveResult<LiveConnection> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.next_error.lock().take() {
            return Err(error);
        }
        if self.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }

        let (out_tx, out_rx) = mpsc::channel(256);
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let _ = self.remotes.send(MockRemote {
            api_key: api_key.to_string(),
            setup,
            outbound: out_rx,
            inbound: in_tx,
        });

        Ok(LiveConnection {
            outbound: out_tx,
            inbound: in_rx,
            task: None,
        })
    }
}

/// Wait for the next connection made through a [`MockTransport`].
pub async fn accept(remotes: &mut mpsc::UnboundedReceiver<MockRemote>) -> MockRemote {
    tokio::time::timeout(TEST_TIMEOUT, remotes.recv())
        .await
        .expect("timed out waiting for a connection")
        .expect("transport dropped")
}
