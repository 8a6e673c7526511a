//! Mock providers for session tests
//!
//! - `live_mock`: in-memory live transport with a scriptable remote end
//! - `home_mock`: control plane that counts calls and can be gated or failed
//! - `devices`: scripted microphone and a manually clocked speaker
//! - `websocket_mock`: Gemini Live style WebSocket server on localhost

// Allow dead code in test infrastructure - not every test binary uses every helper
#![allow(dead_code)]

pub mod devices;
pub mod home_mock;
pub mod live_mock;
pub mod websocket_mock;

use std::time::Duration;

use tokio::sync::mpsc;
use waav_live::SessionEvent;

/// Upper bound for anything a test waits on.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Wait for the first event matching `pred`, skipping others.
pub async fn wait_for_event<F>(
    events: &mut mpsc::UnboundedReceiver<SessionEvent>,
    mut pred: F,
) -> SessionEvent
where
    F: FnMut(&SessionEvent) -> bool,
{
    let found = tokio::time::timeout(TEST_TIMEOUT, async {
        while let Some(event) = events.recv().await {
            if pred(&event) {
                return Some(event);
            }
        }
        None
    })
    .await;
    match found {
        Ok(Some(event)) => event,
        Ok(None) => panic!("event stream closed before the expected event"),
        Err(_) => panic!("timed out waiting for event"),
    }
}

/// Poll `cond` until it holds or the test timeout expires.
pub async fn eventually<F>(mut cond: F)
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + TEST_TIMEOUT;
    while !cond() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
