//! Single-shot inactivity timer.
//!
//! The session loop polls [`IdleSupervisor::expired`] next to its other event
//! sources and tears the session down when it resolves. There is at most one
//! pending deadline: arming again replaces it.

use std::future::pending;
use std::pin::Pin;
use std::time::Duration;
use tokio::time::{Instant, Sleep, sleep};

#[derive(Debug)]
pub struct IdleSupervisor {
    timeout: Duration,
    deadline: Option<Pin<Box<Sleep>>>,
}

impl IdleSupervisor {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            deadline: None,
        }
    }

    /// Configured timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Arm the timer, cancelling any pending deadline first.
    pub fn start(&mut self) {
        match self.deadline.as_mut() {
            Some(sleep) => sleep.as_mut().reset(Instant::now() + self.timeout),
            None => self.deadline = Some(Box::pin(sleep(self.timeout))),
        }
        tracing::trace!(timeout_ms = self.timeout.as_millis() as u64, "Idle timer armed");
    }

    /// Cancel the pending deadline, if any.
    pub fn clear(&mut self) {
        if self.deadline.take().is_some() {
            tracing::trace!("Idle timer cleared");
        }
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// Resolves once when the armed deadline passes, then disarms.
    ///
    /// Never resolves while disarmed. Cancel safe.
    pub async fn expired(&mut self) {
        match self.deadline.as_mut() {
            Some(deadline) => {
                deadline.as_mut().await;
                self.deadline = None;
                tracing::debug!("Idle timer fired");
            }
            None => pending::<()>().await,
        }
    }
}
