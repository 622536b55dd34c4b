//! Per-connection liveness timer.

use std::future;
use std::pin::Pin;
use std::time::Duration;

use tokio::time::{sleep_until, Instant, Sleep};

/// A countdown that fires at most once per [`arm`](LivenessTimer::arm).
///
/// Polled from the connection's `select!` loop; `expired` is cancel-safe.
#[derive(Debug)]
pub struct LivenessTimer {
    sleep: Pin<Box<Sleep>>,
    armed: bool,
}

impl LivenessTimer {
    pub fn new() -> Self {
        Self {
            sleep: Box::pin(sleep_until(Instant::now())),
            armed: false,
        }
    }

    /// Start the countdown, replacing any pending deadline.
    pub fn arm(&mut self, duration: Duration) {
        self.sleep.as_mut().reset(Instant::now() + duration);
        self.armed = true;
    }

    /// Stop the countdown without firing.
    pub fn cancel(&mut self) {
        self.armed = false;
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Resolves when the armed deadline passes. Never resolves while disarmed.
    pub async fn expired(&mut self) {
        if !self.armed {
            future::pending::<()>().await;
        }
        self.sleep.as_mut().await;
        self.armed = false;
    }
}

impl Default for LivenessTimer {
    fn default() -> Self {
        Self::new()
    }
}
