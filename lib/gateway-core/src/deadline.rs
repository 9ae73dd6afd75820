//! Per-request deadlines passed through resolution and forwarding

use crate::{GatewayError, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Absolute point in time by which an operation must complete
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Deadline(Instant);

impl Deadline {
    /// Deadline `timeout` from now
    pub fn after(timeout: Duration) -> Self {
        Self(Instant::now() + timeout)
    }

    pub fn at(instant: Instant) -> Self {
        Self(instant)
    }

    pub fn instant(&self) -> Instant {
        self.0
    }

    /// Time left before the deadline, zero once it has passed
    pub fn remaining(&self) -> Duration {
        self.0.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.0
    }

    /// The earlier of two deadlines
    pub fn min(self, other: Deadline) -> Deadline {
        std::cmp::min(self, other)
    }

    /// Run `fut` until the deadline, mapping expiry through `on_timeout`.
    ///
    /// The future is dropped on expiry, releasing whatever it holds.
    pub async fn run<F, T>(&self, fut: F, on_timeout: impl FnOnce() -> GatewayError) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout_at(self.0, fut).await {
            Ok(result) => result,
            Err(_) => Err(on_timeout()),
        }
    }
}
