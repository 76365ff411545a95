// ⏱️ Rate limiter - minimum spacing between outbound remote calls
// One per component that talks to the remote side; callers are sequential.

use std::time::Duration;
use tokio::time::{sleep, Instant};

use crate::cancel::CancelSignal;
use crate::error::Result;

#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    last_call: Option<Instant>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        RateLimiter {
            min_interval,
            last_call: None,
        }
    }

    pub fn from_secs_f64(secs: f64) -> Self {
        Self::new(Duration::from_secs_f64(secs.max(0.0)))
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// How long the next `wait` would sleep right now.
    pub fn pending_delay(&self) -> Duration {
        match self.last_call {
            None => Duration::ZERO,
            Some(last) => self.min_interval.saturating_sub(last.elapsed()),
        }
    }

    /// Suspend until `min_interval` has passed since the previous call returned.
    pub async fn wait(&mut self) {
        let delay = self.pending_delay();
        if !delay.is_zero() {
            sleep(delay).await;
        }
        self.last_call = Some(Instant::now());
    }

    /// Like [`wait`](Self::wait), but gives up with `Cancelled` if `cancel` fires.
    ///
    /// The last-call stamp is only updated when the wait completes.
    pub async fn wait_or_cancel(&mut self, cancel: &mut CancelSignal) -> Result<()> {
        let delay = self.pending_delay();
        if !delay.is_zero() {
            cancel.sleep(delay).await?;
        } else if cancel.is_cancelled() {
            return Err(crate::error::SweepError::Cancelled);
        }
        self.last_call = Some(Instant::now());
        Ok(())
    }
}
