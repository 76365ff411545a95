// ⏹️ Cooperative cancellation
// A watch-channel shutdown flag raced against every suspension point.

use std::future::Future;
use tokio::sync::watch;

use crate::error::{Result, SweepError};

/// Receiving side of a shutdown flag.
///
/// Cloning is cheap; every clone observes the same flag.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

/// Sending side; dropping it without cancelling leaves the signal quiet forever.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        // No receivers means nobody is listening; nothing to do.
        let _ = self.tx.send(true);
    }

    /// Raw sender, for collaborators that trigger cancellation themselves.
    pub fn sender(&self) -> watch::Sender<bool> {
        self.tx.clone()
    }
}

impl CancelSignal {
    pub fn new() -> (CancelHandle, CancelSignal) {
        let (tx, rx) = watch::channel(false);
        (CancelHandle { tx }, CancelSignal { rx })
    }

    /// A signal that never fires.
    pub fn never() -> CancelSignal {
        let (_tx, rx) = watch::channel(false);
        CancelSignal { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the flag is set.
    pub async fn cancelled(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                // Sender dropped without cancelling: never fires.
                std::future::pending::<()>().await;
            }
        }
    }

    /// Run `fut` unless cancellation wins the race.
    pub async fn guard<F: Future>(&mut self, fut: F) -> Result<F::Output> {
        if self.is_cancelled() {
            return Err(SweepError::Cancelled);
        }
        tokio::select! {
            biased;
            () = self.cancelled() => Err(SweepError::Cancelled),
            out = fut => Ok(out),
        }
    }

    /// Sleep for `duration`, returning early with `Cancelled` if interrupted.
    pub async fn sleep(&mut self, duration: std::time::Duration) -> Result<()> {
        self.guard(tokio::time::sleep(duration)).await
    }
}

/// Cancel `handle` when the process receives Ctrl-C.
pub fn cancel_on_ctrl_c(handle: CancelHandle) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, stopping after current call");
            handle.cancel();
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_guard_passes_through_when_quiet() {
        let mut signal = CancelSignal::never();
        let out = signal.guard(async { 41 + 1 }).await.unwrap();
        assert_eq!(out, 42);
    }

    #[tokio::test]
    async fn test_guard_short_circuits_after_cancel() {
        let (handle, mut signal) = CancelSignal::new();
        handle.cancel();
        assert!(signal.is_cancelled());
        let res = signal.guard(async { 1 }).await;
        assert!(matches!(res, Err(SweepError::Cancelled)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_sleep() {
        let (handle, mut signal) = CancelSignal::new();
        let waiter = tokio::spawn(async move { signal.sleep(Duration::from_secs(3600)).await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        handle.cancel();
        let res = waiter.await.unwrap();
        assert!(matches!(res, Err(SweepError::Cancelled)));
    }
}
