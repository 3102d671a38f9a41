//! Cooperative run control shared between the caller and every worker.
//!
//! [`RunControl`] is cheap to clone. Cancellation is one-way and sticky;
//! pause can be toggled any number of times. Workers observe both only at
//! checkpoints (before a job starts, between chunks), so a partial file is
//! never left half-written.

use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Handle for cancelling and pausing a run.
#[derive(Debug, Clone)]
pub struct RunControl {
    cancel: CancellationToken,
    paused: Arc<watch::Sender<bool>>,
}

impl Default for RunControl {
    fn default() -> Self {
        Self::new()
    }
}

impl RunControl {
    #[must_use]
    pub fn new() -> Self {
        let (paused, _) = watch::channel(false);
        Self {
            cancel: CancellationToken::new(),
            paused: Arc::new(paused),
        }
    }

    /// Requests cancellation. In-flight transfers stop at their next checkpoint.
    pub fn cancel(&self) {
        if !self.cancel.is_cancelled() {
            info!("cancellation requested");
        }
        self.cancel.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Token that resolves once cancellation is requested.
    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Holds workers before their next job until [`resume`](Self::resume).
    pub fn pause(&self) {
        if !self.paused.send_replace(true) {
            info!("run paused");
        }
    }

    pub fn resume(&self) {
        if self.paused.send_replace(false) {
            info!("run resumed");
        }
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        *self.paused.borrow()
    }

    /// Waits while the run is paused.
    ///
    /// Returns `false` if the run was cancelled, either before or during
    /// the wait; `true` when the caller may proceed.
    pub async fn wait_while_paused(&self) -> bool {
        if self.is_cancelled() {
            return false;
        }
        let mut paused = self.paused.subscribe();
        if !*paused.borrow_and_update() {
            return true;
        }

        debug!("worker waiting for resume");
        tokio::select! {
            () = self.cancel.cancelled() => false,
            resumed = paused.wait_for(|is_paused| !*is_paused) => resumed.is_ok() && !self.is_cancelled(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_not_paused_proceeds_immediately() {
        let control = RunControl::new();
        assert!(control.wait_while_paused().await);
    }

    #[tokio::test]
    async fn test_cancel_is_sticky_and_shared_by_clones() {
        let control = RunControl::new();
        let clone = control.clone();
        clone.cancel();
        assert!(control.is_cancelled());
        assert!(!control.wait_while_paused().await);
    }

    #[tokio::test]
    async fn test_pause_blocks_until_resume() {
        let control = RunControl::new();
        control.pause();
        assert!(control.is_paused());

        let waiter = {
            let control = control.clone();
            tokio::spawn(async move { control.wait_while_paused().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        control.resume();
        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn test_cancel_releases_paused_waiters() {
        let control = RunControl::new();
        control.pause();
        let waiter = {
            let control = control.clone();
            tokio::spawn(async move { control.wait_while_paused().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        control.cancel();
        assert!(!waiter.await.unwrap());
    }
}
