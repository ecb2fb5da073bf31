//! Cancellable one-shot timer for use inside a `select!` loop.
//!
//! A disarmed timer never fires. Awaiting `fired` is cancel-safe: if the
//! `select!` picks another branch, the deadline stays armed.

use std::pin::Pin;
use std::time::Duration;

use tokio::time::Sleep;

#[derive(Debug, Default)]
pub struct Timer {
    sleep: Option<Pin<Box<Sleep>>>,
}

impl Timer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm (or re-arm) the timer to fire once after `after`.
    pub fn arm(&mut self, after: Duration) {
        self.sleep = Some(Box::pin(tokio::time::sleep(after)));
    }

    /// Disarm. Returns `true` if a deadline was pending.
    pub fn cancel(&mut self) -> bool {
        self.sleep.take().is_some()
    }

    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.sleep.is_some()
    }

    /// Resolves when the armed deadline passes, then disarms.
    /// Pends forever while disarmed.
    pub async fn fired(&mut self) {
        match self.sleep.as_mut() {
            Some(sleep) => {
                sleep.as_mut().await;
                self.sleep = None;
            }
            None => std::future::pending::<()>().await,
        }
    }
}

#[cfg(test)]
#[path = "timer_test.rs"]
mod tests;
