//! Cooperative cancellation for in-flight statements.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared flag telling a running operation its caller has gone away.
///
/// Cloning shares the flag. The database installs it as a SQLite progress
/// handler for the duration of a statement, so setting it aborts the
/// statement at its next progress check.
#[derive(Clone, Debug, Default)]
pub struct Cancellation(Arc<AtomicBool>);

impl Cancellation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Guard that cancels this flag when dropped, unless disarmed first.
    pub fn drop_guard(&self) -> CancelOnDrop {
        CancelOnDrop {
            token: Some(self.clone()),
        }
    }
}

/// Cancels its [`Cancellation`] on drop.
///
/// Held across an `.await`; if the enclosing future is dropped the guard goes
/// with it and the operation is told to stop.
#[derive(Debug)]
pub struct CancelOnDrop {
    token: Option<Cancellation>,
}

impl CancelOnDrop {
    /// Consume the guard without cancelling.
    pub fn disarm(mut self) {
        self.token = None;
    }
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            token.cancel();
        }
    }
}
