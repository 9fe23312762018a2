//! Process-wide shutdown signalling
//!
//! A cloneable handle shared by every component that can sleep. Requesting
//! shutdown is idempotent; any `sleep` in progress wakes immediately instead
//! of running out its full duration.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

#[derive(Clone, Default)]
pub struct Shutdown {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    requested: AtomicBool,
    notify: Notify,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown. Safe to call from any thread, any number of times.
    pub fn request(&self) {
        if !self.inner.requested.swap(true, Ordering::SeqCst) {
            self.inner.notify.notify_waiters();
        }
    }

    pub fn is_requested(&self) -> bool {
        self.inner.requested.load(Ordering::SeqCst)
    }

    /// Sleep for `duration`, waking early on a shutdown request.
    ///
    /// Returns `true` if the sleep ran to completion, `false` if it was
    /// interrupted (or shutdown had already been requested).
    pub async fn sleep(&self, duration: Duration) -> bool {
        let notified = self.inner.notify.notified();
        tokio::pin!(notified);

        // Check after registering the waiter so a request() racing with
        // this call cannot be missed.
        if self.is_requested() {
            return false;
        }

        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = &mut notified => false,
        }
    }
}
