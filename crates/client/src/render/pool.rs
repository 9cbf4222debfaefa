//! Bounded pool of browser sessions.
//!
//! At most `size` sessions exist at once. A checkout waits for a free slot up
//! to the checkout deadline, then fails with [`RenderError::PoolExhausted`].
//! Dropping the [`Checkout`] releases the session and frees its slot, on
//! every exit path (success, error, timeout, cancellation).

use super::{Browser, RenderError, Session};
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

pub struct SessionPool<B: Browser> {
    browser: Arc<B>,
    slots: Arc<Semaphore>,
    size: usize,
    checkout_timeout: Duration,
}

impl<B: Browser> SessionPool<B> {
    /// Pool over `browser` with `size` slots (at least one).
    pub fn new(browser: B, size: usize, checkout_timeout: Duration) -> Self {
        let size = size.max(1);
        Self { browser: Arc::new(browser), slots: Arc::new(Semaphore::new(size)), size, checkout_timeout }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Free slots right now.
    pub fn available(&self) -> usize {
        self.slots.available_permits()
    }

    pub fn browser(&self) -> &B {
        &self.browser
    }

    /// Wait for a slot and open a session in it.
    pub async fn checkout(&self) -> Result<Checkout<B::Session>, RenderError> {
        let acquire = Arc::clone(&self.slots).acquire_owned();
        let permit = match tokio::time::timeout(self.checkout_timeout, acquire).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(RenderError::BrowserClosed),
            Err(_) => {
                let waited_ms = self.checkout_timeout.as_millis() as u64;
                tracing::warn!(size = self.size, waited_ms, "session pool exhausted");
                return Err(RenderError::PoolExhausted(waited_ms));
            }
        };

        // The permit drops with this frame if opening fails.
        let session = self.browser.open().await?;
        Ok(Checkout { session, _permit: permit })
    }

    /// Refuse further checkouts. Sessions already out finish normally.
    pub fn close(&self) {
        self.slots.close();
    }
}

/// A session on loan from a [`SessionPool`].
pub struct Checkout<S: Session> {
    session: S,
    _permit: OwnedSemaphorePermit,
}

impl<S: Session> Deref for Checkout<S> {
    type Target = S;

    fn deref(&self) -> &S {
        &self.session
    }
}

impl<S: Session> DerefMut for Checkout<S> {
    fn deref_mut(&mut self) -> &mut S {
        &mut self.session
    }
}

impl<S: Session> Drop for Checkout<S> {
    fn drop(&mut self) {
        // Runs before the permit field drops, so the slot frees after release.
        self.session.release();
    }
}
