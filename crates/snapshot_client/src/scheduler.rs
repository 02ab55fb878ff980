//! Bounded-concurrency admission for fetch tasks.
//!
//! At most `limit` tasks hold an [`Admission`] at once. Waiters are admitted
//! in the order they started waiting (tokio's `Semaphore` is fair), and a
//! slot is returned when the admission is dropped, so a failing or
//! panicking task never holds a slot past its own lifetime.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use common::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

#[derive(Debug)]
pub struct FetchScheduler {
    permits: Arc<Semaphore>,
    limit: usize,
    in_flight: Arc<AtomicUsize>,
}

/// A held execution slot. Dropping it releases the slot.
#[derive(Debug)]
pub struct Admission {
    _permit: OwnedSemaphorePermit,
    in_flight: Arc<AtomicUsize>,
}

impl Admission {
    /// Release the slot explicitly.
    pub fn release(self) {}
}

impl Drop for Admission {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl FetchScheduler {
    /// A limit of zero is treated as one.
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            permits: Arc::new(Semaphore::new(limit)),
            limit,
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Tasks currently holding a slot.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Wait for a free slot.
    pub async fn admit(&self) -> Result<Admission, Error> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Error::Other("fetch scheduler is closed".into()))?;

        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        debug!("Fetch admitted ({}/{} in flight)", running, self.limit);

        Ok(Admission {
            _permit: permit,
            in_flight: Arc::clone(&self.in_flight),
        })
    }

    /// Admit, run `task` to completion, release.
    pub async fn run<F, T>(&self, task: F) -> Result<T, Error>
    where
        F: Future<Output = Result<T, Error>>,
    {
        let admission = self.admit().await?;
        let result = task.await;
        admission.release();
        result
    }
}

impl Default for FetchScheduler {
    fn default() -> Self {
        Self::new(4)
    }
}
