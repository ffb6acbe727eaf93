//! Striped per-key locking.
//!
//! A fixed pool of fair mutexes is shared by all reduction and clear keys.
//! Every key maps to one stripe by hash; an event locks the stripes of all of
//! its keys in ascending stripe order, so two events with overlapping key sets
//! always contend in the same order and cannot deadlock.

use crate::metrics::LOCK_WAIT_SECONDS;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{trace, warn};

/// Pool of lock stripes shared by all correlation keys
pub struct KeyLockCoordinator {
    /// tokio's mutex queues waiters in FIFO order
    stripes: Vec<Arc<Mutex<()>>>,
    /// Log a warning when a single stripe takes longer than this
    wait_warning: Option<Duration>,
}

impl KeyLockCoordinator {
    /// Create a coordinator with `stripe_count` stripes (at least one)
    pub fn new(stripe_count: usize) -> Self {
        let stripes = (0..stripe_count.max(1))
            .map(|_| Arc::new(Mutex::new(())))
            .collect();

        Self {
            stripes,
            wait_warning: None,
        }
    }

    /// Warn about acquisitions that wait longer than `threshold`.
    ///
    /// The waiter keeps its place in the queue; acquisition never times out.
    pub fn with_wait_warning(mut self, threshold: Duration) -> Self {
        self.wait_warning = Some(threshold).filter(|t| !t.is_zero());
        self
    }

    pub fn stripe_count(&self) -> usize {
        self.stripes.len()
    }

    /// Stripe index for a single key
    pub fn stripe_for(&self, key: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % self.stripes.len() as u64) as usize
    }

    /// Canonical acquisition order for a key set: sorted, without duplicates
    pub fn stripes_for<S: AsRef<str>>(&self, keys: &[S]) -> Vec<usize> {
        let mut stripes: Vec<usize> = keys.iter().map(|k| self.stripe_for(k.as_ref())).collect();
        stripes.sort_unstable();
        stripes.dedup();
        stripes
    }

    /// Lock every stripe covering `keys`, blocking until all are held.
    ///
    /// The returned guard releases all stripes when dropped.
    pub async fn acquire<S: AsRef<str>>(&self, keys: &[S]) -> KeyLockGuard {
        let stripes = self.stripes_for(keys);
        let started = Instant::now();
        let mut guards = Vec::with_capacity(stripes.len());

        for &index in &stripes {
            guards.push(self.lock_stripe(index).await);
        }

        LOCK_WAIT_SECONDS.observe(started.elapsed().as_secs_f64());
        trace!(stripes = ?stripes, "Acquired key locks");

        KeyLockGuard {
            stripes,
            _guards: guards,
        }
    }

    async fn lock_stripe(&self, index: usize) -> OwnedMutexGuard<()> {
        let stripe = self.stripes[index].clone();

        let Some(threshold) = self.wait_warning else {
            return stripe.lock_owned().await;
        };

        let mut pending = Box::pin(stripe.lock_owned());
        match tokio::time::timeout(threshold, &mut pending).await {
            Ok(guard) => guard,
            Err(_) => {
                warn!(
                    stripe = index,
                    waited_ms = threshold.as_millis() as u64,
                    "Still waiting for key lock stripe"
                );
                pending.await
            }
        }
    }
}

/// Scoped hold on a set of lock stripes
#[must_use = "the key locks are released as soon as the guard is dropped"]
pub struct KeyLockGuard {
    stripes: Vec<usize>,
    _guards: Vec<OwnedMutexGuard<()>>,
}

impl KeyLockGuard {
    /// Stripes held, in acquisition order
    pub fn stripes(&self) -> &[usize] {
        &self.stripes
    }

    /// Release all stripes now
    pub fn release(self) {
        trace!(stripes = ?self.stripes, "Releasing key locks");
    }
}
