// SPDX-License-Identifier: Apache-2.0

//! Commit throttling on top of the checkpoint tracker.
//!
//! The commit manager decides *when* the tracker's highest resolved position
//! should be flushed upstream: at most once per commit interval. The interval
//! gate is a single atomic read-modify-write, so of any number of resolvers
//! racing at an interval boundary exactly one observes `should_commit`.

use crate::checkpoint::{Capped, Resolver};
use crate::error::Error;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Rate-limits how often the tracker's highest resolved payload is committed.
pub struct CommitManager<T> {
    capped: Arc<Capped<T>>,
    interval_ms: u64,
    epoch: Instant,
    // Milliseconds since `epoch` of the last granted commit; zero means none
    // has been granted yet, so the first resolution is always due.
    last_commit_ms: AtomicU64,
}

impl<T: Clone + Send + 'static> CommitManager<T> {
    /// Creates a manager over a capped tracker of `capacity` entries that
    /// grants a commit at most once per `commit_interval`.
    pub fn new(capacity: i64, commit_interval: Duration) -> Arc<Self> {
        Arc::new(CommitManager {
            capped: Capped::new(capacity),
            interval_ms: commit_interval.as_millis() as u64,
            epoch: Instant::now(),
            last_commit_ms: AtomicU64::new(0),
        })
    }

    /// Tracks `payload` as one pending entry, waiting for tracker capacity.
    ///
    /// Once the payload has been emitted downstream the caller must invoke the
    /// returned resolver, which reports whether a commit is now due.
    pub async fn track(
        self: &Arc<Self>,
        cancel: &CancellationToken,
        payload: T,
    ) -> Result<CommitResolver<T>, Error> {
        let inner = self.capped.track(cancel, payload, 1).await?;
        Ok(CommitResolver {
            inner,
            manager: Arc::clone(self),
        })
    }

    /// Number of entries tracked but not yet contiguously resolved.
    #[must_use]
    pub fn pending(&self) -> i64 {
        self.capped.pending()
    }

    fn commit_due(&self) -> bool {
        let now = (self.epoch.elapsed().as_millis() as u64).max(1);
        self.last_commit_ms
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
                (last == 0 || now.saturating_sub(last) >= self.interval_ms).then_some(now)
            })
            .is_ok()
    }
}

/// Single-use handle resolving one tracked entry and reporting commit timing.
pub struct CommitResolver<T> {
    inner: Resolver<T>,
    manager: Arc<CommitManager<T>>,
}

impl<T: Clone + Send + 'static> CommitResolver<T> {
    /// Resolves the entry.
    ///
    /// Returns the payload of the highest contiguously resolved position and
    /// whether the caller should flush it upstream now.
    pub fn resolve(self) -> (Option<T>, bool) {
        let highest = self.inner.resolve();
        let due = self.manager.commit_due();
        (highest, due)
    }
}
