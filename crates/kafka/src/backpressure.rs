// SPDX-License-Identifier: Apache-2.0

//! Token-bucket back-pressure controller.
//!
//! One token is one in-flight record budget, end to end: the source reserves a
//! token before reading a record and the token returns to the bucket when the
//! record's acknowledgement comes back (or when the record is dropped at retry
//! exhaustion). A background task refills the bucket at a fixed cadence so a
//! burst of releases cannot be starved by a burst of acquisitions.

use crate::error::Error;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

struct State {
    tokens: i64,
    closed: bool,
}

/// A token bucket limiting the number of records in flight.
///
/// The bucket starts full. `release` and the periodic refill are both capped
/// at the configured capacity; the bucket never exceeds it. Fairness among
/// waiters is not guaranteed.
pub struct Controller {
    capacity: i64,
    state: Mutex<State>,
    notify: Notify,
}

impl Controller {
    /// Creates a controller with `capacity` tokens, refilling `refill` tokens
    /// every `check_interval`.
    ///
    /// Must be called from within a tokio runtime; the refill task stops when
    /// the controller is closed or dropped.
    pub fn new(capacity: i64, refill: i64, check_interval: Duration) -> Arc<Self> {
        let controller = Arc::new(Controller {
            capacity,
            state: Mutex::new(State {
                tokens: capacity,
                closed: false,
            }),
            notify: Notify::new(),
        });

        let weak = Arc::downgrade(&controller);
        drop(tokio::spawn(async move {
            // First refill lands one full interval in, not immediately.
            let start = tokio::time::Instant::now() + check_interval;
            let mut tick = tokio::time::interval_at(start, check_interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                let _ = tick.tick().await;
                let Some(controller) = weak.upgrade() else {
                    break;
                };
                {
                    let mut state = controller.state.lock();
                    if state.closed {
                        break;
                    }
                    state.tokens = (state.tokens + refill).min(controller.capacity);
                }
                controller.notify.notify_waiters();
            }
        }));

        controller
    }

    /// Takes one token, waiting until one is available.
    ///
    /// Returns [`Error::Cancelled`] if `cancel` fires first and
    /// [`Error::ControllerClosed`] once the controller is closed.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<(), Error> {
        loop {
            // Register for a wakeup before inspecting the state, otherwise a
            // release between the check and the await is lost.
            let notified = self.notify.notified();
            {
                let mut state = self.state.lock();
                if state.closed {
                    return Err(Error::ControllerClosed);
                }
                if state.tokens > 0 {
                    state.tokens -= 1;
                    return Ok(());
                }
            }
            tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = notified => {}
            }
        }
    }

    /// Takes `n` tokens without waiting; returns whether they were taken.
    pub fn try_acquire(&self, n: i64) -> bool {
        let mut state = self.state.lock();
        if state.closed || state.tokens < n {
            return false;
        }
        state.tokens -= n;
        true
    }

    /// Returns `n` tokens to the bucket, capped at capacity.
    pub fn release(&self, n: i64) {
        {
            let mut state = self.state.lock();
            state.tokens = (state.tokens + n).min(self.capacity);
        }
        self.notify.notify_waiters();
    }

    /// Closes the controller, stopping the refill task and waking all waiters.
    pub fn close(&self) {
        {
            let mut state = self.state.lock();
            state.closed = true;
        }
        self.notify.notify_waiters();
    }

    #[cfg(test)]
    fn available(&self) -> i64 {
        self.state.lock().tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn release_never_exceeds_capacity() {
        let controller = Controller::new(4, 1, Duration::from_secs(3600));
        assert!(controller.try_acquire(2));
        controller.release(10);
        assert_eq!(controller.available(), 4);
    }

    #[tokio::test]
    async fn try_acquire_is_all_or_nothing() {
        let controller = Controller::new(3, 1, Duration::from_secs(3600));
        assert!(controller.try_acquire(3));
        assert!(!controller.try_acquire(1));
        controller.release(1);
        assert!(controller.try_acquire(1));
    }

    #[tokio::test]
    async fn acquire_blocks_until_release() {
        let controller = Controller::new(1, 1, Duration::from_secs(3600));
        assert!(controller.try_acquire(1));

        let cancel = CancellationToken::new();
        let waiter = {
            let controller = Arc::clone(&controller);
            let cancel = cancel.clone();
            tokio::spawn(async move { controller.acquire(&cancel).await })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        controller.release(1);
        waiter.await.unwrap().unwrap();
        assert_eq!(controller.available(), 0);
    }

    #[tokio::test]
    async fn cancel_unblocks_acquire() {
        let controller = Controller::new(1, 1, Duration::from_secs(3600));
        assert!(controller.try_acquire(1));

        let cancel = CancellationToken::new();
        let waiter = {
            let controller = Arc::clone(&controller);
            let cancel = cancel.clone();
            tokio::spawn(async move { controller.acquire(&cancel).await })
        };
        tokio::task::yield_now().await;
        cancel.cancel();
        assert!(matches!(waiter.await.unwrap(), Err(Error::Cancelled)));
    }

    #[tokio::test]
    async fn close_wakes_waiters_permanently() {
        let controller = Controller::new(1, 1, Duration::from_secs(3600));
        assert!(controller.try_acquire(1));

        let cancel = CancellationToken::new();
        let waiter = {
            let controller = Arc::clone(&controller);
            let cancel = cancel.clone();
            tokio::spawn(async move { controller.acquire(&cancel).await })
        };
        tokio::task::yield_now().await;
        controller.close();
        assert!(matches!(waiter.await.unwrap(), Err(Error::ControllerClosed)));
        assert!(!controller.try_acquire(1));
    }

    #[tokio::test(start_paused = true)]
    async fn refill_tops_up_but_respects_capacity() {
        let controller = Controller::new(10, 1, Duration::from_millis(100));
        assert!(controller.try_acquire(10));
        assert_eq!(controller.available(), 0);

        // Let the refill task register its timer before moving the clock.
        tokio::task::yield_now().await;
        tokio::time::advance(Duration::from_millis(350)).await;
        tokio::task::yield_now().await;
        let refilled = controller.available();
        assert!(refilled >= 1, "expected at least one refill tick, got {refilled}");
        assert!(refilled <= 10);

        controller.release(20);
        assert_eq!(controller.available(), 10);
    }
}
