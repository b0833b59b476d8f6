// SPDX-License-Identifier: Apache-2.0

//! Ordered checkpoint tracking.
//!
//! A tracker holds the positions of records whose emission has been observed
//! but whose acknowledgement is still pending, and reports the highest
//! position whose entire prefix has resolved. That position is the one that is
//! safe to commit upstream without creating a gap.
//!
//! Nodes live in a [`SlotMap`] pool and link to their neighbours by key;
//! generation-tagged keys make out-of-order unlinking safe without reference
//! cycles. When a node resolves out of order, its position and payload are
//! spliced backwards into its predecessor, so the predecessor carries them
//! forward once the prefix finally resolves.

use crate::error::Error;
use parking_lot::Mutex;
use slotmap::SlotMap;
use std::sync::Arc;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

slotmap::new_key_type! {
    struct NodeKey;
}

struct Node<T> {
    pos: i64,
    payload: T,
    prev: Option<NodeKey>,
    next: Option<NodeKey>,
}

/// An unbounded ordered set of pending positions.
pub struct Uncapped<T> {
    nodes: SlotMap<NodeKey, Node<T>>,
    head: Option<NodeKey>,
    tail: Option<NodeKey>,
    resolved_pos: i64,
    resolved_payload: Option<T>,
}

impl<T> Default for Uncapped<T> {
    fn default() -> Self {
        Uncapped {
            nodes: SlotMap::with_key(),
            head: None,
            tail: None,
            resolved_pos: 0,
            resolved_payload: None,
        }
    }
}

impl<T> Uncapped<T> {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Uncapped::default()
    }

    /// Appends a pending entry of `size` positions carrying `payload`.
    fn track(&mut self, payload: T, size: i64) -> NodeKey {
        let base = match self.tail {
            Some(tail) => self.nodes[tail].pos,
            None => self.resolved_pos,
        };
        let key = self.nodes.insert(Node {
            pos: base + size,
            payload,
            prev: self.tail,
            next: None,
        });
        match self.tail {
            Some(tail) => self.nodes[tail].next = Some(key),
            None => self.head = Some(key),
        }
        self.tail = Some(key);
        key
    }

    /// Marks the entry at `key` resolved and returns the highest payload whose
    /// prefix has fully resolved.
    fn resolve(&mut self, key: NodeKey) -> Option<&T> {
        let Some(node) = self.nodes.remove(key) else {
            return self.resolved_payload.as_ref();
        };
        match node.prev {
            // Out of order: hand position and payload to the predecessor so it
            // carries them once the prefix resolves.
            Some(prev) => {
                let predecessor = &mut self.nodes[prev];
                predecessor.pos = node.pos;
                predecessor.payload = node.payload;
                predecessor.next = node.next;
            }
            // Head of the list: the prefix is complete up to this position.
            None => {
                self.resolved_pos = node.pos;
                self.resolved_payload = Some(node.payload);
                self.head = node.next;
            }
        }
        match node.next {
            Some(next) => self.nodes[next].prev = node.prev,
            None => self.tail = node.prev,
        }
        self.resolved_payload.as_ref()
    }

    /// Number of positions tracked but not yet contiguously resolved.
    #[must_use]
    pub fn pending(&self) -> i64 {
        match self.tail {
            Some(tail) => self.nodes[tail].pos - self.resolved_pos,
            None => 0,
        }
    }

    /// Payload of the highest contiguously resolved position, if any.
    #[must_use]
    pub fn highest(&self) -> Option<&T> {
        self.resolved_payload.as_ref()
    }
}

/// A capacity-bounded tracker.
///
/// `track` blocks while the tracker holds pending positions and admitting the
/// batch would exceed the capacity. Resolvers may be invoked from any task;
/// each resolution wakes blocked trackers.
pub struct Capped<T> {
    inner: Mutex<Uncapped<T>>,
    capacity: i64,
    notify: Notify,
}

impl<T: Clone + Send + 'static> Capped<T> {
    /// Creates a tracker admitting at most `capacity` pending positions.
    pub fn new(capacity: i64) -> Arc<Self> {
        Arc::new(Capped {
            inner: Mutex::new(Uncapped::new()),
            capacity,
            notify: Notify::new(),
        })
    }

    /// Tracks `payload` as a batch of `batch` positions, waiting for capacity.
    ///
    /// A batch larger than the capacity is admitted once the tracker is empty,
    /// so oversized batches make progress instead of deadlocking.
    pub async fn track(
        self: &Arc<Self>,
        cancel: &CancellationToken,
        payload: T,
        batch: i64,
    ) -> Result<Resolver<T>, Error> {
        loop {
            let notified = self.notify.notified();
            {
                let mut inner = self.inner.lock();
                let pending = inner.pending();
                if !(pending > 0 && pending + batch > self.capacity) {
                    let key = inner.track(payload, batch);
                    return Ok(Resolver {
                        tracker: Arc::clone(self),
                        key: Some(key),
                    });
                }
            }
            tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = notified => {}
            }
        }
    }

    /// Number of positions tracked but not yet contiguously resolved.
    #[must_use]
    pub fn pending(&self) -> i64 {
        self.inner.lock().pending()
    }

    /// Payload of the highest contiguously resolved position, if any.
    #[must_use]
    pub fn highest(&self) -> Option<T> {
        self.inner.lock().highest().cloned()
    }
}

/// Single-use handle resolving one tracked entry.
///
/// Dropping an unresolved handle still unlinks its entry, so discarded
/// resolvers (e.g. cleared on a consumer-group rebalance) cannot wedge the
/// tracker at capacity.
pub struct Resolver<T> {
    tracker: Arc<Capped<T>>,
    key: Option<NodeKey>,
}

impl<T: Clone + Send + 'static> Resolver<T> {
    /// Resolves the entry and returns the highest contiguously resolved
    /// payload, waking any tracker blocked on capacity.
    pub fn resolve(mut self) -> Option<T> {
        let Some(key) = self.key.take() else {
            return self.tracker.highest();
        };
        let highest = {
            let mut inner = self.tracker.inner.lock();
            inner.resolve(key).cloned()
        };
        self.tracker.notify.notify_waiters();
        highest
    }
}

impl<T> Drop for Resolver<T> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            {
                let mut inner = self.tracker.inner.lock();
                let _ = inner.resolve(key);
            }
            self.tracker.notify.notify_waiters();
        }
    }
}
