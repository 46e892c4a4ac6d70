//! Registry of callers parked on blocking list operations.
//!
//! A waiter is a stored continuation: the deadline, the command to retry and
//! the reply sender of the suspended caller. One waiter may be parked on
//! several keys at once; all queues share the same `Arc`, so removal is by
//! pointer identity across every queue. The reply sender sits behind a
//! `Mutex<Option<..>>` so it can be taken exactly once.

use crate::core::commands::{Command, Reply};
use crate::core::common::EdisError;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::oneshot;

pub(crate) type ReplySender = oneshot::Sender<Result<Reply, EdisError>>;

#[derive(Debug)]
pub(crate) struct Waiter {
    deadline: Option<Instant>,
    pub(crate) command: Command,
    sender: Mutex<Option<ReplySender>>,
}

impl Waiter {
    pub(crate) fn expired(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|deadline| deadline <= now)
    }

    /// Liveness check against the runtime: the caller is gone once its
    /// receiving half dropped, or once the waiter was already fulfilled.
    pub(crate) fn is_dead(&self) -> bool {
        match self.sender.lock() {
            Ok(guard) => guard.as_ref().map_or(true, |sender| sender.is_closed()),
            Err(_) => true,
        }
    }

    /// Delivers the reply to the parked caller, at most once.
    pub(crate) fn fulfill(&self, reply: Result<Reply, EdisError>) {
        if let Ok(mut guard) = self.sender.lock() {
            if let Some(sender) = guard.take() {
                let _ = sender.send(reply);
            }
        }
    }
}

/// Per-key FIFO queues of parked waiters.
#[derive(Debug, Default)]
pub(crate) struct BlockedOps {
    queues: HashMap<Vec<u8>, VecDeque<Arc<Waiter>>>,
}

impl BlockedOps {
    /// Parks a caller on every listed key.
    pub(crate) fn park(
        &mut self,
        keys: Vec<Vec<u8>>,
        deadline: Option<Instant>,
        command: Command,
        sender: ReplySender,
    ) {
        let waiter =
            Arc::new(Waiter { deadline, command, sender: Mutex::new(Some(sender)) });
        for key in keys {
            self.queues.entry(key).or_default().push_back(waiter.clone());
        }
    }

    /// Oldest waiter parked on `key`, if any.
    pub(crate) fn front(&self, key: &[u8]) -> Option<Arc<Waiter>> {
        self.queues.get(key).and_then(|queue| queue.front().cloned())
    }

    /// Removes a waiter from every key it is parked on.
    pub(crate) fn remove(&mut self, waiter: &Arc<Waiter>) {
        self.queues.retain(|_, queue| {
            queue.retain(|candidate| !Arc::ptr_eq(candidate, waiter));
            !queue.is_empty()
        });
    }

    /// Discards deadline-elapsed and dead waiters. The expired ones whose
    /// callers are still reachable are returned so the actor can deliver the
    /// empty reply.
    pub(crate) fn sweep(&mut self, now: Instant) -> Vec<Arc<Waiter>> {
        let mut discard: Vec<Arc<Waiter>> = Vec::new();
        for queue in self.queues.values() {
            for waiter in queue {
                if (waiter.expired(now) || waiter.is_dead())
                    && !discard.iter().any(|seen| Arc::ptr_eq(seen, waiter))
                {
                    discard.push(waiter.clone());
                }
            }
        }
        self.queues.retain(|_, queue| {
            queue.retain(|candidate| !discard.iter().any(|seen| Arc::ptr_eq(seen, candidate)));
            !queue.is_empty()
        });
        discard.retain(|waiter| waiter.expired(now) && !waiter.is_dead());
        discard
    }

    /// Drops every waiter (FLUSHDB / shutdown).
    pub(crate) fn clear(&mut self) {
        self.queues.clear();
    }

    /// Number of distinct parked callers.
    pub(crate) fn waiter_count(&self) -> usize {
        let mut seen: Vec<&Arc<Waiter>> = Vec::new();
        for queue in self.queues.values() {
            for waiter in queue {
                if !seen.iter().any(|s| Arc::ptr_eq(s, waiter)) {
                    seen.push(waiter);
                }
            }
        }
        seen.len()
    }
}
