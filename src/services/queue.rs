//! Partitioned in-process event queue.
//!
//! Accepted ledger entries are fanned out to workers by a stable hash
//! of the event's partition hint, so all events touching one
//! transaction land on the same worker and apply in receipt order. The
//! channels carry only event ids; the ledger is the durable record and
//! anything in flight during a crash is re-enqueued on boot.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

#[derive(Debug, Error)]
#[error("event queue is closed")]
pub struct QueueClosed;

#[derive(Clone)]
pub struct EventQueue {
    senders: Arc<Vec<mpsc::UnboundedSender<Uuid>>>,
    depth: Arc<AtomicI64>,
}

impl EventQueue {
    /// Creates the queue and one receiver per worker partition.
    pub fn new(partitions: usize) -> (Self, Vec<mpsc::UnboundedReceiver<Uuid>>) {
        let partitions = partitions.max(1);
        let mut senders = Vec::with_capacity(partitions);
        let mut receivers = Vec::with_capacity(partitions);
        for _ in 0..partitions {
            let (tx, rx) = mpsc::unbounded_channel();
            senders.push(tx);
            receivers.push(rx);
        }
        (
            Self {
                senders: Arc::new(senders),
                depth: Arc::new(AtomicI64::new(0)),
            },
            receivers,
        )
    }

    fn partition_for(&self, hint: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        hint.hash(&mut hasher);
        (hasher.finish() as usize) % self.senders.len()
    }

    pub fn enqueue(&self, hint: &str, event_id: Uuid) -> Result<(), QueueClosed> {
        let partition = self.partition_for(hint);
        self.senders[partition]
            .send(event_id)
            .map_err(|_| QueueClosed)?;
        self.depth.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Called by workers once an event finishes processing.
    pub fn mark_done(&self) {
        self.depth.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn depth(&self) -> i64 {
        self.depth.load(Ordering::Relaxed)
    }

    pub fn partitions(&self) -> usize {
        self.senders.len()
    }
}
