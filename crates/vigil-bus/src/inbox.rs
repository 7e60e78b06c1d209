//! Bounded per-node inbound queues
//!
//! The queue coalesces per tag: a fresh reading replaces any pending reading
//! of the same tag before capacity is even considered. If the queue is still
//! full, the oldest pending entry is shed. Producers never block.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use vigil_common::TagUpdate;

/// What happened to a pushed update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    /// Replaced a pending update for the same tag
    Coalesced,
    /// Queued, but the oldest pending entry was shed to make room
    DroppedOldest,
}

struct Shared {
    queue: Mutex<VecDeque<TagUpdate>>,
    capacity: usize,
    notify: Notify,
    shed: AtomicU64,
}

/// Handle to a node's inbound queue; clone freely, all clones share state
#[derive(Clone)]
pub struct NodeInbox {
    shared: Arc<Shared>,
}

impl NodeInbox {
    pub fn new(capacity: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                queue: Mutex::new(VecDeque::with_capacity(capacity)),
                capacity: capacity.max(1),
                notify: Notify::new(),
                shed: AtomicU64::new(0),
            }),
        }
    }

    /// Push an update; never blocks.
    pub fn push(&self, update: TagUpdate) -> PushOutcome {
        let outcome;
        {
            let mut queue = self.shared.queue.lock();
            if let Some(pos) = queue.iter().position(|u| u.tag_id == update.tag_id) {
                queue.remove(pos);
                queue.push_back(update);
                outcome = PushOutcome::Coalesced;
            } else if queue.len() >= self.shared.capacity {
                queue.pop_front();
                queue.push_back(update);
                self.shared.shed.fetch_add(1, Ordering::Relaxed);
                outcome = PushOutcome::DroppedOldest;
            } else {
                queue.push_back(update);
                outcome = PushOutcome::Queued;
            }
        }
        self.shared.notify.notify_one();
        outcome
    }

    /// Wait for at least one pending update and drain them all.
    pub async fn recv_batch(&self) -> Vec<TagUpdate> {
        loop {
            let notified = self.shared.notify.notified();
            {
                let mut queue = self.shared.queue.lock();
                if !queue.is_empty() {
                    return queue.drain(..).collect();
                }
            }
            notified.await;
        }
    }

    /// Drain without waiting.
    pub fn try_drain(&self) -> Vec<TagUpdate> {
        self.shared.queue.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.shared.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.queue.lock().is_empty()
    }

    /// Updates shed due to overflow since start.
    pub fn shed_count(&self) -> u64 {
        self.shared.shed.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_common::{TagQuality, TagValue};

    fn update(tag: &str, value: f64) -> TagUpdate {
        TagUpdate::new(tag, TagValue::Float(value), TagQuality::Good)
    }

    #[test]
    fn test_coalesces_same_tag() {
        let inbox = NodeInbox::new(8);
        assert_eq!(inbox.push(update("A", 1.0)), PushOutcome::Queued);
        assert_eq!(inbox.push(update("A", 2.0)), PushOutcome::Coalesced);
        let drained = inbox.try_drain();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].value, TagValue::Float(2.0));
    }

    #[test]
    fn test_overflow_sheds_oldest() {
        let inbox = NodeInbox::new(2);
        inbox.push(update("A", 1.0));
        inbox.push(update("B", 2.0));
        assert_eq!(inbox.push(update("C", 3.0)), PushOutcome::DroppedOldest);

        let drained = inbox.try_drain();
        let tags: Vec<String> = drained.iter().map(|u| u.tag_id.to_string()).collect();
        assert_eq!(tags, vec!["B", "C"]);
        assert_eq!(inbox.shed_count(), 1);
    }

    #[tokio::test]
    async fn test_recv_batch_wakes_on_push() {
        let inbox = NodeInbox::new(8);
        let consumer = inbox.clone();
        let handle = tokio::spawn(async move { consumer.recv_batch().await });

        tokio::task::yield_now().await;
        inbox.push(update("A", 1.0));

        let batch = handle.await.unwrap();
        assert_eq!(batch.len(), 1);
    }
}
