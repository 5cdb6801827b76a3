//! Per-session outbound queue
//!
//! A bounded FIFO of payloads shared between the hub (producer side) and a
//! session's outbound loop (consumer side). Pushing never blocks: when the
//! queue is full the configured [`OverflowPolicy`] decides what happens.

use bytes::Bytes;
use parking_lot::Mutex;
use serde::Deserialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Notify;

/// An immutable broadcast payload, cloned by reference count.
pub type Payload = Bytes;

/// What to do when a session's outbound queue is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Evict the oldest queued payload so the newest one fits
    #[default]
    DropOldest,
    /// Reject the incoming payload and keep what is queued
    DropNewest,
    /// Reject the payload and ask the hub to drop the session
    Disconnect,
}

impl std::str::FromStr for OverflowPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "drop_oldest" => Ok(Self::DropOldest),
            "drop_newest" => Ok(Self::DropNewest),
            "disconnect" => Ok(Self::Disconnect),
            other => Err(format!("unknown overflow policy: {}", other)),
        }
    }
}

/// Result of a non-blocking push
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Payload was queued
    Queued,
    /// Payload was queued after evicting the oldest one
    Evicted,
    /// Queue was full and the payload was discarded
    Dropped,
    /// Queue was full and the policy asks for disconnection
    Overflowed,
    /// Queue is closed; the payload was discarded
    Closed,
}

struct QueueState {
    items: VecDeque<Payload>,
    closed: bool,
}

/// Bounded, closable outbound queue with a single consumer
pub struct OutboundQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    capacity: usize,
    policy: OverflowPolicy,
    dropped: AtomicU64,
}

impl OutboundQueue {
    /// Create an open queue. A capacity of zero is treated as one.
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            notify: Notify::new(),
            capacity,
            policy,
            dropped: AtomicU64::new(0),
        }
    }

    /// Push a payload without waiting
    pub fn push(&self, payload: Payload) -> PushOutcome {
        let outcome = {
            let mut state = self.state.lock();
            if state.closed {
                return PushOutcome::Closed;
            }

            if state.items.len() < self.capacity {
                state.items.push_back(payload);
                PushOutcome::Queued
            } else {
                match self.policy {
                    OverflowPolicy::DropOldest => {
                        state.items.pop_front();
                        state.items.push_back(payload);
                        PushOutcome::Evicted
                    }
                    OverflowPolicy::DropNewest => PushOutcome::Dropped,
                    OverflowPolicy::Disconnect => PushOutcome::Overflowed,
                }
            }
        };

        match outcome {
            PushOutcome::Queued => self.notify.notify_one(),
            PushOutcome::Evicted => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                self.notify.notify_one();
            }
            PushOutcome::Dropped | PushOutcome::Overflowed => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            PushOutcome::Closed => {}
        }

        outcome
    }

    /// Wait for the next payload.
    ///
    /// Payloads queued before [`close`](Self::close) are still handed out;
    /// `None` means the queue is closed and empty.
    pub async fn recv(&self) -> Option<Payload> {
        loop {
            {
                let mut state = self.state.lock();
                if let Some(payload) = state.items.pop_front() {
                    return Some(payload);
                }
                if state.closed {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }

    /// Take everything queued right now
    pub fn drain(&self) -> Vec<Payload> {
        self.state.lock().items.drain(..).collect()
    }

    /// Close the queue. Returns `true` only for the call that closed it.
    pub fn close(&self) -> bool {
        let first = {
            let mut state = self.state.lock();
            !std::mem::replace(&mut state.closed, true)
        };
        if first {
            self.notify.notify_one();
        }
        first
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Payloads discarded by the overflow policy so far
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for OutboundQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboundQueue")
            .field("capacity", &self.capacity)
            .field("policy", &self.policy)
            .field("len", &self.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn payload(s: &'static str) -> Payload {
        Bytes::from_static(s.as_bytes())
    }

    #[test]
    fn test_drop_oldest_keeps_most_recent() {
        let queue = OutboundQueue::new(2, OverflowPolicy::DropOldest);
        assert_eq!(queue.push(payload("a")), PushOutcome::Queued);
        assert_eq!(queue.push(payload("b")), PushOutcome::Queued);
        assert_eq!(queue.push(payload("c")), PushOutcome::Evicted);

        assert_eq!(queue.drain(), vec![payload("b"), payload("c")]);
        assert_eq!(queue.dropped(), 1);
    }

    #[test]
    fn test_drop_newest_rejects_incoming() {
        let queue = OutboundQueue::new(2, OverflowPolicy::DropNewest);
        queue.push(payload("a"));
        queue.push(payload("b"));
        assert_eq!(queue.push(payload("c")), PushOutcome::Dropped);

        assert_eq!(queue.drain(), vec![payload("a"), payload("b")]);
        assert_eq!(queue.dropped(), 1);
    }

    #[test]
    fn test_disconnect_policy_reports_overflow() {
        let queue = OutboundQueue::new(1, OverflowPolicy::Disconnect);
        queue.push(payload("a"));
        assert_eq!(queue.push(payload("b")), PushOutcome::Overflowed);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_close_is_idempotent() {
        let queue = OutboundQueue::new(4, OverflowPolicy::default());
        assert!(queue.close());
        assert!(!queue.close());
        assert!(queue.is_closed());
        assert_eq!(queue.push(payload("late")), PushOutcome::Closed);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_recv_drains_before_reporting_close() {
        let queue = OutboundQueue::new(4, OverflowPolicy::default());
        queue.push(payload("a"));
        queue.close();

        assert_eq!(queue.recv().await, Some(payload("a")));
        assert_eq!(queue.recv().await, None);
    }

    #[tokio::test]
    async fn test_recv_wakes_on_push() {
        let queue = Arc::new(OutboundQueue::new(4, OverflowPolicy::default()));
        let consumer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.recv().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.push(payload("hello"));

        let received = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, Some(payload("hello")));
    }

    #[tokio::test]
    async fn test_recv_wakes_on_close() {
        let queue = Arc::new(OutboundQueue::new(4, OverflowPolicy::default()));
        let consumer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.recv().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.close();

        let received = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, None);
    }

    #[test]
    fn test_policy_from_str() {
        assert_eq!("drop_oldest".parse(), Ok(OverflowPolicy::DropOldest));
        assert_eq!("disconnect".parse(), Ok(OverflowPolicy::Disconnect));
        assert!("bogus".parse::<OverflowPolicy>().is_err());
    }
}
