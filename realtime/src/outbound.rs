//! Bounded per-connection outbound queue.
//!
//! Consumers push into the queue without ever waiting; a single writer task per
//! connection drains it onto the socket, so frames for one socket never
//! interleave. When the queue is full the oldest queued notification is shed to
//! make room, which keeps one slow client from stalling the shared consumer loop.
//! A queue already full of control frames has no notification left to shed; one
//! more control frame overflows it, and the queue closes so the connection is
//! torn down as a slow consumer.

use crate::message::OutboundMessage;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::Notify;

/// Result of a non-blocking push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    /// The queue was full; the oldest queued notification was dropped.
    ShedOldest,
    /// The queue was full of control frames; the incoming notification was dropped.
    ShedIncoming,
    /// The queue was full of control frames and has been closed.
    Overflow,
    /// The connection is closing; nothing was queued.
    Closed,
}

pub struct OutboundQueue {
    capacity: usize,
    messages: Mutex<VecDeque<OutboundMessage>>,
    notify: Notify,
    closed: AtomicBool,
    dropped: AtomicU64,
}

impl OutboundQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            messages: Mutex::new(VecDeque::with_capacity(capacity.min(64))),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn push(&self, message: OutboundMessage) -> PushOutcome {
        if self.is_closed() {
            return PushOutcome::Closed;
        }

        let mut outcome = PushOutcome::Queued;
        {
            let mut messages = self.messages.lock();
            if messages.len() >= self.capacity {
                match messages.iter().position(OutboundMessage::is_notification) {
                    Some(oldest) => {
                        messages.remove(oldest);
                        outcome = PushOutcome::ShedOldest;
                    }
                    None if message.is_notification() => {
                        let _ = self.dropped.fetch_add(1, Ordering::Relaxed);
                        return PushOutcome::ShedIncoming;
                    }
                    None => {
                        drop(messages);
                        self.close();
                        return PushOutcome::Overflow;
                    }
                }
            }
            messages.push_back(message);
        }

        if outcome == PushOutcome::ShedOldest {
            let _ = self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        self.notify.notify_one();
        outcome
    }

    /// Waits for the next message. Returns `None` once the queue is closed.
    pub async fn recv(&self) -> Option<OutboundMessage> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_closed() {
                return None;
            }
            if let Some(message) = self.messages.lock().pop_front() {
                return Some(message);
            }

            notified.await;
        }
    }

    /// Closes the queue and discards anything still buffered.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.messages.lock().clear();
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.messages.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total notifications shed for this connection.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn note(n: u32) -> OutboundMessage {
        OutboundMessage::Notification(format!("n{n}").into())
    }

    fn control(text: &str) -> OutboundMessage {
        OutboundMessage::Control(text.into())
    }

    #[tokio::test]
    async fn full_queue_sheds_oldest_notification() {
        let queue = OutboundQueue::new(2);
        assert_eq!(queue.push(note(1)), PushOutcome::Queued);
        assert_eq!(queue.push(note(2)), PushOutcome::Queued);
        assert_eq!(queue.push(note(3)), PushOutcome::ShedOldest);

        assert_eq!(queue.dropped_count(), 1);
        assert_eq!(queue.recv().await, Some(note(2)));
        assert_eq!(queue.recv().await, Some(note(3)));
    }

    #[tokio::test]
    async fn control_frames_survive_shedding() {
        let queue = OutboundQueue::new(2);
        queue.push(control("pong"));
        queue.push(note(1));
        assert_eq!(queue.push(note(2)), PushOutcome::ShedOldest);

        assert_eq!(queue.recv().await, Some(control("pong")));
        assert_eq!(queue.recv().await, Some(note(2)));
    }

    #[test]
    fn notification_is_dropped_when_only_control_frames_are_queued() {
        let queue = OutboundQueue::new(1);
        queue.push(control("confirmed"));
        assert_eq!(queue.push(note(1)), PushOutcome::ShedIncoming);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.dropped_count(), 1);
    }

    #[tokio::test]
    async fn unread_control_frames_never_exceed_capacity() {
        let queue = OutboundQueue::new(4);
        let outcomes: Vec<PushOutcome> = (0..10_000).map(|_| queue.push(control("pong"))).collect();

        assert!(queue.len() <= 4);
        assert_eq!(&outcomes[..4], &[PushOutcome::Queued; 4]);
        assert_eq!(outcomes[4], PushOutcome::Overflow);
        assert!(outcomes[5..].iter().all(|o| *o == PushOutcome::Closed));
        assert!(queue.is_closed());
        assert_eq!(queue.recv().await, None);
    }

    #[tokio::test]
    async fn close_discards_buffered_messages_and_ends_recv() {
        let queue = OutboundQueue::new(4);
        queue.push(note(1));
        queue.close();

        assert!(queue.is_empty());
        assert_eq!(queue.recv().await, None);
        assert_eq!(queue.push(note(2)), PushOutcome::Closed);
    }

    #[tokio::test]
    async fn waiting_receiver_wakes_on_push_and_close() {
        let queue = Arc::new(OutboundQueue::new(4));
        let reader = {
            let queue = queue.clone();
            tokio::spawn(async move {
                let first = queue.recv().await;
                let second = queue.recv().await;
                (first, second)
            })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.push(note(1));
        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.close();

        let (first, second) = tokio::time::timeout(Duration::from_secs(1), reader)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first, Some(note(1)));
        assert_eq!(second, None);
    }
}
