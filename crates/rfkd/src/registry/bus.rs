//! Event bus - per-session bounded delivery queues.
//!
//! Every connected session owns one queue. Publishing never blocks: a
//! session whose queue is full is reported back so the actor can drop it.
//! Events reach each session in the order they were published.

use std::collections::HashMap;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use super::commands::{DeviceEvent, SessionId};

/// Default capacity of each session's delivery queue.
pub const DEFAULT_QUEUE_DEPTH: usize = 64;

/// Sessions that could not take a published event.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct PublishOutcome {
    /// Queue was full.
    pub overflowed: Vec<SessionId>,
    /// Receiver was dropped.
    pub closed: Vec<SessionId>,
}

impl PublishOutcome {
    pub fn is_clean(&self) -> bool {
        self.overflowed.is_empty() && self.closed.is_empty()
    }
}

#[derive(Debug)]
pub struct EventBus {
    queues: HashMap<SessionId, mpsc::Sender<DeviceEvent>>,
    depth: usize,
}

impl EventBus {
    /// Creates a bus whose queues hold `depth` events (at least one).
    pub fn new(depth: usize) -> Self {
        Self {
            queues: HashMap::new(),
            depth: depth.max(1),
        }
    }

    /// Creates the delivery queue for a session.
    ///
    /// Re-enrolling replaces the previous queue.
    pub fn enroll(&mut self, session: SessionId) -> mpsc::Receiver<DeviceEvent> {
        let (tx, rx) = mpsc::channel(self.depth);
        self.queues.insert(session, tx);
        rx
    }

    /// Removes a session's queue. Its receiver sees the channel close
    /// once buffered events are drained.
    pub fn unenroll(&mut self, session: SessionId) -> bool {
        self.queues.remove(&session).is_some()
    }

    /// Offers `event` to every queue without waiting.
    ///
    /// Sessions that could not accept it are removed from the bus and
    /// returned to the caller.
    pub fn publish(&mut self, event: &DeviceEvent) -> PublishOutcome {
        let mut outcome = PublishOutcome::default();

        for (session, queue) in &self.queues {
            match queue.try_send(event.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => outcome.overflowed.push(*session),
                Err(TrySendError::Closed(_)) => outcome.closed.push(*session),
            }
        }

        for session in outcome.overflowed.iter().chain(outcome.closed.iter()) {
            self.queues.remove(session);
        }

        outcome.overflowed.sort();
        outcome.closed.sort();
        outcome
    }

    pub fn subscriber_count(&self) -> usize {
        self.queues.len()
    }

    pub fn depth(&self) -> usize {
        self.depth
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(code: u32) -> DeviceEvent {
        DeviceEvent::KeyPressed(code)
    }

    #[tokio::test]
    async fn test_publish_reaches_every_session_in_order() {
        let mut bus = EventBus::new(8);
        let mut a = bus.enroll(SessionId::new(1));
        let mut b = bus.enroll(SessionId::new(2));

        for code in [237, 238, 239] {
            assert!(bus.publish(&key(code)).is_clean());
        }

        for rx in [&mut a, &mut b] {
            assert_eq!(rx.recv().await, Some(key(237)));
            assert_eq!(rx.recv().await, Some(key(238)));
            assert_eq!(rx.recv().await, Some(key(239)));
        }
    }

    #[tokio::test]
    async fn test_full_queue_overflows_only_that_session() {
        let mut bus = EventBus::new(2);
        let mut slow = bus.enroll(SessionId::new(1));
        let mut fast = bus.enroll(SessionId::new(2));

        bus.publish(&key(1));
        bus.publish(&key(2));
        // Fast consumer keeps up
        assert_eq!(fast.recv().await, Some(key(1)));
        assert_eq!(fast.recv().await, Some(key(2)));

        let outcome = bus.publish(&key(3));
        assert_eq!(outcome.overflowed, vec![SessionId::new(1)]);
        assert_eq!(bus.subscriber_count(), 1);
        assert_eq!(fast.recv().await, Some(key(3)));

        // Slow consumer drains what it had, then sees the queue close
        assert_eq!(slow.recv().await, Some(key(1)));
        assert_eq!(slow.recv().await, Some(key(2)));
        assert_eq!(slow.recv().await, None);
    }

    #[tokio::test]
    async fn test_dropped_receiver_is_reported_closed() {
        let mut bus = EventBus::new(4);
        let rx = bus.enroll(SessionId::new(7));
        drop(rx);

        let outcome = bus.publish(&key(238));
        assert_eq!(outcome.closed, vec![SessionId::new(7)]);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_unenroll_closes_queue() {
        let mut bus = EventBus::new(4);
        let mut rx = bus.enroll(SessionId::new(1));
        assert!(bus.unenroll(SessionId::new(1)));
        assert!(!bus.unenroll(SessionId::new(1)));
        assert_eq!(rx.recv().await, None);
    }

    #[test]
    fn test_zero_depth_is_clamped() {
        assert_eq!(EventBus::new(0).depth(), 1);
        assert_eq!(EventBus::new(DEFAULT_QUEUE_DEPTH).depth(), 64);
    }
}
