//! Typed session events and the bounded bus that delivers them.
//!
//! Every subscriber owns a queue bounded by `event_queue_capacity`. Publishing
//! never blocks. When a queue is full a new event is first folded into a
//! queued one of the same kind (pending counts add up, the newer cursor or
//! state wins) and moved to the back. Failing that, the oldest progress event
//! is dropped, then the oldest droppable event. Completion, failure and
//! index-ready reports are never dropped.

use crate::file_handler::FileId;
use crate::session::tail::TailState;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::Notify;

/// Observations published by a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Throttled initial-scan progress of one file
    ScanProgress {
        file: FileId,
        bytes: u64,
        lines: u64,
        message: String,
    },
    /// The initial scan of a file reached end of file
    ScanComplete { file: FileId },
    /// A file could not be opened or read; the rest of the session continues
    ScanFailed { file: FileId, message: String },
    /// The merged index was built and is now queryable
    IndexReady { total_lines: u64 },
    /// New lines arrived while following
    PendingLines { count: u64 },
    /// The cursor changed
    CursorMoved { line: Option<u64> },
    /// A file was truncated or replaced and has been re-indexed
    RotationDetected { file: FileId },
    TailChanged { state: TailState },
}

impl SessionEvent {
    pub fn is_progress(&self) -> bool {
        matches!(self, SessionEvent::ScanProgress { .. })
    }

    /// Reports a consumer cannot recover from a later event
    pub fn is_essential(&self) -> bool {
        matches!(
            self,
            SessionEvent::ScanComplete { .. }
                | SessionEvent::ScanFailed { .. }
                | SessionEvent::IndexReady { .. }
        )
    }

    /// One event carrying what both `self` and the later `newer` say, if any
    fn coalesce(&self, newer: &SessionEvent) -> Option<SessionEvent> {
        use SessionEvent::*;
        match (self, newer) {
            (PendingLines { count: a }, PendingLines { count: b }) => {
                Some(PendingLines { count: a + b })
            }
            (CursorMoved { .. }, CursorMoved { .. }) => Some(newer.clone()),
            (TailChanged { .. }, TailChanged { .. }) => Some(newer.clone()),
            (ScanProgress { file: a, .. }, ScanProgress { file: b, .. })
            | (RotationDetected { file: a }, RotationDetected { file: b })
                if a == b =>
            {
                Some(newer.clone())
            }
            _ => None,
        }
    }
}

#[derive(Debug)]
struct Subscription {
    queue: Mutex<VecDeque<SessionEvent>>,
    capacity: usize,
    closed: AtomicBool,
    notify: Notify,
}

impl Subscription {
    fn push(&self, event: SessionEvent) {
        {
            let mut queue = self.queue.lock();
            if queue.len() < self.capacity {
                queue.push_back(event);
            } else if let Some((pos, merged)) = queue
                .iter()
                .enumerate()
                .rev()
                .find_map(|(pos, queued)| queued.coalesce(&event).map(|merged| (pos, merged)))
            {
                queue.remove(pos);
                queue.push_back(merged);
            } else if let Some(pos) = queue.iter().position(SessionEvent::is_progress) {
                queue.remove(pos);
                queue.push_back(event);
            } else if event.is_progress() {
                return;
            } else {
                if let Some(pos) = queue.iter().position(|q| !q.is_essential()) {
                    queue.remove(pos);
                }
                queue.push_back(event);
            }
        }
        self.notify.notify_one();
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_one();
    }
}

/// Fan-out of session events to any number of receivers
#[derive(Debug)]
pub struct EventBus {
    subscribers: Mutex<Vec<Weak<Subscription>>>,
    capacity: usize,
    closed: AtomicBool,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            capacity: capacity.max(1),
            closed: AtomicBool::new(false),
        }
    }

    /// Register a receiver for every event published from now on
    pub fn subscribe(&self) -> EventReceiver {
        let subscription = Arc::new(Subscription {
            queue: Mutex::new(VecDeque::new()),
            capacity: self.capacity,
            closed: AtomicBool::new(false),
            notify: Notify::new(),
        });

        let mut subscribers = self.subscribers.lock();
        if self.closed.load(Ordering::Acquire) {
            subscription.close();
        } else {
            subscribers.push(Arc::downgrade(&subscription));
        }
        EventReceiver {
            inner: subscription,
        }
    }

    pub fn publish(&self, event: SessionEvent) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|weak| match weak.upgrade() {
            Some(subscription) => {
                subscription.push(event.clone());
                true
            }
            None => false,
        });
    }

    pub fn publish_all(&self, events: impl IntoIterator<Item = SessionEvent>) {
        for event in events {
            self.publish(event);
        }
    }

    /// Stop delivery; receivers drain what is queued and then see `None`
    pub fn close(&self) {
        let mut subscribers = self.subscribers.lock();
        self.closed.store(true, Ordering::Release);
        for subscription in subscribers.drain(..).filter_map(|weak| weak.upgrade()) {
            subscription.close();
        }
    }
}

/// Receiving end of one subscription
#[derive(Debug)]
pub struct EventReceiver {
    inner: Arc<Subscription>,
}

impl EventReceiver {
    /// Next event, or `None` once the session is closed and the queue drained
    pub async fn recv(&mut self) -> Option<SessionEvent> {
        loop {
            let notified = self.inner.notify.notified();
            if let Some(event) = self.inner.queue.lock().pop_front() {
                return Some(event);
            }
            if self.inner.closed.load(Ordering::Acquire) {
                return None;
            }
            notified.await;
        }
    }

    /// Next queued event without waiting
    pub fn try_recv(&mut self) -> Option<SessionEvent> {
        self.inner.queue.lock().pop_front()
    }

    /// Number of events waiting
    pub fn len(&self) -> usize {
        self.inner.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn progress(lines: u64) -> SessionEvent {
        SessionEvent::ScanProgress {
            file: 0,
            bytes: lines * 10,
            lines,
            message: format!("{lines}"),
        }
    }

    #[tokio::test]
    async fn test_delivers_in_order() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        bus.publish(progress(1));
        bus.publish(SessionEvent::ScanComplete { file: 0 });

        assert_eq!(rx.recv().await, Some(progress(1)));
        assert_eq!(rx.recv().await, Some(SessionEvent::ScanComplete { file: 0 }));
        assert!(rx.try_recv().is_none());
    }

    #[test]
    fn test_full_queue_keeps_latest_progress_of_a_file() {
        let bus = EventBus::new(3);
        let mut rx = bus.subscribe();
        bus.publish(progress(1));
        bus.publish(SessionEvent::ScanComplete { file: 0 });
        bus.publish(progress(2));
        bus.publish(progress(3));

        assert_eq!(rx.try_recv(), Some(progress(1)));
        assert_eq!(rx.try_recv(), Some(SessionEvent::ScanComplete { file: 0 }));
        assert_eq!(rx.try_recv(), Some(progress(3)));
        assert!(rx.try_recv().is_none());
    }

    #[test]
    fn test_full_queue_drops_oldest_progress() {
        let bus = EventBus::new(2);
        let mut rx = bus.subscribe();
        bus.publish(progress(1));
        bus.publish(SessionEvent::ScanComplete { file: 0 });
        bus.publish(SessionEvent::PendingLines { count: 4 });

        assert_eq!(rx.try_recv(), Some(SessionEvent::ScanComplete { file: 0 }));
        assert_eq!(rx.try_recv(), Some(SessionEvent::PendingLines { count: 4 }));
        assert!(rx.try_recv().is_none());
    }

    #[test]
    fn test_tail_events_stay_within_capacity() {
        let bus = EventBus::new(4);
        let mut rx = bus.subscribe();
        bus.publish(SessionEvent::ScanComplete { file: 0 });
        for line in 0..1000 {
            bus.publish(SessionEvent::CursorMoved { line: Some(line) });
            bus.publish(SessionEvent::PendingLines { count: 1 });
            assert!(rx.len() <= 4);
        }

        let mut pending = 0;
        let mut cursor = None;
        let mut completed = false;
        while let Some(event) = rx.try_recv() {
            match event {
                SessionEvent::PendingLines { count } => pending += count,
                SessionEvent::CursorMoved { line } => cursor = line,
                SessionEvent::ScanComplete { file: 0 } => completed = true,
                other => panic!("unexpected event {:?}", other),
            }
        }
        assert!(completed);
        assert_eq!(pending, 1000);
        assert_eq!(cursor, Some(999));
    }

    #[test]
    fn test_full_queue_displaces_oldest_droppable_event() {
        let bus = EventBus::new(2);
        let mut rx = bus.subscribe();
        bus.publish(SessionEvent::IndexReady { total_lines: 1 });
        bus.publish(SessionEvent::CursorMoved { line: Some(0) });
        bus.publish(SessionEvent::RotationDetected { file: 0 });

        assert_eq!(rx.try_recv(), Some(SessionEvent::IndexReady { total_lines: 1 }));
        assert_eq!(rx.try_recv(), Some(SessionEvent::RotationDetected { file: 0 }));
        assert!(rx.try_recv().is_none());
    }

    #[test]
    fn test_completion_is_never_dropped() {
        let bus = EventBus::new(2);
        let mut rx = bus.subscribe();
        for file in 0..4 {
            bus.publish(SessionEvent::ScanComplete { file });
        }
        // A progress event has nothing to displace and is dropped itself
        bus.publish(progress(9));

        assert_eq!(rx.len(), 4);
        for file in 0..4 {
            assert_eq!(rx.try_recv(), Some(SessionEvent::ScanComplete { file }));
        }
    }

    #[tokio::test]
    async fn test_close_drains_then_ends() {
        let bus = EventBus::new(4);
        let mut rx = bus.subscribe();
        bus.publish(SessionEvent::PendingLines { count: 2 });
        bus.close();

        assert_eq!(rx.recv().await, Some(SessionEvent::PendingLines { count: 2 }));
        assert_eq!(rx.recv().await, None);

        let mut late = bus.subscribe();
        assert_eq!(late.recv().await, None);
    }

    #[tokio::test]
    async fn test_recv_wakes_on_publish() {
        let bus = Arc::new(EventBus::new(4));
        let mut rx = bus.subscribe();

        let publisher = Arc::clone(&bus);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            publisher.publish(SessionEvent::IndexReady { total_lines: 3 });
        });

        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("event timed out");
        assert_eq!(event, Some(SessionEvent::IndexReady { total_lines: 3 }));
    }

    #[test]
    fn test_dropped_receivers_are_pruned() {
        let bus = EventBus::new(4);
        let rx = bus.subscribe();
        drop(rx);
        bus.publish(SessionEvent::ScanComplete { file: 0 });
        assert!(bus.subscribers.lock().is_empty());
    }
}
