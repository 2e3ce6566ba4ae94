use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;

use serde::Deserialize;

use stream_api::{Event, EventPublisher, StreamError};

use crate::error::QueueFull;
use crate::router::QueueRouter;

// ═══════════════════════════════════════════════════════════════
//  QueueId
// ═══════════════════════════════════════════════════════════════

/// Приоритет очереди. Каждая очередь независима: своя ёмкость, свой lock,
/// своё условие ожидания.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueId {
    Realtime,
    Transactional,
    Batch,
}

impl QueueId {
    pub const ALL: [QueueId; 3] = [QueueId::Realtime, QueueId::Transactional, QueueId::Batch];

    pub fn default_capacity(self) -> usize {
        match self {
            QueueId::Realtime => 16384,
            QueueId::Transactional => 8192,
            QueueId::Batch => 2048,
        }
    }

    fn index(self) -> usize {
        match self {
            QueueId::Realtime => 0,
            QueueId::Transactional => 1,
            QueueId::Batch => 2,
        }
    }
}

impl std::fmt::Display for QueueId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueueId::Realtime => f.write_str("realtime"),
            QueueId::Transactional => f.write_str("transactional"),
            QueueId::Batch => f.write_str("batch"),
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  BoundedQueue
// ═══════════════════════════════════════════════════════════════

struct BoundedQueue {
    events: Mutex<VecDeque<Event>>,
    not_empty: Condvar,
    capacity: usize,
}

impl BoundedQueue {
    fn new(capacity: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::new()),
            not_empty: Condvar::new(),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Event>> {
        match self.events.lock() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::warn!("priority queue lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  PriorityBus
// ═══════════════════════════════════════════════════════════════

/// Three bounded queues (`Realtime`, `Transactional`, `Batch`).
///
/// `push` never blocks: a full queue rejects the event. `pop` blocks up to
/// a timeout. There is no fairness across queues; each one is meant to
/// have its own consumer.
pub struct PriorityBus {
    queues: [BoundedQueue; 3],
    router: QueueRouter,
}

impl Default for PriorityBus {
    fn default() -> Self {
        Self::new(QueueRouter::default())
    }
}

impl PriorityBus {
    pub fn new(router: QueueRouter) -> Self {
        Self::with_capacities(
            router,
            QueueId::ALL.map(QueueId::default_capacity),
        )
    }

    /// Capacities in `QueueId::ALL` order.
    pub fn with_capacities(router: QueueRouter, capacities: [usize; 3]) -> Self {
        Self {
            queues: capacities.map(BoundedQueue::new),
            router,
        }
    }

    pub fn router(&self) -> &QueueRouter {
        &self.router
    }

    pub fn capacity(&self, queue: QueueId) -> usize {
        self.queues[queue.index()].capacity
    }

    pub fn push(&self, queue: QueueId, event: Event) -> Result<(), QueueFull> {
        let q = &self.queues[queue.index()];
        {
            let mut events = q.lock();
            if events.len() >= q.capacity {
                return Err(QueueFull {
                    queue,
                    capacity: q.capacity,
                    event,
                });
            }
            events.push_back(event);
        }
        q.not_empty.notify_one();
        Ok(())
    }

    /// Wait up to `timeout` for an event. `None` on timeout.
    pub fn pop(&self, queue: QueueId, timeout: Duration) -> Option<Event> {
        let q = &self.queues[queue.index()];
        let events = q.lock();
        let (mut events, _) = match q.not_empty.wait_timeout_while(events, timeout, |ev| ev.is_empty()) {
            Ok(r) => r,
            Err(poisoned) => poisoned.into_inner(),
        };
        events.pop_front()
    }

    /// Pop without waiting.
    pub fn try_pop(&self, queue: QueueId) -> Option<Event> {
        self.queues[queue.index()].lock().pop_front()
    }

    pub fn size(&self, queue: QueueId) -> usize {
        self.queues[queue.index()].lock().len()
    }
}

impl EventPublisher for PriorityBus {
    fn publish(&self, event: Event) -> Result<(), StreamError> {
        let queue = self.router.resolve(event.topic());
        self.push(queue, event).map_err(|full| {
            StreamError::backpressure(format!(
                "{full}, dropped event {} (topic '{}')",
                full.event.id(),
                full.event.topic()
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::Route;
    use std::sync::Arc;
    use std::time::Instant;
    use stream_api::{ErrorKind, EventFactory, EventSequence, Metadata, PayloadAllocator, SourceType};

    fn event(f: &EventFactory, topic: &str) -> Event {
        f.create(SourceType::Internal, topic, b"x", Metadata::new()).unwrap()
    }

    fn factory() -> EventFactory {
        EventFactory::new(Arc::new(EventSequence::new()), PayloadAllocator::heap())
    }

    #[test]
    fn test_default_capacities() {
        let bus = PriorityBus::default();
        assert_eq!(bus.capacity(QueueId::Realtime), 16384);
        assert_eq!(bus.capacity(QueueId::Transactional), 8192);
        assert_eq!(bus.capacity(QueueId::Batch), 2048);
    }

    #[test]
    fn test_push_beyond_capacity_fails_without_blocking() {
        let bus = PriorityBus::with_capacities(QueueRouter::default(), [2, 2, 2]);
        let f = factory();
        bus.push(QueueId::Batch, event(&f, "a")).unwrap();
        bus.push(QueueId::Batch, event(&f, "b")).unwrap();

        let started = Instant::now();
        let err = bus.push(QueueId::Batch, event(&f, "c")).unwrap_err();
        assert!(started.elapsed() < Duration::from_millis(50));
        assert_eq!(err.queue, QueueId::Batch);
        assert_eq!(err.event.topic(), "c");
        assert_eq!(bus.size(QueueId::Batch), 2);

        // other queues unaffected
        bus.push(QueueId::Realtime, event(&f, "d")).unwrap();
        assert_eq!(bus.size(QueueId::Realtime), 1);
    }

    #[test]
    fn test_pop_empty_times_out() {
        let bus = PriorityBus::default();
        let started = Instant::now();
        assert!(bus.pop(QueueId::Realtime, Duration::from_millis(100)).is_none());
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(95), "returned too early: {elapsed:?}");
        assert!(elapsed < Duration::from_millis(1000), "returned too late: {elapsed:?}");
    }

    #[test]
    fn test_pop_is_fifo_per_queue() {
        let bus = PriorityBus::default();
        let f = factory();
        for t in ["a", "b", "c"] {
            bus.push(QueueId::Transactional, event(&f, t)).unwrap();
        }
        let order: Vec<String> = (0..3)
            .map(|_| bus.pop(QueueId::Transactional, Duration::from_millis(10)).unwrap().topic().to_string())
            .collect();
        assert_eq!(order, ["a", "b", "c"]);
        assert!(bus.try_pop(QueueId::Transactional).is_none());
    }

    #[test]
    fn test_pop_wakes_on_push() {
        let bus = Arc::new(PriorityBus::default());
        let consumer = {
            let bus = bus.clone();
            std::thread::spawn(move || bus.pop(QueueId::Realtime, Duration::from_secs(5)))
        };
        std::thread::sleep(Duration::from_millis(20));
        bus.push(QueueId::Realtime, event(&factory(), "wake")).unwrap();
        let got = consumer.join().unwrap().unwrap();
        assert_eq!(got.topic(), "wake");
    }

    #[test]
    fn test_publish_routes_and_reports_backpressure() {
        let router = QueueRouter::new(vec![Route {
            prefix: "tx/".into(),
            queue: QueueId::Transactional,
        }]);
        let bus = PriorityBus::with_capacities(router, [4, 1, 4]);
        let f = factory();

        bus.publish(event(&f, "tx/payment")).unwrap();
        bus.publish(event(&f, "sensor/1")).unwrap();
        assert_eq!(bus.size(QueueId::Transactional), 1);
        assert_eq!(bus.size(QueueId::Realtime), 1);

        let err = bus.publish(event(&f, "tx/refund")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Backpressure);
    }
}
