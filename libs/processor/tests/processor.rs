use std::sync::Arc;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use event_bus::{EventBus, PriorityBus, QueueId, QueueRouter, Route};
use event_store::LogStorage;
use processor::{PriorityProcessor, QueueProcessor};
use stream_api::{
    ErrorKind, Event, EventFactory, EventPublisher, EventSequence, EventStore, Metadata, PayloadAllocator,
    SourceType, StreamError,
};
use tempfile::TempDir;
use worker_pool::WorkerPool;

fn factory() -> EventFactory {
    EventFactory::new(Arc::new(EventSequence::new()), PayloadAllocator::heap())
}

fn event(f: &EventFactory, topic: &str, payload: &[u8]) -> Event {
    f.create(SourceType::Internal, topic, payload, Metadata::new()).unwrap()
}

fn wait_until(timeout: Duration, cond: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    cond()
}

/// Keeps events in memory; fails every event whose id is divisible by
/// `fail_every` (0 = never fails).
#[derive(Default)]
struct MemoryStore {
    events: Mutex<Vec<Event>>,
    fail_every: u32,
}

impl MemoryStore {
    fn ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.events.lock().unwrap().iter().map(|e| e.id()).collect();
        ids.sort_unstable();
        ids
    }
}

impl EventStore for MemoryStore {
    fn store(&self, event: &Event) -> Result<(), StreamError> {
        if self.fail_every > 0 && event.id() % self.fail_every == 0 {
            return Err(StreamError::io("disk full"));
        }
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }

    fn retrieve(&self, id: u32) -> Result<Option<Event>, StreamError> {
        Ok(self.events.lock().unwrap().iter().find(|e| e.id() == id).cloned())
    }
}

// ═══════════════════════════════════════════════════════════════
//  QueueProcessor
// ═══════════════════════════════════════════════════════════════

#[test]
fn test_every_enqueued_event_is_stored_after_stop() {
    let dir = TempDir::new().unwrap();
    let storage = Arc::new(LogStorage::open(dir.path().join("events.log")).unwrap());
    let pool = Arc::new(WorkerPool::new(4, true).unwrap());
    let bus = Arc::new(EventBus::new());
    let f = factory();

    let mut processor = QueueProcessor::new(bus.clone(), storage.clone(), Some(pool.clone()));
    processor.init();
    processor.start().unwrap();

    let mut ids = Vec::new();
    for i in 0..500u32 {
        let ev = event(&f, "sensor", &i.to_be_bytes());
        ids.push(ev.id());
        bus.publish(ev).unwrap();
    }

    // processor first, then the pool
    processor.stop();
    assert_eq!(processor.pending(), 0);
    pool.shutdown();

    for (i, id) in ids.iter().enumerate() {
        let ev = storage.retrieve(*id).unwrap().expect("stored");
        assert_eq!(ev.body(), &(i as u32).to_be_bytes());
    }
    assert_eq!(processor.stats().stored(), 500);
}

#[test]
fn test_queued_before_start_is_drained_on_stop() {
    let store = Arc::new(MemoryStore::default());
    let bus = Arc::new(EventBus::new());
    let f = factory();

    let mut processor = QueueProcessor::new(bus.clone(), store.clone(), None);
    processor.init();
    for _ in 0..10 {
        bus.publish(event(&f, "t", b"x")).unwrap();
    }
    assert_eq!(processor.pending(), 10);

    processor.stop();
    assert_eq!(processor.pending(), 0);
    assert_eq!(store.ids(), (1..=10).collect::<Vec<_>>());
}

#[test]
fn test_publish_after_stop_is_rejected() {
    let store = Arc::new(MemoryStore::default());
    let bus = Arc::new(EventBus::new());
    let f = factory();

    let mut processor = QueueProcessor::new(bus.clone(), store.clone(), None);
    processor.start().unwrap();
    bus.publish(event(&f, "t", b"x")).unwrap();
    processor.stop();
    assert_eq!(bus.handler_failures(), 0);

    assert_eq!(bus.publish_event(&event(&f, "t", b"late")), 1);
    assert_eq!(bus.handler_failures(), 1);
    assert_eq!(processor.pending(), 0);
    assert_eq!(store.ids(), vec![1]);
}

#[test]
fn test_init_is_idempotent() {
    let store = Arc::new(MemoryStore::default());
    let bus = Arc::new(EventBus::new());
    let mut processor = QueueProcessor::new(bus.clone(), store, None);
    processor.init();
    processor.init();
    processor.start().unwrap();
    assert_eq!(bus.subscriber_count(), 1);
    assert!(processor.start().is_err());
    processor.stop();
}

#[test]
fn test_store_failure_does_not_stop_consumer() {
    let store = Arc::new(MemoryStore { fail_every: 3, ..Default::default() });
    let bus = Arc::new(EventBus::new());
    let f = factory();

    let mut processor = QueueProcessor::new(bus.clone(), store.clone(), None);
    processor.start().unwrap();
    for _ in 0..9 {
        bus.publish(event(&f, "t", b"x")).unwrap();
    }
    assert!(wait_until(Duration::from_secs(5), || processor.stats().stored() + processor.stats().failed() == 9));
    processor.stop();

    assert_eq!(store.ids(), vec![1, 2, 4, 5, 7, 8]);
    assert_eq!(processor.stats().failed(), 3);
}

#[test]
fn test_pool_shut_down_falls_back_to_inline_store() {
    let store = Arc::new(MemoryStore::default());
    let pool = Arc::new(WorkerPool::new(1, true).unwrap());
    pool.shutdown();
    let bus = Arc::new(EventBus::new());
    let f = factory();

    let mut processor = QueueProcessor::new(bus.clone(), store.clone(), Some(pool));
    processor.start().unwrap();
    bus.publish(event(&f, "t", b"x")).unwrap();
    assert!(wait_until(Duration::from_secs(5), || store.ids().len() == 1));
    processor.stop();
}

#[test]
fn test_drop_stops_and_drains() {
    let store = Arc::new(MemoryStore::default());
    let bus = Arc::new(EventBus::new());
    let f = factory();
    {
        let mut processor = QueueProcessor::new(bus.clone(), store.clone(), None);
        processor.init();
        bus.publish(event(&f, "t", b"x")).unwrap();
    }
    assert_eq!(store.ids(), vec![1]);
}

// ═══════════════════════════════════════════════════════════════
//  PriorityProcessor
// ═══════════════════════════════════════════════════════════════

#[test]
fn test_priority_processor_stores_its_queue_only() {
    let store = Arc::new(MemoryStore::default());
    let router = QueueRouter::new(vec![Route { prefix: "bulk/".into(), queue: QueueId::Batch }]);
    let bus = Arc::new(PriorityBus::new(router));
    let f = factory();

    let mut realtime = PriorityProcessor::new(bus.clone(), QueueId::Realtime, store.clone(), None);
    realtime.start().unwrap();

    for _ in 0..20 {
        bus.publish(event(&f, "tick", b"x")).unwrap();
    }
    bus.publish(event(&f, "bulk/import", b"y")).unwrap();

    assert!(wait_until(Duration::from_secs(5), || realtime.stats().stored() == 20));
    realtime.stop();

    assert_eq!(store.ids(), (1..=20).collect::<Vec<_>>());
    assert_eq!(bus.size(QueueId::Batch), 1);
    assert_eq!(bus.size(QueueId::Realtime), 0);
}

#[test]
fn test_priority_processor_per_queue_with_pool() {
    let dir = TempDir::new().unwrap();
    let storage = Arc::new(LogStorage::open(dir.path().join("events.log")).unwrap());
    let pool = Arc::new(WorkerPool::new(2, true).unwrap());
    let router = QueueRouter::new(vec![
        Route { prefix: "tx/".into(), queue: QueueId::Transactional },
        Route { prefix: "bulk/".into(), queue: QueueId::Batch },
    ]);
    let bus = Arc::new(PriorityBus::new(router));
    let f = factory();

    let mut processors: Vec<PriorityProcessor> = QueueId::ALL
        .iter()
        .map(|q| PriorityProcessor::new(bus.clone(), *q, storage.clone(), Some(pool.clone())))
        .collect();
    for p in &mut processors {
        p.start().unwrap();
    }

    let mut ids = Vec::new();
    for topic in ["tick", "tx/pay", "bulk/load"] {
        let ev = event(&f, topic, topic.as_bytes());
        ids.push(ev.id());
        bus.publish(ev).unwrap();
    }

    assert!(wait_until(Duration::from_secs(5), || {
        processors.iter().map(|p| p.stats().stored()).sum::<u64>() == 3
    }));
    for p in &mut processors {
        p.stop();
    }
    pool.shutdown();

    for id in ids {
        assert!(storage.retrieve(id).unwrap().is_some());
    }
}

#[test]
fn test_priority_stop_is_bounded() {
    let store = Arc::new(MemoryStore::default());
    let bus = Arc::new(PriorityBus::default());
    let mut processor = PriorityProcessor::new(bus, QueueId::Realtime, store, None);
    processor.start().unwrap();

    let started = Instant::now();
    processor.stop();
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[test]
fn test_backpressure_reaches_publisher() {
    let bus = PriorityBus::with_capacities(QueueRouter::default(), [1, 1, 1]);
    let f = factory();
    bus.publish(event(&f, "a", b"")).unwrap();
    let err = bus.publish(event(&f, "b", b"")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Backpressure);
}
