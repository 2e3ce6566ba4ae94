use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use block_pool::PayloadAllocator;

use crate::error::StreamError;
use crate::event::{Event, EventHeader, Metadata, SourceType};
use crate::util::now_ms;

// ════════════════════════════════════════════════════════════════
//  EventSequence
// ════════════════════════════════════════════════════════════════

/// Monotonic event id generator. Starts at 1, never reset, never reused.
///
/// Ids are `u32`; the counter is wider so that `u32::MAX` itself can be
/// issued and exhaustion is detectable instead of wrapping to 0.
#[derive(Debug)]
pub struct EventSequence {
    next: AtomicU64,
}

impl Default for EventSequence {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSequence {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    /// Sequence whose first id is `first`.
    pub fn starting_at(first: u32) -> Self {
        Self { next: AtomicU64::new(first as u64) }
    }

    /// Process-wide sequence shared by every factory that does not inject
    /// its own.
    pub fn global() -> Arc<EventSequence> {
        static GLOBAL: OnceLock<Arc<EventSequence>> = OnceLock::new();
        GLOBAL.get_or_init(|| Arc::new(EventSequence::new())).clone()
    }

    /// `None` once every `u32` id has been issued.
    pub fn next_id(&self) -> Option<u32> {
        self.next
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                (n <= u32::MAX as u64).then_some(n + 1)
            })
            .ok()
            .map(|id| id as u32)
    }
}

// ════════════════════════════════════════════════════════════════
//  EventFactory
// ════════════════════════════════════════════════════════════════

/// Stamps new events with id, timestamp and lengths; copies the payload
/// into a buffer from the attached allocator.
#[derive(Debug, Clone)]
pub struct EventFactory {
    sequence: Arc<EventSequence>,
    allocator: PayloadAllocator,
}

impl Default for EventFactory {
    fn default() -> Self {
        Self::new(EventSequence::global(), PayloadAllocator::heap())
    }
}

impl EventFactory {
    pub fn new(sequence: Arc<EventSequence>, allocator: PayloadAllocator) -> Self {
        Self { sequence, allocator }
    }

    pub fn allocator(&self) -> &PayloadAllocator {
        &self.allocator
    }

    pub fn create(
        &self,
        source_type: SourceType,
        topic: impl Into<String>,
        payload: &[u8],
        metadata: Metadata,
    ) -> Result<Event, StreamError> {
        let id = self
            .sequence
            .next_id()
            .ok_or_else(|| StreamError::new("event id sequence exhausted"))?;
        let header = EventHeader {
            source_type,
            id,
            timestamp: now_ms(),
            body_len: 0,
            topic_len: 0,
            checksum: 0,
        };
        let body = self.allocator.copy_from(payload);
        Event::from_parts(header, topic.into(), body, metadata)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use block_pool::BlockPool;

    #[test]
    fn test_create_event() {
        let factory = EventFactory::new(Arc::new(EventSequence::new()), PayloadAllocator::heap());
        let mut metadata = Metadata::new();
        metadata.insert("key1".into(), "value1".into());
        metadata.insert("routing_key".into(), "route1".into());

        let ev = factory
            .create(SourceType::Udp, "topic1", &[0x01, 0x02, 0x03], metadata.clone())
            .unwrap();

        assert_eq!(ev.source_type(), SourceType::Udp);
        assert_eq!(ev.id(), 1);
        assert_eq!(ev.topic(), "topic1");
        assert_eq!(ev.body(), &[0x01, 0x02, 0x03]);
        assert_eq!(ev.metadata(), &metadata);
        assert_eq!(ev.header().body_len, 3);
        assert_eq!(ev.header().topic_len, 6);
        assert_eq!(ev.header().checksum, 0);
        assert!(ev.timestamp() > 0);
    }

    #[test]
    fn test_ids_strictly_increase() {
        let factory = EventFactory::new(Arc::new(EventSequence::new()), PayloadAllocator::heap());
        let a = factory.create(SourceType::Internal, "a", b"", Metadata::new()).unwrap();
        let b = factory.create(SourceType::Internal, "b", b"", Metadata::new()).unwrap();
        assert!(b.id() > a.id());
    }

    #[test]
    fn test_ids_unique_across_threads() {
        let seq = Arc::new(EventSequence::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let factory = EventFactory::new(seq.clone(), PayloadAllocator::heap());
                std::thread::spawn(move || {
                    let mut ids = Vec::with_capacity(500);
                    let mut last = 0;
                    for _ in 0..500 {
                        let ev = factory.create(SourceType::Internal, "t", b"x", Metadata::new()).unwrap();
                        assert!(ev.id() > last);
                        last = ev.id();
                        ids.push(ev.id());
                    }
                    ids
                })
            })
            .collect();

        let mut all: Vec<u32> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), 8 * 500);
        assert_eq!(all.first(), Some(&1));
        assert_eq!(all.last(), Some(&4000));
    }

    #[test]
    fn test_global_sequence_is_shared() {
        let a = EventSequence::global();
        let b = EventSequence::global();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_body_served_from_pool() {
        let pool = Arc::new(BlockPool::new(64, 1));
        let factory = EventFactory::new(
            Arc::new(EventSequence::new()),
            PayloadAllocator::with_pool(pool.clone()),
        );
        let ev = factory.create(SourceType::Tcp, "t", b"payload", Metadata::new()).unwrap();
        assert!(ev.is_body_pooled());
        assert_eq!(pool.available(), 0);
        drop(ev);
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn test_sequence_exhaustion_is_an_error_not_a_wrap() {
        let factory = EventFactory::new(
            Arc::new(EventSequence::starting_at(u32::MAX - 1)),
            PayloadAllocator::heap(),
        );
        let a = factory.create(SourceType::Internal, "t", b"", Metadata::new()).unwrap();
        let b = factory.create(SourceType::Internal, "t", b"", Metadata::new()).unwrap();
        assert_eq!(a.id(), u32::MAX - 1);
        assert_eq!(b.id(), u32::MAX);

        for _ in 0..3 {
            let err = factory.create(SourceType::Internal, "t", b"", Metadata::new()).unwrap_err();
            assert_eq!(err.kind(), crate::error::ErrorKind::Logic);
        }
    }
}
