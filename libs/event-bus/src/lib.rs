pub mod error;
mod priority;
mod router;

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use stream_api::{Event, EventPublisher, StreamError};

pub use error::QueueFull;
pub use priority::{PriorityBus, QueueId};
pub use router::{QueueRouter, Route};

/// Subscriber callback. Runs on the publisher's thread, so it must be fast.
pub type EventHandler = Arc<dyn Fn(&Event) -> Result<(), StreamError> + Send + Sync>;

// ═══════════════════════════════════════════════════════════════
//  EventBus — synchronous fan-out
// ═══════════════════════════════════════════════════════════════

/// Publish/subscribe hub that invokes every handler on the calling thread.
///
/// `publish` snapshots the handler list under the lock and releases it
/// before dispatch, so a slow handler never blocks `subscribe`. Handlers
/// added concurrently with a publish may or may not see it.
#[derive(Default)]
pub struct EventBus {
    handlers: RwLock<Vec<EventHandler>>,
    handler_failures: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, handler: F)
    where
        F: Fn(&Event) -> Result<(), StreamError> + Send + Sync + 'static,
    {
        let mut guard = match self.handlers.write() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::warn!("event bus write lock was poisoned, recovering");
                poisoned.into_inner()
            }
        };
        guard.push(Arc::new(handler));
    }

    pub fn subscriber_count(&self) -> usize {
        self.snapshot().len()
    }

    /// Total handler failures since creation.
    pub fn handler_failures(&self) -> u64 {
        self.handler_failures.load(Ordering::Relaxed)
    }

    /// Deliver `event` to every handler in registration order.
    ///
    /// A failing or panicking handler is logged and skipped; the rest still
    /// run and nothing propagates to the publisher. Returns the number of
    /// handlers that failed.
    pub fn publish_event(&self, event: &Event) -> usize {
        let handlers = self.snapshot();
        let mut failed = 0;

        for (index, handler) in handlers.iter().enumerate() {
            match catch_unwind(AssertUnwindSafe(|| handler(event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    failed += 1;
                    tracing::warn!(event_id = event.id(), handler = index, error = ?e, "subscriber failed");
                }
                Err(_) => {
                    failed += 1;
                    tracing::error!(event_id = event.id(), handler = index, "subscriber panicked");
                }
            }
        }

        if failed > 0 {
            self.handler_failures.fetch_add(failed as u64, Ordering::Relaxed);
        }
        failed
    }

    fn snapshot(&self) -> Vec<EventHandler> {
        let guard = match self.handlers.read() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::warn!("event bus read lock was poisoned, recovering");
                poisoned.into_inner()
            }
        };
        guard.clone()
    }
}

impl EventPublisher for EventBus {
    fn publish(&self, event: Event) -> Result<(), StreamError> {
        self.publish_event(&event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use stream_api::{EventFactory, EventSequence, Metadata, PayloadAllocator, SourceType};

    fn factory() -> EventFactory {
        EventFactory::new(Arc::new(EventSequence::new()), PayloadAllocator::heap())
    }

    fn recorder(bus: &EventBus) -> Arc<Mutex<Vec<u32>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        bus.subscribe(move |ev| {
            sink.lock().unwrap().push(ev.id());
            Ok(())
        });
        seen
    }

    #[test]
    fn test_every_subscriber_sees_every_event_in_order() {
        let bus = EventBus::new();
        let a = recorder(&bus);
        bus.subscribe(|_| Err(StreamError::new("always fails")));
        bus.subscribe(|_| panic!("handler bug"));
        let b = recorder(&bus);

        let f = factory();
        let mut published = Vec::new();
        for i in 0..50 {
            let ev = f
                .create(SourceType::Internal, format!("t{i}"), &[i as u8], Metadata::new())
                .unwrap();
            published.push(ev.id());
            bus.publish(ev).unwrap();
        }

        assert_eq!(*a.lock().unwrap(), published);
        assert_eq!(*b.lock().unwrap(), published);
        assert_eq!(bus.handler_failures(), 100);
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::new();
        let ev = factory().create(SourceType::Tcp, "t", b"x", Metadata::new()).unwrap();
        assert_eq!(bus.publish_event(&ev), 0);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_handler_may_subscribe_during_publish() {
        let bus = Arc::new(EventBus::new());
        let inner = bus.clone();
        bus.subscribe(move |_| {
            inner.subscribe(|_| Ok(()));
            Ok(())
        });
        let ev = factory().create(SourceType::Tcp, "t", b"x", Metadata::new()).unwrap();
        bus.publish_event(&ev);
        assert_eq!(bus.subscriber_count(), 2);
    }
}
