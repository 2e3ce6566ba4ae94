use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use stream_api::{Event, EventStore};
use worker_pool::WorkerPool;

#[derive(Debug, Default)]
pub struct ProcessorStats {
    stored: AtomicU64,
    failed: AtomicU64,
}

impl ProcessorStats {
    pub fn stored(&self) -> u64 {
        self.stored.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

/// Where processed events end up: the store, optionally via the worker pool.
#[derive(Clone)]
pub(crate) struct StoreSink {
    store: Arc<dyn EventStore>,
    pool: Option<Arc<WorkerPool>>,
    stats: Arc<ProcessorStats>,
}

impl StoreSink {
    pub fn new(store: Arc<dyn EventStore>, pool: Option<Arc<WorkerPool>>) -> Self {
        Self { store, pool, stats: Arc::new(ProcessorStats::default()) }
    }

    pub fn stats(&self) -> &ProcessorStats {
        &self.stats
    }

    /// Hand the event to the pool, or store it here if there is no pool or
    /// the pool no longer accepts work.
    pub fn dispatch(&self, event: Event) {
        let Some(pool) = &self.pool else {
            self.store_now(&event);
            return;
        };

        let store = self.store.clone();
        let stats = self.stats.clone();
        let event = Arc::new(event);
        let task_event = event.clone();
        let submitted = pool.submit(move || persist(&*store, &stats, &task_event));
        if let Err(e) = submitted {
            tracing::warn!(event_id = event.id(), error = %e, "worker pool rejected task, storing inline");
            self.store_now(&event);
        }
    }

    pub fn store_now(&self, event: &Event) {
        persist(&*self.store, &self.stats, event);
    }
}

fn persist(store: &dyn EventStore, stats: &ProcessorStats, event: &Event) {
    match store.store(event) {
        Ok(()) => {
            stats.stored.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(event_id = event.id(), topic = %event.topic(), "event stored");
        }
        Err(e) => {
            stats.failed.fetch_add(1, Ordering::Relaxed);
            tracing::error!(event_id = event.id(), topic = %event.topic(), error = %e, "store failed, event dropped");
        }
    }
}
