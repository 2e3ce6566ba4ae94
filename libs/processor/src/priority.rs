use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use event_bus::{PriorityBus, QueueId};
use stream_api::{EventStore, StreamError};
use worker_pool::WorkerPool;

use crate::sink::{ProcessorStats, StoreSink};

/// How long one `pop` waits before re-checking the stop flag.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Consumer for exactly one queue of a [`PriorityBus`]. Run one instance per
/// queue that should be drained.
pub struct PriorityProcessor {
    bus: Arc<PriorityBus>,
    queue: QueueId,
    running: Arc<AtomicBool>,
    sink: StoreSink,
    consumer: Option<JoinHandle<()>>,
}

impl PriorityProcessor {
    pub fn new(
        bus: Arc<PriorityBus>,
        queue: QueueId,
        store: Arc<dyn EventStore>,
        pool: Option<Arc<WorkerPool>>,
    ) -> Self {
        Self {
            bus,
            queue,
            running: Arc::new(AtomicBool::new(false)),
            sink: StoreSink::new(store, pool),
            consumer: None,
        }
    }

    pub fn queue(&self) -> QueueId {
        self.queue
    }

    pub fn start(&mut self) -> Result<(), StreamError> {
        if self.consumer.is_some() {
            return Err(StreamError::new(format!("{} processor already started", self.queue)));
        }
        self.running.store(true, Ordering::Release);

        let bus = self.bus.clone();
        let queue = self.queue;
        let running = self.running.clone();
        let sink = self.sink.clone();
        let handle = std::thread::Builder::new()
            .name(format!("processor-{queue}"))
            .spawn(move || {
                while running.load(Ordering::Acquire) {
                    if let Some(event) = bus.pop(queue, POLL_INTERVAL) {
                        sink.dispatch(event);
                    }
                }
                tracing::info!(queue = %queue, "priority processor stopped");
            })
            .map_err(|e| {
                self.running.store(false, Ordering::Release);
                StreamError::from(e).with_context("spawn processor thread")
            })?;
        self.consumer = Some(handle);
        tracing::info!(queue = %self.queue, "priority processor started");
        Ok(())
    }

    /// Observed by the consumer within one poll interval. Events still in the
    /// bus queue stay there.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.consumer.take() {
            if handle.join().is_err() {
                tracing::error!(queue = %self.queue, "priority processor thread panicked");
            }
        }
    }

    pub fn stats(&self) -> &ProcessorStats {
        self.sink.stats()
    }
}

impl Drop for PriorityProcessor {
    fn drop(&mut self) {
        self.stop();
    }
}
