use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;

use event_bus::EventBus;
use stream_api::{Event, EventStore, StreamError};
use worker_pool::WorkerPool;

use crate::sink::{ProcessorStats, StoreSink};

struct Shared {
    queue: Mutex<VecDeque<Event>>,
    ready: Condvar,
    running: AtomicBool,
    /// Set by `stop`; the bus handler then rejects instead of queueing.
    stopped: AtomicBool,
    sink: StoreSink,
}

impl Shared {
    fn lock_queue(&self) -> MutexGuard<'_, VecDeque<Event>> {
        match self.queue.lock() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::warn!("processor queue lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Block until there is work or the processor is stopping; take
    /// everything queued. `None` once stopped and empty.
    fn next_batch(&self) -> Option<VecDeque<Event>> {
        let mut queue = self.lock_queue();
        while queue.is_empty() && self.running.load(Ordering::Acquire) {
            queue = match self.ready.wait(queue) {
                Ok(g) => g,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
        if queue.is_empty() {
            return None;
        }
        Some(std::mem::take(&mut *queue))
    }
}

/// Subscribes to the synchronous bus, buffers events in an unbounded FIFO
/// and drains it into storage on its own consumer thread.
pub struct QueueProcessor {
    bus: Arc<EventBus>,
    shared: Arc<Shared>,
    subscribed: bool,
    consumer: Option<JoinHandle<()>>,
}

impl QueueProcessor {
    pub fn new(bus: Arc<EventBus>, store: Arc<dyn EventStore>, pool: Option<Arc<WorkerPool>>) -> Self {
        let shared = Arc::new(Shared {
            queue: Mutex::new(VecDeque::new()),
            ready: Condvar::new(),
            running: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            sink: StoreSink::new(store, pool),
        });
        Self { bus, shared, subscribed: false, consumer: None }
    }

    /// Subscribe the enqueue handler to the bus. Idempotent.
    pub fn init(&mut self) {
        if self.subscribed {
            return;
        }
        let shared = self.shared.clone();
        self.bus.subscribe(move |event: &Event| -> Result<(), StreamError> {
            {
                let mut queue = shared.lock_queue();
                if shared.stopped.load(Ordering::Acquire) {
                    return Err(StreamError::new("queue processor stopped"));
                }
                queue.push_back(event.clone());
            }
            shared.ready.notify_one();
            Ok(())
        });
        self.subscribed = true;
    }

    /// Spawn the consumer thread.
    pub fn start(&mut self) -> Result<(), StreamError> {
        if self.consumer.is_some() {
            return Err(StreamError::new("queue processor already started"));
        }
        self.init();
        self.shared.stopped.store(false, Ordering::Release);
        self.shared.running.store(true, Ordering::Release);

        let shared = self.shared.clone();
        let handle = std::thread::Builder::new()
            .name("processor-queue".into())
            .spawn(move || consume(&shared))
            .map_err(|e| {
                self.shared.running.store(false, Ordering::Release);
                StreamError::from(e).with_context("spawn processor thread")
            })?;
        self.consumer = Some(handle);
        tracing::info!("queue processor started");
        Ok(())
    }

    /// Stop the consumer, then store whatever is still queued on the
    /// calling thread.
    ///
    /// The handler stays subscribed (the bus has no unsubscribe); events
    /// published after `stop` are rejected with a `Logic` error and show up
    /// in the bus failure count. Events published after `init` but before
    /// `start` are still queued.
    pub fn stop(&mut self) {
        {
            let _queue = self.shared.lock_queue();
            self.shared.running.store(false, Ordering::Release);
            self.shared.stopped.store(true, Ordering::Release);
        }
        self.shared.ready.notify_all();

        if let Some(handle) = self.consumer.take() {
            if handle.join().is_err() {
                tracing::error!("processor consumer thread panicked");
            }
        }

        let remaining = std::mem::take(&mut *self.shared.lock_queue());
        if !remaining.is_empty() {
            tracing::info!(count = remaining.len(), "draining queued events");
        }
        for event in &remaining {
            self.shared.sink.store_now(event);
        }
    }

    pub fn pending(&self) -> usize {
        self.shared.lock_queue().len()
    }

    pub fn stats(&self) -> &ProcessorStats {
        self.shared.sink.stats()
    }
}

impl Drop for QueueProcessor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn consume(shared: &Shared) {
    while let Some(batch) = shared.next_batch() {
        for event in batch {
            shared.sink.dispatch(event);
        }
    }
    tracing::info!("queue processor stopped");
}
