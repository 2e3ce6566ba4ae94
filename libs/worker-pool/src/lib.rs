use std::collections::VecDeque;
use std::io;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;

use stream_api::StreamError;

pub type Task = Box<dyn FnOnce() + Send + 'static>;

// ═══════════════════════════════════════════════════════════════
//  Shared state
// ═══════════════════════════════════════════════════════════════

struct Shared {
    tasks: Mutex<VecDeque<Task>>,
    available: Condvar,
    running: AtomicBool,
    drain_before_stop: bool,
}

impl Shared {
    fn lock_tasks(&self) -> MutexGuard<'_, VecDeque<Task>> {
        match self.tasks.lock() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::warn!("worker pool queue lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Clear `running` and wake every worker.
    fn stop(&self) {
        {
            // flip under the queue lock so no submit slips in after the check
            let _tasks = self.lock_tasks();
            self.running.store(false, Ordering::Release);
        }
        self.available.notify_all();
    }

    /// Block until a task is available or the pool is stopping.
    /// `None` tells the worker to exit.
    fn next_task(&self) -> Option<Task> {
        let mut tasks = self.lock_tasks();
        loop {
            let running = self.running.load(Ordering::Acquire);
            if !running && (!self.drain_before_stop || tasks.is_empty()) {
                return None;
            }
            if let Some(task) = tasks.pop_front() {
                return Some(task);
            }
            tasks = match self.available.wait(tasks) {
                Ok(g) => g,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  WorkerPool
// ═══════════════════════════════════════════════════════════════

/// Fixed set of long-lived threads draining one unbounded task queue.
///
/// With `drain_before_stop` the workers finish every queued task before
/// `shutdown` returns; without it, tasks still queued at shutdown are
/// discarded.
pub struct WorkerPool {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new(threads: usize, drain_before_stop: bool) -> Result<Self, StreamError> {
        if threads == 0 {
            return Err(StreamError::config("worker pool needs at least one thread"));
        }

        Self::with_spawner(threads, drain_before_stop, spawn_worker)
    }

    fn with_spawner<S>(threads: usize, drain_before_stop: bool, mut spawn: S) -> Result<Self, StreamError>
    where
        S: FnMut(usize, Arc<Shared>) -> io::Result<JoinHandle<()>>,
    {
        let shared = Arc::new(Shared {
            tasks: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
            running: AtomicBool::new(true),
            drain_before_stop,
        });

        let mut workers = Vec::with_capacity(threads);
        for i in 0..threads {
            match spawn(i, shared.clone()) {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    // уже запущенные воркеры не должны пережить ошибку
                    shared.stop();
                    for handle in workers {
                        let _ = handle.join();
                    }
                    tracing::error!(worker = i, error = %e, "worker spawn failed, pool not started");
                    return Err(StreamError::io(format!("spawn worker-{i}: {e}")));
                }
            }
        }
        tracing::info!(threads, drain_before_stop, "worker pool started");

        Ok(Self {
            shared,
            workers: Mutex::new(workers),
        })
    }

    /// Enqueue a task and wake one worker. Rejected once shutdown began.
    pub fn submit<F>(&self, task: F) -> Result<(), StreamError>
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let mut tasks = self.shared.lock_tasks();
            if !self.shared.running.load(Ordering::Acquire) {
                return Err(StreamError::new("worker pool is shut down"));
            }
            tasks.push_back(Box::new(task));
        }
        self.shared.available.notify_one();
        Ok(())
    }

    pub fn queued(&self) -> usize {
        self.shared.lock_tasks().len()
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Stop the workers and join them. Idempotent.
    pub fn shutdown(&self) {
        self.shared.stop();

        let workers = {
            let mut guard = match self.workers.lock() {
                Ok(g) => g,
                Err(poisoned) => poisoned.into_inner(),
            };
            std::mem::take(&mut *guard)
        };
        if workers.is_empty() {
            return;
        }
        for handle in workers {
            if handle.join().is_err() {
                tracing::error!("worker thread panicked outside a task");
            }
        }

        let discarded = {
            let mut tasks = self.shared.lock_tasks();
            let n = tasks.len();
            tasks.clear();
            n
        };
        if discarded > 0 {
            tracing::warn!(discarded, "worker pool stopped with queued tasks, discarded");
        }
        tracing::info!("worker pool stopped");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn spawn_worker(index: usize, shared: Arc<Shared>) -> io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name(format!("worker-{index}"))
        .spawn(move || worker_loop(index, &shared))
}

fn worker_loop(index: usize, shared: &Shared) {
    while let Some(task) = shared.next_task() {
        if catch_unwind(AssertUnwindSafe(task)).is_err() {
            tracing::error!(worker = index, "task panicked");
        }
    }
    tracing::debug!(worker = index, "worker exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn test_zero_threads_rejected() {
        assert!(WorkerPool::new(0, true).is_err());
    }

    #[test]
    fn test_runs_submitted_tasks() {
        let pool = WorkerPool::new(4, true).unwrap();
        let (tx, rx) = mpsc::channel();
        for i in 0..100 {
            let tx = tx.clone();
            pool.submit(move || tx.send(i).unwrap()).unwrap();
        }
        let mut got: Vec<i32> = (0..100)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        got.sort_unstable();
        assert_eq!(got, (0..100).collect::<Vec<_>>());
        pool.shutdown();
    }

    #[test]
    fn test_drain_before_stop_runs_everything() {
        let pool = WorkerPool::new(1, true).unwrap();
        let done = Arc::new(AtomicUsize::new(0));
        let (gate_tx, gate_rx) = mpsc::channel::<()>();

        // first task blocks the only worker until released
        pool.submit(move || {
            let _ = gate_rx.recv_timeout(Duration::from_secs(5));
        })
        .unwrap();
        for _ in 0..10 {
            let done = done.clone();
            pool.submit(move || {
                done.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }

        let releaser = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            gate_tx.send(()).unwrap();
        });
        pool.shutdown();
        releaser.join().unwrap();
        assert_eq!(done.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn test_shutdown_without_drain_discards_queued() {
        let pool = WorkerPool::new(1, false).unwrap();
        let done = Arc::new(AtomicUsize::new(0));
        let (started_tx, started_rx) = mpsc::channel::<()>();
        let (gate_tx, gate_rx) = mpsc::channel::<()>();

        pool.submit(move || {
            started_tx.send(()).unwrap();
            let _ = gate_rx.recv_timeout(Duration::from_secs(5));
        })
        .unwrap();
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        for _ in 0..10 {
            let done = done.clone();
            pool.submit(move || {
                done.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }
        assert_eq!(pool.queued(), 10);

        let releaser = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            gate_tx.send(()).unwrap();
        });
        pool.shutdown();
        releaser.join().unwrap();

        assert_eq!(done.load(Ordering::SeqCst), 0);
        assert_eq!(pool.queued(), 0);
    }

    #[test]
    fn test_submit_after_shutdown_rejected() {
        let pool = WorkerPool::new(2, true).unwrap();
        pool.shutdown();
        assert!(!pool.is_running());
        assert!(pool.submit(|| {}).is_err());
        // second shutdown is a no-op
        pool.shutdown();
    }

    #[test]
    fn test_panicking_task_does_not_kill_worker() {
        let pool = WorkerPool::new(1, true).unwrap();
        pool.submit(|| panic!("boom")).unwrap();
        let (tx, rx) = mpsc::channel();
        pool.submit(move || tx.send(42).unwrap()).unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 42);
    }

    #[test]
    fn test_spawn_failure_stops_started_workers() {
        let mut first = None;
        let result = WorkerPool::with_spawner(4, true, |i, shared| {
            if i == 2 {
                return Err(io::Error::other("thread limit reached"));
            }
            first.get_or_insert_with(|| Arc::downgrade(&shared));
            spawn_worker(i, shared)
        });

        let err = result.err().unwrap();
        assert_eq!(err.kind(), stream_api::ErrorKind::Io);
        // both started workers were joined and released their handle
        assert!(first.unwrap().upgrade().is_none());
    }
}
