use std::sync::Arc;

use event_bus::{EventBus, PriorityBus, QueueId, QueueRouter};
use event_store::LogStorage;
use ingest::{IngestConfig, TcpIngestServer};
use processor::{PriorityProcessor, QueueProcessor};
use stream_api::{BlockPool, EventFactory, EventPublisher, EventSequence, EventStore, PayloadAllocator};
use worker_pool::WorkerPool;

use crate::config::{BusMode, ServeArgs, ServerConfig};
use crate::error::ServerError;

enum Processors {
    Sync(QueueProcessor),
    Priority(Vec<PriorityProcessor>),
}

/// All long-lived components, in dependency order.
struct Pipeline {
    ingest: TcpIngestServer,
    processors: Processors,
    pool: Arc<WorkerPool>,
}

impl Pipeline {
    fn build(config: &ServerConfig) -> Result<Self, ServerError> {
        // --- Payload allocator ---
        let allocator = match &config.block_pool {
            Some(bp) => {
                tracing::info!(block_size = bp.block_size, block_count = bp.block_count, "block pool enabled");
                PayloadAllocator::with_pool(Arc::new(BlockPool::new(bp.block_size, bp.block_count)))
            }
            None => PayloadAllocator::heap(),
        };
        let factory = EventFactory::new(EventSequence::global(), allocator);

        // --- Storage + workers ---
        let store: Arc<dyn EventStore> = Arc::new(LogStorage::open(&config.storage.path)?);
        let pool = Arc::new(WorkerPool::new(config.worker_pool.threads, config.worker_pool.drain_before_stop)?);
        tracing::info!(
            threads = config.worker_pool.threads,
            drain_before_stop = config.worker_pool.drain_before_stop,
            "worker pool ready"
        );

        // --- Bus + processors ---
        let (publisher, processors): (Arc<dyn EventPublisher>, Processors) = match config.bus.mode {
            BusMode::Sync => {
                let bus = Arc::new(EventBus::new());
                let mut processor = QueueProcessor::new(bus.clone(), store, Some(pool.clone()));
                processor.init();
                let publisher: Arc<dyn EventPublisher> = bus;
                (publisher, Processors::Sync(processor))
            }
            BusMode::Priority => {
                let bus = Arc::new(PriorityBus::new(QueueRouter::new(config.bus.routes.clone())));
                let processors = QueueId::ALL
                    .iter()
                    .map(|q| PriorityProcessor::new(bus.clone(), *q, store.clone(), Some(pool.clone())))
                    .collect();
                let publisher: Arc<dyn EventPublisher> = bus;
                (publisher, Processors::Priority(processors))
            }
        };
        tracing::info!(mode = ?config.bus.mode, routes = config.bus.routes.len(), "event bus ready");

        // --- Ingest ---
        let ingest = TcpIngestServer::new(
            IngestConfig {
                host: config.ingest.host.clone(),
                port: config.ingest.port,
                max_connections: config.ingest.max_connections,
                max_frame_bytes: config.ingest.max_frame_bytes,
            },
            publisher,
            factory,
        );

        Ok(Self { ingest, processors, pool })
    }

    fn start(&mut self) -> Result<(), ServerError> {
        match &mut self.processors {
            Processors::Sync(p) => p.start()?,
            Processors::Priority(ps) => {
                for p in ps.iter_mut() {
                    p.start()?;
                }
            }
        }
        self.ingest.start()?;
        Ok(())
    }

    /// ingest → processors → worker pool.
    fn shutdown(mut self) {
        self.ingest.stop();
        match &mut self.processors {
            Processors::Sync(p) => p.stop(),
            Processors::Priority(ps) => ps.iter_mut().for_each(PriorityProcessor::stop),
        }
        self.pool.shutdown();
    }
}

pub async fn run(args: ServeArgs) -> Result<(), ServerError> {
    tracing::info!("evstream-server starting");

    // --- Load config ---
    let config = ServerConfig::load(&args.config)?;
    tracing::info!(config = %args.config, app = %config.app_name, version = %config.version, "loaded config");

    let mut pipeline = Pipeline::build(&config)?;
    pipeline.start()?;
    tracing::info!(
        host = %config.ingest.host,
        port = config.ingest.port,
        storage = %config.storage.path,
        "server ready"
    );

    // --- Ожидание Ctrl+C / SIGTERM ---
    wait_for_shutdown_signal().await?;
    tracing::info!("shutting down...");

    // stop() joins OS threads
    tokio::task::spawn_blocking(move || pipeline.shutdown()).await?;

    tracing::info!("shutdown complete");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() -> Result<(), ServerError> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        res = tokio::signal::ctrl_c() => res?,
        _ = terminate.recv() => tracing::info!("received SIGTERM"),
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() -> Result<(), ServerError> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}
