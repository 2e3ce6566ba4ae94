use clap::{Args, Parser, Subcommand};
use serde::Deserialize;

use event_bus::Route;
use framing::MAX_FRAME_BYTES;

use crate::error::ServerError;

#[derive(Parser)]
#[command(name = "evstream-server", about = "TCP event ingestion server")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Запустить сервер
    Serve(ServeArgs),
}

#[derive(Args, Clone, Debug)]
pub struct ServeArgs {
    /// Путь к TOML конфиг файлу
    #[arg(long, default_value = "config.toml", env = "CONFIG_PATH")]
    pub config: String,
}

// ---- TOML Config ----

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_app_name")]
    pub app_name: String,
    #[serde(default = "default_version")]
    pub version: String,
    pub ingest: IngestSection,
    pub storage: StorageSection,
    #[serde(default)]
    pub worker_pool: WorkerPoolSection,
    /// Нет секции — payload'ы аллоцируются в куче.
    #[serde(default)]
    pub block_pool: Option<BlockPoolSection>,
    #[serde(default)]
    pub bus: BusSection,
}

#[derive(Debug, Deserialize)]
pub struct IngestSection {
    #[serde(default = "default_host")]
    pub host: String,
    pub port: u16,
    /// 0 — без ограничения.
    #[serde(default)]
    pub max_connections: usize,
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: u32,
}

#[derive(Debug, Deserialize)]
pub struct StorageSection {
    pub path: String,
}

#[derive(Debug, Deserialize)]
pub struct WorkerPoolSection {
    #[serde(default = "default_threads")]
    pub threads: usize,
    #[serde(default = "default_true")]
    pub drain_before_stop: bool,
}

impl Default for WorkerPoolSection {
    fn default() -> Self {
        Self { threads: default_threads(), drain_before_stop: true }
    }
}

#[derive(Debug, Deserialize)]
pub struct BlockPoolSection {
    pub block_size: usize,
    pub block_count: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BusMode {
    #[default]
    Sync,
    Priority,
}

#[derive(Debug, Default, Deserialize)]
pub struct BusSection {
    #[serde(default)]
    pub mode: BusMode,
    /// Только для `mode = "priority"`.
    #[serde(default)]
    pub routes: Vec<Route>,
}

fn default_app_name() -> String {
    "evstream".into()
}
fn default_version() -> String {
    "1.0.0".into()
}
fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_max_frame_bytes() -> u32 {
    MAX_FRAME_BYTES
}
fn default_threads() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4)
}
fn default_true() -> bool {
    true
}

impl ServerConfig {
    pub fn load(path: &str) -> Result<Self, ServerError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ServerError::Config { context: "read", detail: format!("'{path}': {e}") })?;
        Self::parse(&content)
            .map_err(|e| match e {
                ServerError::Config { context, detail } => ServerError::Config {
                    context,
                    detail: format!("'{path}': {detail}"),
                },
                other => other,
            })
    }

    pub fn parse(content: &str) -> Result<Self, ServerError> {
        let config: Self = toml::from_str(content)
            .map_err(|e| ServerError::Config { context: "parse", detail: e.to_string() })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ServerError> {
        let invalid = |detail: String| Err(ServerError::Config { context: "validate", detail });

        if self.ingest.port == 0 {
            return invalid("ingest.port must be in 1..=65535".into());
        }
        if self.ingest.max_frame_bytes == 0 || self.ingest.max_frame_bytes > MAX_FRAME_BYTES {
            return invalid(format!(
                "ingest.max_frame_bytes must be in 1..={MAX_FRAME_BYTES}, got {}",
                self.ingest.max_frame_bytes
            ));
        }
        if self.storage.path.trim().is_empty() {
            return invalid("storage.path must not be empty".into());
        }
        if self.worker_pool.threads == 0 {
            return invalid("worker_pool.threads must be > 0".into());
        }
        if let Some(bp) = &self.block_pool {
            if bp.block_size == 0 || bp.block_count == 0 {
                return invalid("block_pool.block_size and block_pool.block_count must be > 0".into());
            }
        }
        if self.bus.mode == BusMode::Sync && !self.bus.routes.is_empty() {
            return invalid("bus.routes are only valid with bus.mode = \"priority\"".into());
        }
        Ok(())
    }
}
