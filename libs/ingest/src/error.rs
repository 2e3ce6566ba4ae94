use std::net::SocketAddr;

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("resolve {addr}: {source}")]
    Resolve { addr: String, source: std::io::Error },

    #[error("bind {addr}: {source}")]
    Bind { addr: SocketAddr, source: std::io::Error },

    #[error("spawn accept thread: {0}")]
    Spawn(std::io::Error),

    #[error("ingest server already running")]
    AlreadyRunning,
}
