#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("config ({context}): {detail}")]
    Config { context: &'static str, detail: String },

    #[error("storage: {0}")]
    Storage(#[from] event_store::StorageError),

    #[error("ingest: {0}")]
    Ingest(#[from] ingest::IngestError),

    #[error("{0}")]
    Component(#[from] stream_api::StreamError),

    #[error("signal: {0}")]
    Signal(#[from] std::io::Error),

    #[error("shutdown task: {0}")]
    Shutdown(#[from] tokio::task::JoinError),
}
