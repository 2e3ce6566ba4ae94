use std::path::PathBuf;

use stream_api::StreamError;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("open {}: {source}", path.display())]
    Open { path: PathBuf, source: std::io::Error },

    #[error("write event {id}: {source}")]
    Write { id: u32, source: std::io::Error },

    #[error("read: {0}")]
    Read(#[from] std::io::Error),

    #[error("truncated record at offset {offset}")]
    Truncated { offset: u64 },

    #[error("corrupt record at offset {offset}: {detail}")]
    Corrupt { offset: u64, detail: String },
}

impl From<StorageError> for StreamError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::Truncated { .. } | StorageError::Corrupt { .. } => {
                StreamError::format_err(e.to_string())
            }
            _ => StreamError::io(e.to_string()),
        }
    }
}
