#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("too small to contain frame length: {len} bytes")]
    MissingFrameLength { len: usize },

    #[error("frame length mismatch: declared {declared}, actual {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("too small to contain topic length: {len} bytes")]
    MissingTopicLength { len: usize },

    #[error("frame body too small for declared topic length {declared} ({available} available)")]
    TopicTruncated { declared: usize, available: usize },

    #[error("topic is not valid UTF-8: {0}")]
    InvalidTopic(#[from] std::str::Utf8Error),

    #[error("frame too large: {len} bytes (max {max})")]
    Oversized { len: u32, max: u32 },

    #[error("topic too long for u16 length prefix: {len} bytes")]
    TopicTooLong { len: usize },

    #[error("frame body too large for u32 length prefix: {len} bytes")]
    FrameTooLarge { len: usize },
}
