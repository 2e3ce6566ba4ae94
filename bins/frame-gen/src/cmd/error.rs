#[derive(Debug, thiserror::Error)]
pub enum FrameGenError {
    #[error("{0}")]
    Config(String),

    #[error("{0}")]
    Frame(#[from] framing::FrameError),

    #[error("signal: {0}")]
    Signal(#[from] std::io::Error),
}
