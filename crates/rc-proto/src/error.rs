use thiserror::Error;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("connection closed")]
    Closed,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("line was not valid utf-8")]
    NotUtf8,
}

#[derive(Debug, Error)]
pub enum TransferError {
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("expected {expected}, got {got}")]
    UnexpectedFrame { expected: String, got: String },
    #[error("source path does not exist: {0}")]
    SourceMissing(String),
    #[error("no files to transfer under {0}")]
    NoFiles(String),
}
