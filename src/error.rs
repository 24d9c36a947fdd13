use thiserror::Error;

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Stream read failed: {0}")]
    Stream(String),
}

pub type Result<T> = std::result::Result<T, AnalysisError>;
