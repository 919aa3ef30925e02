use thiserror::Error;

/// Per-message ingestion failures. None of these are fatal to the consumer
/// loop: a failing message is logged, its unit of work rolled back, and the
/// loop moves on.
#[derive(Debug, Error, Clone)]
pub enum IngestError {
    #[error("malformed payload: {0}")]
    Malformed(String),
    #[error("missing or unparseable field: {0}")]
    MissingField(&'static str),
}

pub type Result<T> = eyre::Result<T>;
pub use eyre::Report;
