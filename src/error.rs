//! Error types for traceglobe

use thiserror::Error;

use crate::trace::TraceError;

/// Top-level error returned from `main`
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Trace(#[from] TraceError),
}

pub type Result<T> = std::result::Result<T, Error>;
