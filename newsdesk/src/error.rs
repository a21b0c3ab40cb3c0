use std::path::PathBuf;

use common::protocol::UnknownSearchType;
use thiserror::Error;
use tokio_util::codec::LinesCodecError;

/// A request that names a filter value or mode outside the supported vocabulary.
/// The display text is what the client receives after the `error_` prefix.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Unsupported category: {0}")]
    UnsupportedCategory(String),
    #[error("Unsupported country: {0}")]
    UnsupportedCountry(String),
    #[error("Unsupported language: {0}")]
    UnsupportedLanguage(String),
    #[error(transparent)]
    UnknownSearchType(#[from] UnknownSearchType),
    #[error("Missing parameter for: {0}")]
    MissingParameter(&'static str),
}

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("failed to create output directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize response: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failures that reach the client as an `error_` reply.
/// Gateway failures never get here; the router turns them into an empty envelope.
#[derive(Debug, Error)]
pub enum RouteError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Persistence(#[from] PersistError),
}

/// Failures that end a single connection.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("client did not identify within the read timeout")]
    HandshakeTimeout,
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LinesCodecError> for ConnectionError {
    fn from(err: LinesCodecError) -> Self {
        match err {
            LinesCodecError::MaxLineLengthExceeded => {
                ConnectionError::Protocol("message exceeds the maximum length".to_string())
            }
            LinesCodecError::Io(e) => ConnectionError::Io(e),
        }
    }
}
