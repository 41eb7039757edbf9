//! Error types for the editor

use crate::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EditorError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Parse error: {0}")]
    Parse(#[from] folio_expr::ParseError),

    #[error("Evaluation error: {0}")]
    Evaluation(#[from] folio_expr::EvalError),

    #[error("Persistence error: {0}")]
    Persist(#[from] PersistError),

    #[error("Could not load report: {0}")]
    Load(String),

    #[error("Nothing is linked as {0}")]
    NoLink(&'static str),

    #[error("Unknown widget type '{0}'")]
    UnknownWidget(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("Invalid path '{0}'")]
    InvalidPath(String),

    #[error("Path '{0}' does not resolve")]
    Missing(Path),

    #[error("Path '{0}' is not a container")]
    NotContainer(Path),

    #[error("Path '{0}' is not an array")]
    NotArray(Path),

    #[error("Index {index} out of bounds at '{path}' (length {len})")]
    OutOfBounds { path: Path, index: usize, len: usize },

    #[error("The store root cannot be replaced or removed")]
    RootMutation,
}

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Request to {url} failed: {message}")]
    Request { url: String, message: String },

    #[error("Response from {url} returned status {status}")]
    Status { url: String, status: u16 },

    #[error("Response body is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Could not evaluate request field '{field}': {message}")]
    Field { field: &'static str, message: String },

    #[error("Producer '{name}' failed: {message}")]
    Producer { name: String, message: String },
}

#[derive(Error, Debug)]
pub enum PersistError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Stored value under '{key}' is not valid JSON: {source}")]
    Decode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid key '{0}'")]
    InvalidKey(String),
}
