use std::io;
use std::result;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid shape: {0}")]
    InvalidShape(String),

    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    #[error("out of bounds: {0}")]
    OutOfBounds(String),

    #[error("buffer size mismatch: expected {expected} bytes, got {actual}")]
    BufferSizeMismatch { expected: usize, actual: usize },

    #[error("attribute {0:?} already exists in this scope")]
    DuplicateAttribute(String),

    #[error("schema of dataset {0:?} is committed and can no longer change")]
    SchemaFrozen(String),

    #[error("dataset {0:?} is already committed and has no staged writes")]
    AlreadyCommitted(String),

    #[error("dataset {0:?} must be committed before it can be written")]
    NotCommitted(String),

    #[error("{0:?} already exists")]
    AlreadyExists(String),

    #[error("container still has open datasets: {0:?}")]
    OpenDatasetsAtClose(Vec<String>),

    #[error("dataset {0:?} has an uncommitted schema")]
    OpenSchemaAtClose(String),

    #[error("{0:?} has been closed")]
    UseAfterClose(String),

    #[error("{0} handles are still open")]
    HandlesOutstanding(usize),

    #[error("invalid name: {0:?}")]
    InvalidName(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad format: {0}")]
    BadFormat(String),

    #[error("backend i/o failure: {0}")]
    BackendIo(#[from] io::Error),
}

impl From<cid::Error> for Error {
    fn from(err: cid::Error) -> Self {
        Self::BadFormat(format!("bad cid: {err}"))
    }
}

pub type Result<T> = result::Result<T, Error>;
