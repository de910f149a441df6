use thiserror::Error;

use crate::block::{Range, RangeError};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("module {module}: complete snapshot {range} {reason} {initial_block}")]
    Consistency {
        module: String,
        range: Range,
        initial_block: u64,
        reason: &'static str,
    },
    #[error("invalid snapshot filename {0:?}")]
    InvalidFilename(String),
    #[error("object {0} not found")]
    NotFound(String),
    #[error("object store I/O on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("snapshot codec error: {0}")]
    Codec(#[from] serde_json::Error),
    #[error(transparent)]
    Range(#[from] RangeError),
}

impl StorageError {
    pub(crate) fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        StorageError::Io {
            path: path.into(),
            source,
        }
    }
}
