//! Error taxonomy for decoding, persistence and view edits.

use crate::codec::Format;
use crate::value::ValueKind;
use std::{io, path::PathBuf, sync::Arc};
use thiserror::Error;

/// Failures converting between bytes and the value tree.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CodecError {
    /// The bytes are not valid JSON or Plist.
    #[error("malformed {format} input: {message}")]
    MalformedInput { format: Format, message: String },

    /// The decoded (or assigned) root is a scalar.
    #[error("document root must be an array or dictionary, found {0}")]
    UnsupportedRoot(ValueKind),

    /// The tree holds a value the target format cannot represent.
    #[error("{format} cannot encode {kind} at {path}")]
    UnencodableValue {
        format: Format,
        kind: ValueKind,
        path: String,
    },

    /// The serializer itself failed after the tree was accepted.
    #[error("{format} writer failed: {message}")]
    WriteFailed { format: Format, message: String },

    /// The file extension maps to no known format.
    #[error("unsupported file extension {0:?} (expected .json or .plist)")]
    UnsupportedFormat(String),
}

/// Failures of the document lifecycle (open, save, external sync).
#[derive(Error, Debug, Clone)]
pub enum DocumentError {
    #[error("i/o error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: Arc<io::Error>,
    },

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("document is closed")]
    Closed,
}

impl DocumentError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        DocumentError::Io {
            path: path.into(),
            source: Arc::new(source),
        }
    }
}

/// Failures of an edit attempted through a node view.
///
/// These are local to the offending view; sibling views are unaffected.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EditError {
    #[error("view is stale and must be refreshed before editing")]
    StaleView,

    #[error("view points at a node that no longer exists")]
    DetachedView,

    #[error("no such view")]
    UnknownView,

    #[error("key {0:?} already exists")]
    DuplicateKey(String),

    #[error("key {0:?} not found")]
    KeyNotFound(String),

    #[error("index {index} out of bounds for array of length {len}")]
    IndexOutOfBounds { index: usize, len: usize },

    #[error("{0:?} is not a valid array index")]
    InvalidIndex(String),

    #[error("{0} has no children")]
    NotAContainer(ValueKind),

    #[error("a non-empty key is required to insert into a dictionary")]
    KeyRequired,

    #[error("cannot {operation} children of {kind}")]
    UnsupportedOperation {
        operation: &'static str,
        kind: ValueKind,
    },

    #[error("the document root cannot be removed")]
    RootCannotBeRemoved,

    #[error("document is closed")]
    Closed,

    #[error(transparent)]
    Codec(#[from] CodecError),
}

pub type Result<T, E = DocumentError> = std::result::Result<T, E>;
