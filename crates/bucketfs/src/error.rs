use crate::node::ObjectKey;

/// Errors surfaced by the filesystem core.
///
/// The façade maps these onto POSIX status codes in one place
/// ([`crate::fs::Status`]); everything transport- or serialization-shaped
/// collapses to EIO there.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The bucket reported a structural absence for this key.
    #[error("key not found: {0}")]
    KeyNotFound(ObjectKey),

    /// A blob could not be decoded: wrong password, corrupt data, or an
    /// object key too short to carry an IV.
    #[error("cannot decode object {key}: {reason}")]
    BadKey { key: ObjectKey, reason: String },

    #[error("object store: {0}")]
    Store(object_store::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("node encode: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("unknown node kind in mode {mode:#o}")]
    UnknownNodeKind { mode: u32 },

    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("not a directory: {0}")]
    NotDirectory(String),

    #[error("operation on a released handle")]
    BadHandle,

    #[error("read past end of file")]
    EndOfData,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
