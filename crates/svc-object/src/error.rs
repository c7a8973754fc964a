use thiserror::Error;

use crate::object::ObjectRef;

/// Errors produced by object registry operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ObjectError {
    /// The handle does not name a live object (never created, or already
    /// reclaimed).
    #[error("unknown object: {0}")]
    UnknownObject(ObjectRef),

    /// `dispose` was called on an object whose disposal is already under way.
    #[error("object {0} is already being disposed")]
    AlreadyDisposing(ObjectRef),

    /// A reference was dropped from an object that holds none.
    #[error("reference count underflow on {0}")]
    RefcountUnderflow(ObjectRef),

    /// Metadata name or value cannot be stored.
    #[error("invalid metadata {name:?}: {reason}")]
    InvalidMetadata { name: String, reason: String },
}

/// Result alias for object operations.
pub type ObjectResult<T> = Result<T, ObjectError>;
