use std::io;
use std::path::PathBuf;

use crate::handle::TransactionMode;

/// Errors from database operations.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// I/O error outside of a read pass.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The store failed while a row was being read. The rows read so far
    /// cannot be trusted as a complete graph; callers must stop, not retry.
    #[error("read of {file} aborted at line {line}: {source}")]
    ReadAborted {
        file: PathBuf,
        line: u64,
        #[source]
        source: io::Error,
    },

    /// A row is not valid UTF-8. Loading stops here so the bytes are never
    /// written back in a lossy form.
    #[error("{file}:{line}: row is not valid UTF-8 (bad byte at column {column})")]
    InvalidEncoding { file: PathBuf, line: u64, column: usize },

    /// The live file exists but could not be opened.
    #[error("cannot open {path} for reading: {source}")]
    OpenForRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The temporary file for a write session could not be created.
    #[error("cannot open {path} for writing: {source}")]
    OpenForWrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The advisory lock file could not be opened or locked.
    #[error("cannot lock {path}: {source}")]
    Lock {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Finishing the temporary file or renaming it over the live file failed.
    /// The live file is unchanged.
    #[error("cannot commit {from} to {to}: {source}")]
    Commit {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A read ran past the last field of the row.
    #[error("{file}:{line}: field {field} is missing")]
    MissingField { file: PathBuf, line: u64, field: u32 },

    /// A field does not parse as the requested type.
    #[error("{file}:{line}: field {field} {value:?} is not a valid {expected}")]
    MalformedField {
        file: PathBuf,
        line: u64,
        field: u32,
        value: String,
        expected: &'static str,
    },

    /// A value cannot be written without breaking the row grammar.
    #[error("invalid {kind} {value:?}: {reason}")]
    InvalidField {
        kind: &'static str,
        value: String,
        reason: &'static str,
    },

    /// A field was written after the trailing free-text field.
    #[error("row {row_type} already ended with a free-text field")]
    FieldAfterFreeText { row_type: String },

    /// A field or commit was issued with no row started.
    #[error("no row has been started")]
    NoRowStarted,

    /// A row was started before the previous one was committed.
    #[error("row {row_type} has not been committed")]
    RowInProgress { row_type: String },

    /// A read operation on a write handle, or the reverse.
    #[error("operation needs a {expected} handle, this one is {actual}")]
    WrongMode {
        expected: TransactionMode,
        actual: TransactionMode,
    },

    /// The configured backend name is not known.
    #[error("unknown database backend: {0}")]
    UnknownBackend(String),

    /// The configuration file could not be parsed.
    #[error("configuration error: {0}")]
    Config(String),
}

impl DbError {
    /// Returns `true` for errors after which the in-memory graph must not be
    /// used or written back.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ReadAborted { .. } | Self::InvalidEncoding { .. })
    }
}

/// Result alias for database operations.
pub type DbResult<T> = Result<T, DbError>;
