//! Flat-file persistence for the services daemon.
//!
//! Entity modules describe their state as rows of typed fields; a
//! [`Backend`] turns those rows into bytes on disk and back. The only
//! backend shipped is [`OpenSex`], a line-oriented text format.
//!
//! # Key Types
//!
//! - [`Backend`] -- open, parse, close; selected once via [`select_backend`]
//! - [`DatabaseHandle`] -- one open read or write transaction
//! - [`TypeHandlers`] -- row-type dispatch table used by `parse`
//! - [`WriteSession`] -- lock, temp file and atomic rename behind every save
//! - [`DbConfig`] -- store location and backend choice
//!
//! # Durability Rules
//!
//! 1. The live file is never written in place; saves go to `<name>.new` and
//!    are renamed over it.
//! 2. Writers are serialized by an advisory lock on `<name>.lock`.
//! 3. A read that hits an I/O error is [`DbError::ReadAborted`]; nothing read
//!    before it may be acted on.
//! 4. A store that does not exist yet opens as `None`, not as an error.

pub mod backend;
pub mod commit;
pub mod config;
pub mod error;
pub mod handle;
pub mod opensex;

pub use backend::{load, select_backend, Backend, ParseStats, RowDispatch, RowHandler, TypeHandlers};
pub use commit::{CommitHook, NoOpHook, StorePaths, WriteSession};
pub use config::DbConfig;
pub use error::{DbError, DbResult};
pub use handle::{DatabaseHandle, FieldError, RowReader, RowWriter, TransactionMode};
pub use opensex::{OpenSex, GRAMMAR_ROW, GRAMMAR_VERSION};
