//! The backend contract and row-type dispatch.
//!
//! A process selects exactly one [`Backend`] at startup and passes it around
//! as `Box<dyn Backend>`. Entity modules never see the file format: they
//! register a handler per row type in a [`TypeHandlers`] table and the
//! backend's [`Backend::parse`] drives them.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::commit::CommitHook;
use crate::config::DbConfig;
use crate::error::{DbError, DbResult};
use crate::handle::{DatabaseHandle, TransactionMode};
use crate::opensex::OpenSex;

/// A storage format the daemon can load from and save to.
pub trait Backend: Send + Sync {
    /// Short name used in configuration.
    fn name(&self) -> &'static str;

    /// Open a transaction on `filename` (the configured store when `None`).
    ///
    /// A read of a store that does not exist yet returns `Ok(None)`.
    fn open(&self, filename: Option<&str>, mode: TransactionMode) -> DbResult<Option<DatabaseHandle>>;

    /// End a transaction, committing it if it is a write.
    fn close(&self, handle: DatabaseHandle) -> DbResult<()> {
        handle.commit()
    }

    /// Read every remaining row and hand each one to `dispatch`.
    fn parse(&self, handle: &mut DatabaseHandle, dispatch: &mut dyn RowDispatch) -> DbResult<ParseStats>;
}

/// Receives rows during a read pass.
pub trait RowDispatch {
    /// Handle one row whose type token has been consumed. Returns `false`
    /// when nothing is registered for `row_type`.
    fn dispatch(&mut self, db: &mut DatabaseHandle, row_type: &str) -> DbResult<bool>;
}

/// Counts from one read pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ParseStats {
    pub rows: u64,
    pub dispatched: u64,
    pub skipped: u64,
}

/// Handler for one row type. Receives the context, the handle positioned
/// after the type token, and the type itself.
pub type RowHandler<C> = Box<dyn Fn(&mut C, &mut DatabaseHandle, &str) -> DbResult<()>>;

/// Row-type dispatch table. Types are matched case-sensitively.
pub struct TypeHandlers<C> {
    handlers: HashMap<String, RowHandler<C>>,
}

impl<C> TypeHandlers<C> {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register `handler` for `row_type`, replacing any previous one.
    pub fn register<F>(&mut self, row_type: &str, handler: F)
    where
        F: Fn(&mut C, &mut DatabaseHandle, &str) -> DbResult<()> + 'static,
    {
        if self.handlers.insert(row_type.to_string(), Box::new(handler)).is_some() {
            debug!(row_type, "row handler replaced");
        }
    }

    pub fn unregister(&mut self, row_type: &str) -> bool {
        self.handlers.remove(row_type).is_some()
    }

    pub fn is_registered(&self, row_type: &str) -> bool {
        self.handlers.contains_key(row_type)
    }

    /// Pair the table with the context its handlers mutate.
    pub fn bind<'a>(&'a self, ctx: &'a mut C) -> BoundHandlers<'a, C> {
        BoundHandlers { handlers: self, ctx }
    }
}

impl<C> Default for TypeHandlers<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> fmt::Debug for TypeHandlers<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut types: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        types.sort_unstable();
        f.debug_struct("TypeHandlers").field("types", &types).finish()
    }
}

/// A [`TypeHandlers`] table bound to its context for one read pass.
pub struct BoundHandlers<'a, C> {
    handlers: &'a TypeHandlers<C>,
    ctx: &'a mut C,
}

impl<C> RowDispatch for BoundHandlers<'_, C> {
    fn dispatch(&mut self, db: &mut DatabaseHandle, row_type: &str) -> DbResult<bool> {
        match self.handlers.handlers.get(row_type) {
            Some(handler) => {
                handler(&mut *self.ctx, db, row_type)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// Resolve the configured backend.
pub fn select_backend(config: &DbConfig, hook: Arc<dyn CommitHook>) -> DbResult<Box<dyn Backend>> {
    match config.backend.as_str() {
        "opensex" => Ok(Box::new(OpenSex::from_config(config).with_hook(hook))),
        other => Err(DbError::UnknownBackend(other.to_string())),
    }
}

/// Open `filename` for reading and run a full parse pass over it.
///
/// Returns `Ok(None)` when the store does not exist yet.
pub fn load(
    backend: &dyn Backend,
    filename: Option<&str>,
    dispatch: &mut dyn RowDispatch,
) -> DbResult<Option<ParseStats>> {
    let Some(mut db) = backend.open(filename, TransactionMode::Read)? else {
        return Ok(None);
    };
    let stats = backend.parse(&mut db, dispatch)?;
    backend.close(db)?;
    Ok(Some(stats))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commit::NoOpHook;

    #[test]
    fn unknown_backend_is_rejected() {
        let config = DbConfig {
            backend: "sqlite".into(),
            ..DbConfig::default()
        };
        match select_backend(&config, Arc::new(NoOpHook)) {
            Err(DbError::UnknownBackend(name)) => assert_eq!(name, "sqlite"),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("sqlite backend should not exist"),
        }
    }

    #[test]
    fn opensex_is_the_default() {
        let backend = select_backend(&DbConfig::default(), Arc::new(NoOpHook)).unwrap();
        assert_eq!(backend.name(), "opensex");
    }

    #[test]
    fn handler_table_bookkeeping() {
        let mut table: TypeHandlers<Vec<String>> = TypeHandlers::new();
        table.register("CHAN", |seen, _, ty| {
            seen.push(ty.to_string());
            Ok(())
        });
        assert!(table.is_registered("CHAN"));
        assert!(!table.is_registered("chan"));
        assert!(table.unregister("CHAN"));
        assert!(!table.unregister("CHAN"));
    }

    #[test]
    fn load_of_missing_store_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let backend = OpenSex::new(dir.path(), "services.db");
        let table: TypeHandlers<()> = TypeHandlers::new();
        let mut ctx = ();
        let stats = load(&backend, None, &mut table.bind(&mut ctx)).unwrap();
        assert!(stats.is_none());
    }
}
