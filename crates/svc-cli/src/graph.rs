//! Persisting a [`Registry`] as `OBJ` and `MD` rows.
//!
//! ```text
//! OBJ <name>
//! MD <name> <key> <value...>
//! ```
//!
//! Every named object is written as an `OBJ` row followed by its metadata in
//! insertion order. Unnamed objects have no stable identity across restarts
//! and are not saved.

use anyhow::Context;
use svc_db::{Backend, DatabaseHandle, DbResult, ParseStats, TransactionMode, TypeHandlers};
use svc_object::{ObjectRef, Registry, RegistryConfig};
use tracing::{debug, warn};

pub const OBJECT_ROW: &str = "OBJ";
pub const METADATA_ROW: &str = "MD";

/// Row handlers that rebuild objects into a registry.
pub fn handlers() -> TypeHandlers<Registry> {
    let mut table = TypeHandlers::new();
    table.register(OBJECT_ROW, load_object);
    table.register(METADATA_ROW, load_metadata);
    table
}

fn load_object(registry: &mut Registry, db: &mut DatabaseHandle, _row_type: &str) -> DbResult<()> {
    let line = db.line();
    let name = db.require_word()?;
    if registry.find_by_name(name).is_some() {
        warn!(object = name, line, "duplicate object row skipped");
        return Ok(());
    }
    registry.init(Some(name), None);
    Ok(())
}

fn load_metadata(registry: &mut Registry, db: &mut DatabaseHandle, _row_type: &str) -> DbResult<()> {
    let line = db.line();
    let object = db.require_word()?.to_string();
    let key = db.require_word()?.to_string();
    let value = db.require_str()?;

    let Some(target) = registry.find_by_name(&object) else {
        warn!(object = %object, key = %key, line, "metadata for unknown object skipped");
        return Ok(());
    };
    if let Err(e) = registry.metadata_add(target, &key, value) {
        warn!(object = %object, line, error = %e, "invalid metadata row skipped");
    }
    Ok(())
}

/// Load the object graph from the store. A missing store loads as empty.
pub fn load(backend: &dyn Backend, filename: Option<&str>, registry: &mut Registry) -> anyhow::Result<ParseStats> {
    let table = handlers();
    let stats = svc_db::load(backend, filename, &mut table.bind(registry))?;
    Ok(stats.unwrap_or_default())
}

/// Read-modify-write of the object graph under one write session.
///
/// The store lock is taken before the graph is loaded and held until the
/// result is committed, so a concurrent writer cannot slip in between and
/// have its save overwritten. If loading, `apply` or writing fails, the
/// session is aborted and the live file is left as it was. Returns the
/// number of objects saved.
pub fn update<F>(
    backend: &dyn Backend,
    filename: Option<&str>,
    config: &RegistryConfig,
    apply: F,
) -> anyhow::Result<usize>
where
    F: FnOnce(&mut Registry) -> anyhow::Result<()>,
{
    let mut db = backend
        .open(filename, TransactionMode::Write)?
        .context("backend returned no write handle")?;

    let saved = load_for_update(backend, filename, config).and_then(|mut registry| {
        apply(&mut registry)?;
        Ok(write_objects(&mut db, &registry)?)
    });

    match saved {
        Ok(saved) => {
            backend.close(db)?;
            debug!(objects = saved, "object graph saved");
            Ok(saved)
        }
        Err(e) => {
            db.abort();
            Err(e)
        }
    }
}

fn load_for_update(backend: &dyn Backend, filename: Option<&str>, config: &RegistryConfig) -> anyhow::Result<Registry> {
    let mut registry = Registry::with_config(config);
    load(backend, filename, &mut registry)?;
    Ok(registry)
}

fn write_objects(db: &mut DatabaseHandle, registry: &Registry) -> DbResult<usize> {
    let mut saved = 0;
    for obj in registry.iter() {
        let Ok(Some(name)) = registry.name(obj) else {
            continue;
        };
        db.start_row(OBJECT_ROW)?;
        db.write_word(name)?;
        db.commit_row()?;
        write_metadata(db, registry, obj, name)?;
        saved += 1;
    }
    Ok(saved)
}

fn write_metadata(db: &mut DatabaseHandle, registry: &Registry, obj: ObjectRef, name: &str) -> DbResult<()> {
    let Ok(entries) = registry.metadata(obj) else {
        return Ok(());
    };
    for md in entries {
        db.start_row(METADATA_ROW)?;
        db.write_word(name)?;
        db.write_word(md.name())?;
        db.write_str(md.value())?;
        db.commit_row()?;
    }
    Ok(())
}
