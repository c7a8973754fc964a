use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use colored::Colorize;
use serde::Serialize;
use svc_db::{select_backend, Backend, CommitHook, DatabaseHandle, DbResult, RowDispatch, TransactionMode};
use svc_object::Registry;

use crate::cli::*;
use crate::config::ToolConfig;
use crate::graph;

/// Prints a confirmation each time a store is replaced.
struct ReportSaved;

impl CommitHook for ReportSaved {
    fn database_saved(&self, path: &Path) {
        println!("{} saved {}", "✓".green().bold(), path.display().to_string().bold());
    }
}

struct Store {
    backend: Box<dyn Backend>,
    config: ToolConfig,
    filename: Option<String>,
    format: OutputFormat,
}

impl Store {
    fn filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }

    fn live_path(&self) -> PathBuf {
        let db = &self.config.database;
        db.datadir.join(self.filename().unwrap_or(db.database.as_str()))
    }
}

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = ToolConfig::load(cli.config.as_deref())?;
    let backend = select_backend(&config.database, Arc::new(ReportSaved))?;
    let ctx = Store {
        backend,
        config,
        filename: cli.db,
        format: cli.format,
    };

    match cli.command {
        Command::Check => cmd_check(&ctx),
        Command::Rewrite => cmd_rewrite(&ctx),
        Command::Meta(args) => cmd_meta(&ctx, args.action),
    }
}

// ---------------------------------------------------------------------------
// check
// ---------------------------------------------------------------------------

/// Counts rows per type without interpreting them.
#[derive(Default)]
struct RowCounter {
    counts: BTreeMap<String, u64>,
}

impl RowDispatch for RowCounter {
    fn dispatch(&mut self, _db: &mut DatabaseHandle, row_type: &str) -> DbResult<bool> {
        *self.counts.entry(row_type.to_string()).or_default() += 1;
        Ok(true)
    }
}

#[derive(Serialize)]
struct CheckReport {
    path: PathBuf,
    exists: bool,
    grammar_version: Option<u32>,
    rows: u64,
    skipped: u64,
    types: BTreeMap<String, u64>,
}

fn cmd_check(ctx: &Store) -> anyhow::Result<()> {
    let path = ctx.live_path();
    let mut report = CheckReport {
        path: path.clone(),
        exists: false,
        grammar_version: None,
        rows: 0,
        skipped: 0,
        types: BTreeMap::new(),
    };

    if let Some(mut db) = ctx.backend.open(ctx.filename(), TransactionMode::Read)? {
        let mut counter = RowCounter::default();
        let stats = ctx.backend.parse(&mut db, &mut counter)?;
        report.exists = true;
        report.grammar_version = Some(db.grammar_version());
        report.rows = stats.rows;
        report.skipped = stats.skipped;
        report.types = counter.counts;
        ctx.backend.close(db)?;
    }

    match ctx.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => print_check(&report),
    }
    Ok(())
}

fn print_check(report: &CheckReport) {
    let path = report.path.display().to_string();
    let Some(version) = report.grammar_version else {
        println!("{} {} does not exist yet", "-".dimmed(), path.bold());
        return;
    };
    println!("{} {}", "✓".green().bold(), path.bold());
    let version_text = if version == svc_db::GRAMMAR_VERSION {
        version.to_string().green()
    } else {
        format!("{version} (unsupported)").yellow()
    };
    println!("  Grammar version: {version_text}");
    println!("  Rows: {} ({} skipped)", report.rows.to_string().bold(), report.skipped);
    for (row_type, count) in &report.types {
        println!("  {:<12} {}", row_type.cyan(), count);
    }
}

// ---------------------------------------------------------------------------
// rewrite
// ---------------------------------------------------------------------------

/// Copies each row verbatim into a write session.
struct RowCopier<'a> {
    out: &'a mut DatabaseHandle,
    rows: u64,
}

impl RowDispatch for RowCopier<'_> {
    fn dispatch(&mut self, db: &mut DatabaseHandle, row_type: &str) -> DbResult<bool> {
        self.out.start_row(row_type)?;
        if let Some(rest) = db.read_str() {
            self.out.write_str(rest)?;
        }
        self.out.commit_row()?;
        self.rows += 1;
        Ok(true)
    }
}

fn cmd_rewrite(ctx: &Store) -> anyhow::Result<()> {
    let path = ctx.live_path();
    let Some(mut input) = ctx.backend.open(ctx.filename(), TransactionMode::Read)? else {
        bail!("no database at {}", path.display());
    };
    let mut output = ctx
        .backend
        .open(ctx.filename(), TransactionMode::Write)?
        .context("backend returned no write handle")?;

    let mut copier = RowCopier {
        out: &mut output,
        rows: 0,
    };
    let copied = ctx.backend.parse(&mut input, &mut copier).map(|_| copier.rows);
    match copied {
        Ok(rows) => {
            ctx.backend.close(input)?;
            ctx.backend.close(output)?;
            println!("  {} rows rewritten", rows.to_string().bold());
            Ok(())
        }
        Err(e) => {
            output.abort();
            Err(e).with_context(|| format!("rewrite of {} abandoned", path.display()))
        }
    }
}

// ---------------------------------------------------------------------------
// meta
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct Entry<'a> {
    key: &'a str,
    value: &'a str,
}

fn load_registry(ctx: &Store) -> anyhow::Result<Registry> {
    let mut registry = Registry::with_config(&ctx.config.registry);
    graph::load(ctx.backend.as_ref(), ctx.filename(), &mut registry)?;
    Ok(registry)
}

fn cmd_meta(ctx: &Store, action: MetaAction) -> anyhow::Result<()> {
    match action {
        MetaAction::List { object } => {
            let registry = load_registry(ctx)?;
            let Some(obj) = registry.find_by_name(&object) else {
                bail!("no object named {object}");
            };
            let entries: Vec<Entry<'_>> = registry
                .metadata(obj)?
                .map(|md| Entry {
                    key: md.name(),
                    value: md.value(),
                })
                .collect();
            match ctx.format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&entries)?),
                OutputFormat::Text if entries.is_empty() => println!("{} has no metadata", object.bold()),
                OutputFormat::Text => {
                    for entry in &entries {
                        println!("{} = {}", entry.key.cyan(), entry.value);
                    }
                }
            }
        }
        MetaAction::Get { object, key } => {
            let registry = load_registry(ctx)?;
            let Some(obj) = registry.find_by_name(&object) else {
                bail!("no object named {object}");
            };
            let Some(md) = registry.metadata_find(obj, &key)? else {
                bail!("{object} has no {key}");
            };
            match ctx.format {
                OutputFormat::Json => println!(
                    "{}",
                    serde_json::to_string_pretty(&Entry {
                        key: md.name(),
                        value: md.value(),
                    })?
                ),
                OutputFormat::Text => println!("{}", md.value()),
            }
        }
        MetaAction::Set { object, key, value } => {
            graph::update(ctx.backend.as_ref(), ctx.filename(), &ctx.config.registry, |registry| {
                let obj = match registry.find_by_name(&object) {
                    Some(obj) => obj,
                    None => registry.init(Some(object.as_str()), None),
                };
                registry.metadata_add(obj, &key, &value)?;
                Ok(())
            })?;
        }
        MetaAction::Del { object, key } => {
            graph::update(ctx.backend.as_ref(), ctx.filename(), &ctx.config.registry, |registry| {
                let Some(obj) = registry.find_by_name(&object) else {
                    bail!("no object named {object}");
                };
                if registry.metadata_find(obj, &key)?.is_none() {
                    bail!("{object} has no {key}");
                }
                registry.metadata_delete(obj, &key)?;
                Ok(())
            })?;
        }
    }
    Ok(())
}
