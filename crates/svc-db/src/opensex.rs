//! OpenSEX: the line-oriented flat-file format.
//!
//! One row per line, fields separated by a single space, the row type first
//! and an optional free-text field last:
//!
//! ```text
//! GRVER 1
//! OBJ #services
//! MD #services private:topic:setter alice
//! MD #services url https://example.net/a page with spaces
//! ```
//!
//! Absent values are written as `*`. Every write session starts with a
//! `GRVER` row declaring the grammar version.

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::backend::{Backend, ParseStats, RowDispatch};
use crate::commit::{CommitHook, NoOpHook, StorePaths, WriteSession};
use crate::config::DbConfig;
use crate::error::{DbError, DbResult};
use crate::handle::{DatabaseHandle, RowReader, RowWriter, TransactionMode};

/// Row type declaring the grammar version.
pub const GRAMMAR_ROW: &str = "GRVER";

/// Grammar version this codec reads and writes.
pub const GRAMMAR_VERSION: u32 = 1;

/// Placeholder written for an absent field.
pub const ABSENT: &str = "*";

const INITIAL_LINE_CAPACITY: usize = 512;

/// The OpenSEX backend.
pub struct OpenSex {
    datadir: PathBuf,
    default_name: String,
    fsync: bool,
    hook: Arc<dyn CommitHook>,
}

impl OpenSex {
    pub fn new(datadir: impl Into<PathBuf>, default_name: impl Into<String>) -> Self {
        Self {
            datadir: datadir.into(),
            default_name: default_name.into(),
            fsync: true,
            hook: Arc::new(NoOpHook),
        }
    }

    pub fn from_config(config: &DbConfig) -> Self {
        Self::new(&config.datadir, &config.database).with_fsync(config.fsync)
    }

    /// Hook notified after every successful commit.
    pub fn with_hook(mut self, hook: Arc<dyn CommitHook>) -> Self {
        self.hook = hook;
        self
    }

    pub fn with_fsync(mut self, fsync: bool) -> Self {
        self.fsync = fsync;
        self
    }

    /// Live path for `filename`, or for the configured store.
    pub fn path_for(&self, filename: Option<&str>) -> PathBuf {
        self.datadir.join(filename.unwrap_or(&self.default_name))
    }

    fn open_read(&self, path: PathBuf) -> DbResult<Option<DatabaseHandle>> {
        let paths = StorePaths::new(&path);
        if paths.temp.exists() {
            warn!(
                stale = %paths.temp.display(),
                "found an unfinished write from an earlier run; ignoring it"
            );
        }

        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!(path = %path.display(), "database does not exist yet; a new one will be created");
                return Ok(None);
            }
            Err(source) => {
                error!(path = %path.display(), error = %source, "cannot open database for reading");
                return Err(DbError::OpenForRead { path, source });
            }
        };

        let reader = OpenSexReader::new(BufReader::new(file));
        Ok(Some(DatabaseHandle::reader(path, Box::new(reader), GRAMMAR_VERSION)))
    }

    fn open_write(&self, path: PathBuf) -> DbResult<DatabaseHandle> {
        let (session, file) = WriteSession::begin(StorePaths::new(&path), self.fsync, self.hook.clone())?;
        let writer = OpenSexWriter::new(file);
        let mut db = DatabaseHandle::writer(path, Box::new(writer), session, GRAMMAR_VERSION);

        if let Err(e) = write_grammar_row(&mut db) {
            db.abort();
            return Err(e);
        }
        Ok(db)
    }
}

impl std::fmt::Debug for OpenSex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenSex")
            .field("datadir", &self.datadir)
            .field("default_name", &self.default_name)
            .field("fsync", &self.fsync)
            .finish_non_exhaustive()
    }
}

fn write_grammar_row(db: &mut DatabaseHandle) -> DbResult<()> {
    db.start_row(GRAMMAR_ROW)?;
    db.write_uint(GRAMMAR_VERSION)?;
    db.commit_row()
}

/// Rows whose leading token is empty or starts with one of these carry no
/// data.
fn is_ignored_row(row_type: &str) -> bool {
    match row_type.as_bytes().first() {
        None => true,
        Some(b) => b"#\n\t \r".contains(b),
    }
}

impl Backend for OpenSex {
    fn name(&self) -> &'static str {
        "opensex"
    }

    fn open(&self, filename: Option<&str>, mode: TransactionMode) -> DbResult<Option<DatabaseHandle>> {
        let path = self.path_for(filename);
        match mode {
            TransactionMode::Read => self.open_read(path),
            TransactionMode::Write => self.open_write(path).map(Some),
        }
    }

    fn parse(&self, db: &mut DatabaseHandle, dispatch: &mut dyn RowDispatch) -> DbResult<ParseStats> {
        let mut stats = ParseStats::default();
        let mut row_type = String::new();

        while db.read_next_row()? {
            stats.rows += 1;
            row_type.clear();
            match db.read_word() {
                Some(word) if !is_ignored_row(word) => row_type.push_str(word),
                _ => {
                    stats.skipped += 1;
                    continue;
                }
            }

            if row_type == GRAMMAR_ROW {
                let version = db.read_uint()?;
                db.set_grammar_version(version);
                info!(version, "grammar version read");
                if version != GRAMMAR_VERSION {
                    warn!(
                        version,
                        supported = GRAMMAR_VERSION,
                        "unsupported grammar version; trying to continue"
                    );
                }
                continue;
            }

            if dispatch.dispatch(db, &row_type)? {
                stats.dispatched += 1;
            } else {
                stats.skipped += 1;
            }
        }

        debug!(
            file = %db.file().display(),
            rows = stats.rows,
            dispatched = stats.dispatched,
            skipped = stats.skipped,
            "parse finished"
        );
        Ok(stats)
    }
}

// ---------------------------------------------------------------------------
// Reading
// ---------------------------------------------------------------------------

/// Lexer over any buffered byte source.
pub struct OpenSexReader<R> {
    source: R,
    raw: Vec<u8>,
    line: String,
    /// Start of the next token; `None` once the row is used up.
    cursor: Option<usize>,
}

impl<R: BufRead> OpenSexReader<R> {
    pub fn new(source: R) -> Self {
        Self {
            source,
            raw: Vec::with_capacity(INITIAL_LINE_CAPACITY),
            line: String::with_capacity(INITIAL_LINE_CAPACITY),
            cursor: None,
        }
    }
}

impl<R: BufRead> RowReader for OpenSexReader<R> {
    fn read_next_row(&mut self) -> io::Result<bool> {
        self.raw.clear();
        self.line.clear();
        self.cursor = None;

        if self.source.read_until(b'\n', &mut self.raw)? == 0 {
            return Ok(false);
        }
        if self.raw.last() == Some(&b'\n') {
            self.raw.pop();
        }

        let text = std::str::from_utf8(&self.raw).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        self.line.push_str(text);
        self.cursor = Some(0);
        Ok(true)
    }

    fn read_word(&mut self) -> Option<&str> {
        let start = self.cursor?;
        let rest = &self.line[start..];
        match rest.find(' ') {
            Some(len) => {
                self.cursor = Some(start + len + 1);
                Some(&self.line[start..start + len])
            }
            None => {
                self.cursor = None;
                Some(rest)
            }
        }
    }

    fn read_str(&mut self) -> Option<&str> {
        let start = self.cursor.take()?;
        Some(&self.line[start..])
    }
}

// ---------------------------------------------------------------------------
// Writing
// ---------------------------------------------------------------------------

/// Row writer. Fields go straight to a buffered file; a row is only
/// terminated by `commit_row`.
pub struct OpenSexWriter {
    out: BufWriter<File>,
    row: Option<String>,
    free_text: bool,
}

impl OpenSexWriter {
    pub fn new(file: File) -> Self {
        Self {
            out: BufWriter::new(file),
            row: None,
            free_text: false,
        }
    }

    /// Check that another field may follow on the current row.
    fn field_slot(&self) -> DbResult<()> {
        match &self.row {
            None => Err(DbError::NoRowStarted),
            Some(row_type) if self.free_text => Err(DbError::FieldAfterFreeText {
                row_type: row_type.clone(),
            }),
            Some(_) => Ok(()),
        }
    }

    fn put_field(&mut self, field: &str) -> DbResult<()> {
        self.out.write_all(b" ")?;
        self.out.write_all(field.as_bytes())?;
        Ok(())
    }
}

fn check_word(kind: &'static str, word: &str) -> DbResult<()> {
    let reason = if word.is_empty() {
        "must not be empty"
    } else if word.contains(' ') {
        "must not contain spaces"
    } else if word.contains(['\n', '\r']) {
        "must not contain line breaks"
    } else {
        return Ok(());
    };
    Err(DbError::InvalidField {
        kind,
        value: word.to_string(),
        reason,
    })
}

impl RowWriter for OpenSexWriter {
    fn start_row(&mut self, row_type: &str) -> DbResult<()> {
        if let Some(open) = &self.row {
            return Err(DbError::RowInProgress {
                row_type: open.clone(),
            });
        }
        check_word("row type", row_type)?;
        self.out.write_all(row_type.as_bytes())?;
        self.row = Some(row_type.to_string());
        self.free_text = false;
        Ok(())
    }

    fn write_word(&mut self, word: Option<&str>) -> DbResult<()> {
        self.field_slot()?;
        let word = word.unwrap_or(ABSENT);
        check_word("word", word)?;
        self.put_field(word)
    }

    fn write_str(&mut self, text: Option<&str>) -> DbResult<()> {
        self.field_slot()?;
        let text = text.unwrap_or(ABSENT);
        if text.contains(['\n', '\r']) {
            return Err(DbError::InvalidField {
                kind: "free text",
                value: text.to_string(),
                reason: "must not contain line breaks",
            });
        }
        self.put_field(text)?;
        self.free_text = true;
        Ok(())
    }

    fn commit_row(&mut self) -> DbResult<()> {
        if self.row.take().is_none() {
            return Err(DbError::NoRowStarted);
        }
        self.free_text = false;
        self.out.write_all(b"\n")?;
        Ok(())
    }

    fn finish(self: Box<Self>) -> io::Result<File> {
        if let Some(row_type) = &self.row {
            warn!(row_type = %row_type, "uncommitted row dropped at end of write session");
        }
        self.out.into_inner().map_err(|e| e.into_error())
    }
}
