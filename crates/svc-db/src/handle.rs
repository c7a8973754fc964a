//! Open transactions against a store and the row codec seam.
//!
//! A [`DatabaseHandle`] is what entity modules hold while loading or saving:
//! they pull rows and typed fields out of it, or push rows into it. The
//! handle keeps the codec-independent state (mode, file, line and token
//! counters, grammar version, write session) and delegates the byte-level
//! work to a backend's [`RowReader`] or [`RowWriter`].

use std::fmt;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{error, warn};

use crate::commit::WriteSession;
use crate::error::{DbError, DbResult};

/// Direction of a transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TransactionMode {
    Read,
    Write,
}

impl fmt::Display for TransactionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read => f.write_str("read"),
            Self::Write => f.write_str("write"),
        }
    }
}

/// Why a typed field read failed, before file/line context is attached.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FieldError {
    /// No token left on the row.
    Missing,
    /// The token is not a complete literal of the requested kind.
    Malformed { value: String, expected: &'static str },
}

/// Parse a whole token as a base-10 number.
///
/// Only ASCII digits are accepted, preceded by `-` when `signed`; anything
/// else, including trailing characters and out-of-range values, is
/// malformed.
pub fn parse_number<T: std::str::FromStr>(
    token: Option<&str>,
    signed: bool,
    expected: &'static str,
) -> Result<T, FieldError> {
    let token = token.ok_or(FieldError::Missing)?;
    let digits = match token.strip_prefix('-') {
        Some(rest) if signed => rest,
        _ => token,
    };
    let malformed = || FieldError::Malformed {
        value: token.to_string(),
        expected,
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(malformed());
    }
    token.parse().map_err(|_| malformed())
}

/// Backend-specific reading state for one open store.
pub trait RowReader {
    /// Advance to the next row. `Ok(false)` means clean end of input.
    ///
    /// A row that is not UTF-8 is reported as an `InvalidData` error wrapping
    /// the [`Utf8Error`](std::str::Utf8Error).
    fn read_next_row(&mut self) -> io::Result<bool>;

    /// Next space-delimited token of the current row.
    fn read_word(&mut self) -> Option<&str>;

    /// Rest of the current row, unsplit.
    fn read_str(&mut self) -> Option<&str>;

    fn read_int(&mut self) -> Result<i32, FieldError> {
        parse_number(self.read_word(), true, "integer")
    }

    fn read_uint(&mut self) -> Result<u32, FieldError> {
        parse_number(self.read_word(), false, "unsigned integer")
    }

    fn read_time(&mut self) -> Result<u64, FieldError> {
        parse_number(self.read_word(), false, "timestamp")
    }
}

/// Backend-specific writing state for one write session.
pub trait RowWriter {
    fn start_row(&mut self, row_type: &str) -> DbResult<()>;

    /// Write one token; `None` is written as the absent placeholder.
    fn write_word(&mut self, word: Option<&str>) -> DbResult<()>;

    /// Write the row's trailing free-text field.
    fn write_str(&mut self, text: Option<&str>) -> DbResult<()>;

    fn write_int(&mut self, n: i32) -> DbResult<()> {
        self.write_word(Some(&n.to_string()))
    }

    fn write_uint(&mut self, n: u32) -> DbResult<()> {
        self.write_word(Some(&n.to_string()))
    }

    fn write_time(&mut self, t: u64) -> DbResult<()> {
        self.write_word(Some(&t.to_string()))
    }

    fn commit_row(&mut self) -> DbResult<()>;

    /// Flush buffered output and hand back the file for committing.
    fn finish(self: Box<Self>) -> io::Result<File>;
}

enum Codec {
    Read(Box<dyn RowReader>),
    Write(Box<dyn RowWriter>, WriteSession),
}

/// One open transaction.
pub struct DatabaseHandle {
    mode: TransactionMode,
    file: PathBuf,
    line: u64,
    token: u32,
    version: u32,
    codec: Codec,
}

impl DatabaseHandle {
    /// Wrap a reader positioned before the first row.
    pub fn reader(file: impl Into<PathBuf>, reader: Box<dyn RowReader>, version: u32) -> Self {
        Self {
            mode: TransactionMode::Read,
            file: file.into(),
            line: 0,
            token: 0,
            version,
            codec: Codec::Read(reader),
        }
    }

    /// Wrap a writer whose output is committed through `session`.
    pub fn writer(
        file: impl Into<PathBuf>,
        writer: Box<dyn RowWriter>,
        session: WriteSession,
        version: u32,
    ) -> Self {
        Self {
            mode: TransactionMode::Write,
            file: file.into(),
            line: 0,
            token: 0,
            version,
            codec: Codec::Write(writer, session),
        }
    }

    pub fn mode(&self) -> TransactionMode {
        self.mode
    }

    /// Live path of the store this transaction belongs to.
    pub fn file(&self) -> &Path {
        &self.file
    }

    /// Rows read or committed so far.
    pub fn line(&self) -> u64 {
        self.line
    }

    /// Fields consumed from the current row.
    pub fn token(&self) -> u32 {
        self.token
    }

    /// Grammar version the store declares.
    pub fn grammar_version(&self) -> u32 {
        self.version
    }

    pub fn set_grammar_version(&mut self, version: u32) {
        self.version = version;
    }

    // ---------------------------------------------------------------
    // Reading
    // ---------------------------------------------------------------

    /// Advance to the next row; `Ok(false)` at clean end of file.
    ///
    /// An I/O failure here is [`DbError::ReadAborted`] and a row that is not
    /// UTF-8 is [`DbError::InvalidEncoding`]. Either way the rows read so far
    /// are an unknown prefix of the store.
    pub fn read_next_row(&mut self) -> DbResult<bool> {
        let reader = self.reader_mut()?;
        match reader.read_next_row() {
            Ok(true) => {
                self.line += 1;
                self.token = 0;
                Ok(true)
            }
            Ok(false) => Ok(false),
            Err(source) => {
                let line = self.line + 1;
                if let Some(bad) = source
                    .get_ref()
                    .and_then(|inner| inner.downcast_ref::<std::str::Utf8Error>())
                {
                    let column = bad.valid_up_to() + 1;
                    error!(
                        file = %self.file.display(),
                        line,
                        column,
                        "row is not valid UTF-8; abandoning load to avoid data loss"
                    );
                    return Err(DbError::InvalidEncoding {
                        file: self.file.clone(),
                        line,
                        column,
                    });
                }
                error!(
                    file = %self.file.display(),
                    line,
                    error = %source,
                    "read error; abandoning load to avoid data loss"
                );
                Err(DbError::ReadAborted {
                    file: self.file.clone(),
                    line,
                    source,
                })
            }
        }
    }

    /// Next token of the current row, or `None` past its end.
    pub fn read_word(&mut self) -> Option<&str> {
        let Codec::Read(reader) = &mut self.codec else {
            warn!(file = %self.file.display(), "read_word on a write handle");
            return None;
        };
        let word = reader.read_word();
        if word.is_some() {
            self.token += 1;
        }
        word
    }

    /// Remainder of the current row as one string.
    pub fn read_str(&mut self) -> Option<&str> {
        let Codec::Read(reader) = &mut self.codec else {
            warn!(file = %self.file.display(), "read_str on a write handle");
            return None;
        };
        let text = reader.read_str();
        if text.is_some() {
            self.token += 1;
        }
        text
    }

    /// Like [`read_word`](Self::read_word), but a missing token is an error.
    pub fn require_word(&mut self) -> DbResult<&str> {
        let missing = self.missing_field();
        self.read_word().ok_or(missing)
    }

    /// Like [`read_str`](Self::read_str), but a missing field is an error.
    pub fn require_str(&mut self) -> DbResult<&str> {
        let missing = self.missing_field();
        self.read_str().ok_or(missing)
    }

    fn missing_field(&self) -> DbError {
        DbError::MissingField {
            file: self.file.clone(),
            line: self.line,
            field: self.token + 1,
        }
    }

    pub fn read_int(&mut self) -> DbResult<i32> {
        let result = self.reader_mut()?.read_int();
        self.typed_field(result)
    }

    pub fn read_uint(&mut self) -> DbResult<u32> {
        let result = self.reader_mut()?.read_uint();
        self.typed_field(result)
    }

    pub fn read_time(&mut self) -> DbResult<u64> {
        let result = self.reader_mut()?.read_time();
        self.typed_field(result)
    }

    fn typed_field<T>(&mut self, result: Result<T, FieldError>) -> DbResult<T> {
        match result {
            Ok(value) => {
                self.token += 1;
                Ok(value)
            }
            Err(FieldError::Missing) => Err(self.missing_field()),
            Err(FieldError::Malformed { value, expected }) => {
                self.token += 1;
                Err(DbError::MalformedField {
                    file: self.file.clone(),
                    line: self.line,
                    field: self.token,
                    value,
                    expected,
                })
            }
        }
    }

    fn reader_mut(&mut self) -> DbResult<&mut Box<dyn RowReader>> {
        match &mut self.codec {
            Codec::Read(reader) => Ok(reader),
            Codec::Write(..) => Err(DbError::WrongMode {
                expected: TransactionMode::Read,
                actual: self.mode,
            }),
        }
    }

    // ---------------------------------------------------------------
    // Writing
    // ---------------------------------------------------------------

    pub fn start_row(&mut self, row_type: &str) -> DbResult<()> {
        self.token = 0;
        self.writer_mut()?.start_row(row_type)
    }

    /// Write one token. Pass `None` for an absent value.
    pub fn write_word<'a>(&mut self, word: impl Into<Option<&'a str>>) -> DbResult<()> {
        self.writer_mut()?.write_word(word.into())?;
        self.token += 1;
        Ok(())
    }

    /// Write the trailing free-text field. Nothing may follow it on the row.
    pub fn write_str<'a>(&mut self, text: impl Into<Option<&'a str>>) -> DbResult<()> {
        self.writer_mut()?.write_str(text.into())?;
        self.token += 1;
        Ok(())
    }

    pub fn write_int(&mut self, n: i32) -> DbResult<()> {
        self.writer_mut()?.write_int(n)?;
        self.token += 1;
        Ok(())
    }

    pub fn write_uint(&mut self, n: u32) -> DbResult<()> {
        self.writer_mut()?.write_uint(n)?;
        self.token += 1;
        Ok(())
    }

    pub fn write_time(&mut self, t: u64) -> DbResult<()> {
        self.writer_mut()?.write_time(t)?;
        self.token += 1;
        Ok(())
    }

    pub fn commit_row(&mut self) -> DbResult<()> {
        self.writer_mut()?.commit_row()?;
        self.line += 1;
        Ok(())
    }

    fn writer_mut(&mut self) -> DbResult<&mut Box<dyn RowWriter>> {
        match &mut self.codec {
            Codec::Write(writer, _) => Ok(writer),
            Codec::Read(_) => Err(DbError::WrongMode {
                expected: TransactionMode::Write,
                actual: self.mode,
            }),
        }
    }

    // ---------------------------------------------------------------
    // Ending the transaction
    // ---------------------------------------------------------------

    /// End the transaction. For a write handle this flushes the rows and
    /// atomically replaces the live file.
    pub fn commit(self) -> DbResult<()> {
        match self.codec {
            Codec::Read(_) => Ok(()),
            Codec::Write(writer, session) => match writer.finish() {
                Ok(file) => session.commit(file),
                Err(source) => {
                    let err = DbError::Commit {
                        from: session.paths().temp.clone(),
                        to: session.paths().live.clone(),
                        source,
                    };
                    session.abort();
                    Err(err)
                }
            },
        }
    }

    /// Abandon the transaction. A write handle's rows are discarded and the
    /// live file is left as it was.
    pub fn abort(self) {
        if let Codec::Write(writer, session) = self.codec {
            drop(writer);
            session.abort();
        }
    }
}

impl fmt::Debug for DatabaseHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseHandle")
            .field("mode", &self.mode)
            .field("file", &self.file)
            .field("line", &self.line)
            .field("token", &self.token)
            .field("version", &self.version)
            .finish()
    }
}
