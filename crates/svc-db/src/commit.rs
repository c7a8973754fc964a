//! Crash-safe replacement of the live store.
//!
//! A write session never touches the live file. It writes a temporary sibling
//! and, once every row is out, renames it over the live path; a reader sees
//! either the complete old file or the complete new one.
//!
//! ```text
//! <name>        live file, authoritative
//! <name>.new    in-flight write target; stale if found at startup
//! <name>.lock   advisory lock serializing writers across processes
//! ```
//!
//! Session states: `begin` (lock held, temp created) → rows written by the
//! codec → `commit` (fsync, rename, hook, unlock) or `abort` (temp removed,
//! unlock). Dropping a session without either behaves like a crash: the lock
//! is released with the file descriptor and the temp file stays behind.

use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use fs2::FileExt;
use tracing::{debug, error, info, warn};

use crate::error::{DbError, DbResult};

/// Notified after a write session has replaced the live file.
///
/// Only a successful rename triggers the hook. It is not called when the
/// fsync or rename fails, nor when the session is aborted.
pub trait CommitHook: Send + Sync {
    fn database_saved(&self, path: &Path);
}

/// Hook that does nothing.
pub struct NoOpHook;

impl CommitHook for NoOpHook {
    fn database_saved(&self, _path: &Path) {}
}

/// The three files making up one store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StorePaths {
    pub live: PathBuf,
    pub temp: PathBuf,
    pub lock: PathBuf,
}

impl StorePaths {
    pub fn new(live: impl Into<PathBuf>) -> Self {
        let live = live.into();
        Self {
            temp: with_suffix(&live, ".new"),
            lock: with_suffix(&live, ".lock"),
            live,
        }
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// An open write transaction: holds the lock until committed or aborted.
pub struct WriteSession {
    paths: StorePaths,
    lock: Option<File>,
    fsync: bool,
    hook: Arc<dyn CommitHook>,
}

impl WriteSession {
    /// Lock the store and create the temporary file.
    ///
    /// Blocks for as long as another writer holds the lock.
    pub fn begin(paths: StorePaths, fsync: bool, hook: Arc<dyn CommitHook>) -> DbResult<(Self, File)> {
        let lock = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&paths.lock)
            .map_err(|source| DbError::Lock {
                path: paths.lock.clone(),
                source,
            })?;

        debug!(lock = %paths.lock.display(), "acquiring store lock");
        FileExt::lock_exclusive(&lock).map_err(|source| DbError::Lock {
            path: paths.lock.clone(),
            source,
        })?;

        let temp = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&paths.temp);

        let mut session = Self {
            paths,
            lock: Some(lock),
            fsync,
            hook,
        };

        match temp {
            Ok(file) => {
                debug!(temp = %session.paths.temp.display(), "write session started");
                Ok((session, file))
            }
            Err(source) => {
                error!(
                    path = %session.paths.temp.display(),
                    error = %source,
                    "cannot open database for writing"
                );
                session.unlock();
                Err(DbError::OpenForWrite {
                    path: session.paths.temp.clone(),
                    source,
                })
            }
        }
    }

    pub fn paths(&self) -> &StorePaths {
        &self.paths
    }

    /// Replace the live file with the finished temporary file.
    ///
    /// On failure the temporary file is removed, the lock released and the
    /// live file left as it was.
    pub fn commit(mut self, file: File) -> DbResult<()> {
        let outcome = self.install(file);
        match &outcome {
            Ok(()) => {
                info!(path = %self.paths.live.display(), "database saved");
                self.hook.database_saved(&self.paths.live);
            }
            Err(e) => {
                error!(path = %self.paths.live.display(), error = %e, "database save failed");
                self.remove_temp();
            }
        }
        self.unlock();
        outcome
    }

    /// Discard the session. The live file is untouched.
    pub fn abort(mut self) {
        warn!(path = %self.paths.live.display(), "write session aborted");
        self.remove_temp();
        self.unlock();
    }

    fn install(&self, file: File) -> DbResult<()> {
        let commit_error = |source: io::Error| DbError::Commit {
            from: self.paths.temp.clone(),
            to: self.paths.live.clone(),
            source,
        };

        if self.fsync {
            file.sync_all().map_err(commit_error)?;
        }
        drop(file);

        fs::rename(&self.paths.temp, &self.paths.live).map_err(commit_error)?;

        if self.fsync {
            // Make the rename itself durable. Not every platform can open a
            // directory for syncing, so this is best effort.
            if let Some(dir) = self.paths.live.parent().filter(|p| !p.as_os_str().is_empty()) {
                if let Ok(dir) = File::open(dir) {
                    let _ = dir.sync_all();
                }
            }
        }
        Ok(())
    }

    fn remove_temp(&self) {
        match fs::remove_file(&self.paths.temp) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.paths.temp.display(), error = %e, "cannot remove temporary database"),
        }
    }

    fn unlock(&mut self) {
        if let Some(lock) = self.lock.take() {
            let _ = FileExt::unlock(&lock);
            debug!(lock = %self.paths.lock.display(), "store lock released");
        }
    }
}

impl Drop for WriteSession {
    fn drop(&mut self) {
        if self.lock.is_some() {
            warn!(
                temp = %self.paths.temp.display(),
                "write session dropped without commit; live database unchanged"
            );
            self.unlock();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingHook {
        saved: Mutex<Vec<PathBuf>>,
    }

    impl CommitHook for RecordingHook {
        fn database_saved(&self, path: &Path) {
            self.saved.lock().unwrap().push(path.to_path_buf());
        }
    }

    #[test]
    fn sidecar_paths() {
        let paths = StorePaths::new("/data/services.db");
        assert_eq!(paths.temp, PathBuf::from("/data/services.db.new"));
        assert_eq!(paths.lock, PathBuf::from("/data/services.db.lock"));
    }

    #[test]
    fn commit_replaces_live_and_fires_hook() {
        let dir = tempfile::tempdir().unwrap();
        let paths = StorePaths::new(dir.path().join("services.db"));
        fs::write(&paths.live, "old\n").unwrap();
        let hook = Arc::new(RecordingHook::default());

        let (session, mut file) = WriteSession::begin(paths.clone(), true, hook.clone()).unwrap();
        file.write_all(b"new\n").unwrap();
        session.commit(file).unwrap();

        assert_eq!(fs::read_to_string(&paths.live).unwrap(), "new\n");
        assert!(!paths.temp.exists());
        assert_eq!(*hook.saved.lock().unwrap(), vec![paths.live.clone()]);
    }

    #[test]
    fn abort_leaves_live_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let paths = StorePaths::new(dir.path().join("services.db"));
        fs::write(&paths.live, "old\n").unwrap();
        let hook = Arc::new(RecordingHook::default());

        let (session, mut file) = WriteSession::begin(paths.clone(), false, hook.clone()).unwrap();
        file.write_all(b"half a row").unwrap();
        session.abort();

        assert_eq!(fs::read_to_string(&paths.live).unwrap(), "old\n");
        assert!(!paths.temp.exists());
        assert!(hook.saved.lock().unwrap().is_empty());
    }

    #[test]
    fn temp_open_failure_releases_lock() {
        let dir = tempfile::tempdir().unwrap();
        let paths = StorePaths::new(dir.path().join("services.db"));
        fs::create_dir(&paths.temp).unwrap();

        let err = WriteSession::begin(paths.clone(), false, Arc::new(NoOpHook)).err().unwrap();
        assert!(matches!(err, DbError::OpenForWrite { .. }));

        // The lock must be free again, otherwise this would block forever.
        fs::remove_dir(&paths.temp).unwrap();
        let (session, file) = WriteSession::begin(paths, false, Arc::new(NoOpHook)).unwrap();
        session.commit(file).unwrap();
    }

    #[test]
    fn rename_failure_keeps_live() {
        let dir = tempfile::tempdir().unwrap();
        let paths = StorePaths::new(dir.path().join("services.db"));
        // A non-empty directory cannot be replaced by a file.
        fs::create_dir(&paths.live).unwrap();
        fs::write(paths.live.join("keep"), "x").unwrap();
        let hook = Arc::new(RecordingHook::default());

        let (session, file) = WriteSession::begin(paths.clone(), false, hook.clone()).unwrap();
        let err = session.commit(file).unwrap_err();

        assert!(matches!(err, DbError::Commit { .. }));
        assert!(paths.live.join("keep").exists());
        assert!(!paths.temp.exists());
        assert!(hook.saved.lock().unwrap().is_empty());

        let (session, _file) = WriteSession::begin(paths, false, Arc::new(NoOpHook)).unwrap();
        session.abort();
    }

    #[test]
    fn dropped_session_behaves_like_crash() {
        let dir = tempfile::tempdir().unwrap();
        let paths = StorePaths::new(dir.path().join("services.db"));
        fs::write(&paths.live, "old\n").unwrap();

        {
            let (_session, mut file) = WriteSession::begin(paths.clone(), false, Arc::new(NoOpHook)).unwrap();
            file.write_all(b"GRVER 1\npartial").unwrap();
        }

        assert_eq!(fs::read_to_string(&paths.live).unwrap(), "old\n");
        assert!(paths.temp.exists());

        // Lock was released with the session.
        let (session, file) = WriteSession::begin(paths.clone(), false, Arc::new(NoOpHook)).unwrap();
        session.commit(file).unwrap();
        assert!(!paths.temp.exists());
    }
}
