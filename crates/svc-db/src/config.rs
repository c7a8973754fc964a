use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{DbError, DbResult};

/// Where the store lives and how it is written.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DbConfig {
    /// Directory holding the live, temporary and lock files.
    pub datadir: PathBuf,
    /// Store file name inside `datadir`.
    pub database: String,
    /// Backend selected at startup.
    pub backend: String,
    /// `fsync` the temporary file before it replaces the live one.
    pub fsync: bool,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            datadir: PathBuf::from("."),
            database: "services.db".into(),
            backend: "opensex".into(),
            fsync: true,
        }
    }
}

impl DbConfig {
    /// Read a TOML configuration file. Keys not present keep their defaults.
    pub fn load(path: &Path) -> DbResult<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    /// Parse a TOML document.
    pub fn from_toml(text: &str) -> DbResult<Self> {
        toml::from_str(text).map_err(|e| DbError::Config(e.to_string()))
    }

    /// Full path of the live store file.
    pub fn live_path(&self) -> PathBuf {
        self.datadir.join(&self.database)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let c = DbConfig::default();
        assert_eq!(c.database, "services.db");
        assert_eq!(c.backend, "opensex");
        assert!(c.fsync);
        assert_eq!(c.live_path(), PathBuf::from("./services.db"));
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let c = DbConfig::from_toml("datadir = \"/var/lib/services\"\nfsync = false\n").unwrap();
        assert_eq!(c.datadir, PathBuf::from("/var/lib/services"));
        assert!(!c.fsync);
        assert_eq!(c.database, "services.db");
    }

    #[test]
    fn bad_toml_is_config_error() {
        let err = DbConfig::from_toml("fsync = \"sometimes\"").unwrap_err();
        assert!(matches!(err, DbError::Config(_)));
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.toml");
        fs::write(&path, "database = \"network.db\"\n").unwrap();
        let c = DbConfig::load(&path).unwrap();
        assert_eq!(c.database, "network.db");
    }
}
