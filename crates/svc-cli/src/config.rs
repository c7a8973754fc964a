use std::fs;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use svc_db::DbConfig;
use svc_object::RegistryConfig;

/// Settings file for `svcdb`. Both sections are optional.
///
/// ```toml
/// [database]
/// datadir = "/var/lib/services"
/// database = "services.db"
///
/// [registry]
/// metadata_block = 256
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    pub database: DbConfig,
    pub registry: RegistryConfig,
}

impl ToolConfig {
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = fs::read_to_string(path).with_context(|| format!("cannot read {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("invalid configuration in {}", path.display()))
    }
}
