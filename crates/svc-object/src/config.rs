use serde::{Deserialize, Serialize};

/// Default number of metadata records reserved per pool growth step.
pub const DEFAULT_METADATA_BLOCK: usize = 1024;

/// Tuning knobs for a [`Registry`](crate::Registry).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Metadata records reserved up front and added each time the pool fills.
    pub metadata_block: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            metadata_block: DEFAULT_METADATA_BLOCK,
        }
    }
}
