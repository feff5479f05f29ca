use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default distance between a return address and its call instruction.
pub const DEFAULT_RA_TO_CALLSITE_OFFSET: u64 = 1;

/// Name reported for nodes whose static structure is missing.
pub const UNKNOWN_NAME: &str = "<unknown>";

/// Per-tree settings.
///
/// Every field has a default, so `{}` is a valid JSON configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CctConfig {
    /// Subtracted from a call node's return address to report the call site.
    pub ra_to_callsite_offset: u64,
    /// Used by display accessors when no static structure is attached.
    pub placeholder_name: String,
}

impl CctConfig {
    pub fn from_json(data: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(data)?)
    }
}

impl Default for CctConfig {
    fn default() -> Self {
        Self {
            ra_to_callsite_offset: DEFAULT_RA_TO_CALLSITE_OFFSET,
            placeholder_name: UNKNOWN_NAME.to_string(),
        }
    }
}
