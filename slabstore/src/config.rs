use serde::{Deserialize, Serialize};

/// Tunables for a `Session`.
///
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Size limit, in bytes, of the resolver's LRU cache of decoded nodes
    pub cache_bytes: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_bytes: 1 << 26,
        }
    }
}
