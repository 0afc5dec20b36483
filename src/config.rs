//! Engine configuration

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Runtime limits of a [`SongRenderer`](crate::engine::SongRenderer)
///
/// Every field has a default, so a TOML file only lists what it changes:
///
/// ```
/// use sonare::EngineConfig;
///
/// let config = EngineConfig::from_toml_str("worker_threads = 1").unwrap();
/// assert_eq!(config.worker_threads, 1);
/// assert_eq!(config.max_block_size, 512);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Worker threads in addition to the calling thread (0 = render inline)
    pub worker_threads: usize,
    /// Largest number of frames rendered in one parallel pass
    pub max_block_size: usize,
    /// Voice pool capacity per synth device
    pub max_voices: usize,
    /// Pending event slots per synth device
    pub max_events: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_threads: 3,
            max_block_size: 512,
            max_voices: 64,
            max_events: 64,
        }
    }
}

impl EngineConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: EngineConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_block_size == 0 {
            return Err(Error::Config("max_block_size must be at least 1".into()));
        }
        if self.max_voices == 0 {
            return Err(Error::Config("max_voices must be at least 1".into()));
        }
        if self.max_events == 0 {
            return Err(Error::Config("max_events must be at least 1".into()));
        }
        Ok(())
    }
}
