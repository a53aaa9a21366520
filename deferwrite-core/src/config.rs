// deferwrite-core/src/config.rs
// Unit-of-work execution options

use std::fmt;
use serde::{Serialize, Deserialize};

use crate::error::{Result, TxError};

/// Default number of attempts for TRANSACTION mode before a conflict is surfaced
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// How a unit of work is bound to the underlying store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Optimistic, retryable transaction with snapshot reads
    #[default]
    Transaction,
    /// Single atomic write batch, no isolation and no retry
    Batch,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Transaction => write!(f, "transaction"),
            Mode::Batch => write!(f, "batch"),
        }
    }
}

/// Options for a single `run` invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub mode: Mode,

    /// Upper bound on how often the engine re-invokes the unit of work
    /// after a conflict. Ignored in BATCH mode.
    pub max_attempts: u32,
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            mode: Mode::Transaction,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl RunConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transaction() -> Self {
        Self::default().with_mode(Mode::Transaction)
    }

    pub fn batch() -> Self {
        Self::default().with_mode(Mode::Batch)
    }

    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Parse from JSON; missing fields fall back to defaults
    pub fn from_json(json: &str) -> Result<Self> {
        let config: RunConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(TxError::InvalidConfig("max_attempts must be at least 1".into()));
        }
        Ok(())
    }
}
