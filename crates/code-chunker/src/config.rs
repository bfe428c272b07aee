use crate::error::{ChunkerError, Result};
use serde::{Deserialize, Serialize};

/// Configuration for chunk planning
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ChunkerConfig {
    /// Character budget for one analysis unit (hard limit except for single over-long lines)
    pub max_unit_chars: usize,

    /// Lines repeated at the top of a continuation window of a split file
    pub overlap_lines: usize,

    /// Exclude patterns applied while iterating (globs or path prefixes)
    pub exclude: Vec<String>,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            max_unit_chars: 12_000,
            overlap_lines: 20,
            exclude: Vec::new(),
        }
    }
}

impl ChunkerConfig {
    /// Small units, handy for models with short context windows
    pub fn for_small_context() -> Self {
        Self {
            max_unit_chars: 4_000,
            overlap_lines: 10,
            ..Default::default()
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.max_unit_chars == 0 {
            return Err(ChunkerError::invalid_config("max_unit_chars must be > 0"));
        }
        Ok(())
    }
}
