use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{DflError, Result};

/// Engine-level resource configuration shared by every iteration job.
///
/// Job parameters (parallelism, round cap, inputs) live on the iteration
/// plan; this struct only carries memory and spill knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Budget shared by all partitions of all running jobs.
    pub mem_budget_bytes: usize,
    /// Per-partition request for the solution set hash table.
    pub solution_set_memory_bytes: usize,
    /// Per-partition request for the round-local sort buffer.
    pub sort_memory_bytes: usize,
    /// Number of hash buckets (spill units) per solution set partition.
    pub solution_set_buckets: usize,
    /// Records per exchange message between head and intermediate.
    pub exchange_batch_records: usize,
    /// Root directory for spill files.
    pub spill_dir: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mem_budget_bytes: 512 * 1024 * 1024,
            solution_set_memory_bytes: 64 * 1024 * 1024,
            sort_memory_bytes: 32 * 1024 * 1024,
            solution_set_buckets: 32,
            exchange_batch_records: 1024,
            spill_dir: ".dfl_spill".to_string(),
        }
    }
}

impl EngineConfig {
    /// Load a config from a JSON file; absent fields keep their defaults.
    pub fn load_from_json(path: impl AsRef<Path>) -> Result<Self> {
        let s = fs::read_to_string(path.as_ref())?;
        let config: EngineConfig =
            serde_json::from_str(&s).map_err(|e| DflError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the runtime cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.solution_set_buckets == 0 {
            return Err(DflError::InvalidConfig(
                "solution_set_buckets must be at least 1".to_string(),
            ));
        }
        if self.exchange_batch_records == 0 {
            return Err(DflError::InvalidConfig(
                "exchange_batch_records must be at least 1".to_string(),
            ));
        }
        if self.spill_dir.trim().is_empty() {
            return Err(DflError::InvalidConfig("spill_dir must not be empty".to_string()));
        }
        Ok(())
    }
}
