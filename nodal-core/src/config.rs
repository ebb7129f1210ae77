use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::bpe::DEFAULT_SCRATCH_CAPACITY;
use crate::error::Result;
use crate::kernels::KernelRegistry;

pub const DEFAULT_TABLE_CAPACITY: usize = 1024;

/// Runtime knobs shared by the front end, benches and tests. Missing JSON
/// fields take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub table_capacity: usize,
    pub bpe_scratch_capacity: usize,
    pub accelerated: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            table_capacity: DEFAULT_TABLE_CAPACITY,
            bpe_scratch_capacity: DEFAULT_SCRATCH_CAPACITY,
            accelerated: true,
        }
    }
}

impl RuntimeConfig {
    pub fn from_path(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Kernel set selected by `accelerated`.
    pub fn registry(&self) -> KernelRegistry {
        if self.accelerated {
            KernelRegistry::accelerated()
        } else {
            KernelRegistry::generic()
        }
    }
}
