//! Context and recorder configuration.

use serde::{Deserialize, Serialize};
use tessel_core::{memory_budget, Result, TesselError};

/// Configuration of a [`Context`](crate::Context).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextOptions {
    /// Byte ceiling of the resource cache.
    pub gpu_budget_bytes: usize,
    /// Name used in logs.
    pub label: Option<String>,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            gpu_budget_bytes: memory_budget::GPU_CACHE_BUDGET,
            label: None,
        }
    }
}

impl ContextOptions {
    /// Parse options from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| TesselError::Config(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| TesselError::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.gpu_budget_bytes == 0 {
            return Err(TesselError::Config(
                "gpu_budget_bytes must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration of a [`Recorder`](crate::Recorder).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderOptions {
    pub label: Option<String>,
}
