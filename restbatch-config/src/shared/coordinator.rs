use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Settings of the cohort coordinator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CoordinatorConfig {
    /// Maximum number of units of a cohort awake at the same time within a phase.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl CoordinatorConfig {
    /// Default per-cohort concurrency.
    pub const DEFAULT_CONCURRENCY: usize = 8;

    /// Ensures `concurrency` is non-zero.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.concurrency == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "coordinator.concurrency".to_string(),
                constraint: "must be greater than 0".to_string(),
            });
        }

        Ok(())
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
        }
    }
}

fn default_concurrency() -> usize {
    CoordinatorConfig::DEFAULT_CONCURRENCY
}
