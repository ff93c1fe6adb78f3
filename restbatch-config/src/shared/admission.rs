use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Settings of the system-wide admission controller.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AdmissionConfig {
    /// Maximum number of pipeline slots in flight across the process.
    #[serde(default = "default_max_pipelines")]
    pub max_pipelines: usize,
}

impl AdmissionConfig {
    /// Default ceiling of pipeline slots.
    pub const DEFAULT_MAX_PIPELINES: usize = 256;

    /// Ensures `max_pipelines` is non-zero.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_pipelines == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "admission.max_pipelines".to_string(),
                constraint: "must be greater than 0".to_string(),
            });
        }

        Ok(())
    }
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            max_pipelines: default_max_pipelines(),
        }
    }
}

fn default_max_pipelines() -> usize {
    AdmissionConfig::DEFAULT_MAX_PIPELINES
}
