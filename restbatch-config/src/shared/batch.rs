use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Limits applied to incoming batch requests.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct BatchConfig {
    /// Maximum number of sub-requests in one batch.
    #[serde(default = "default_max_requests")]
    pub max_requests: usize,
    /// Concurrency requested for each batch cohort. Falls back to the coordinator
    /// concurrency when absent.
    #[serde(default)]
    pub concurrency: Option<usize>,
}

impl BatchConfig {
    /// Default maximum number of sub-requests per batch.
    pub const DEFAULT_MAX_REQUESTS: usize = 100;

    /// Ensures `max_requests` and, when set, `concurrency` are non-zero.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_requests == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "batch.max_requests".to_string(),
                constraint: "must be greater than 0".to_string(),
            });
        }

        if self.concurrency == Some(0) {
            return Err(ValidationError::InvalidFieldValue {
                field: "batch.concurrency".to_string(),
                constraint: "must be greater than 0 when set".to_string(),
            });
        }

        Ok(())
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_requests: default_max_requests(),
            concurrency: None,
        }
    }
}

fn default_max_requests() -> usize {
    BatchConfig::DEFAULT_MAX_REQUESTS
}
