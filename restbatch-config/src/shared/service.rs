use serde::{Deserialize, Serialize};

use crate::Config;
use crate::shared::{AdmissionConfig, BatchConfig, CoordinatorConfig, ValidationError};

/// Root configuration of a batch service.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ServiceConfig {
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
    #[serde(default)]
    pub admission: AdmissionConfig,
    #[serde(default)]
    pub batch: BatchConfig,
}

impl ServiceConfig {
    /// Validates every section.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.coordinator.validate()?;
        self.admission.validate()?;
        self.batch.validate()
    }

    /// Returns the concurrency granted to each batch cohort.
    pub fn batch_concurrency(&self) -> usize {
        self.batch.concurrency.unwrap_or(self.coordinator.concurrency)
    }
}

impl Config for ServiceConfig {
    const LIST_PARSE_KEYS: &'static [&'static str] = &[];
}
