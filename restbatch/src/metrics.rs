//! Metrics definitions for batch coordination monitoring.

/// Label for the settled outcome of a unit (`fulfilled` or `rejected`).
pub const OUTCOME_LABEL: &str = "outcome";

/// Label for error kind in metrics.
pub const ERROR_KIND_LABEL: &str = "error_kind";

// Cohort metrics

/// Counter for cohorts submitted to the coordinator.
pub const RESTBATCH_COHORTS_TOTAL: &str = "restbatch_cohorts_total";

/// Counter for phases started across all cohorts.
pub const RESTBATCH_PHASES_TOTAL: &str = "restbatch_phases_total";

/// Counter for units settled, labelled by [`OUTCOME_LABEL`].
pub const RESTBATCH_UNITS_SETTLED_TOTAL: &str = "restbatch_units_settled_total";

/// Counter for sibling-cancellation broadcasts.
pub const RESTBATCH_SIBLING_CANCELLATIONS_TOTAL: &str = "restbatch_sibling_cancellations_total";

/// Counter for cohorts aborted as a whole, labelled by [`ERROR_KIND_LABEL`].
pub const RESTBATCH_COHORT_ABORTS_TOTAL: &str = "restbatch_cohort_aborts_total";

// Admission metrics

/// Counter for batches refused by the admission controller.
pub const RESTBATCH_ADMISSION_REJECTIONS_TOTAL: &str = "restbatch_admission_rejections_total";

/// Gauge for pipeline slots currently reserved.
pub const RESTBATCH_PIPELINES_IN_FLIGHT: &str = "restbatch_pipelines_in_flight";
