use metrics::counter;
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};

use crate::batch_error;
use crate::error::{BatchError, BatchResult, ErrorClass, ErrorKind};
use crate::metrics::{OUTCOME_LABEL, RESTBATCH_UNITS_SETTLED_TOTAL};

/// Outcome of one unit, classified where its task finished.
#[derive(Debug)]
pub enum UnitOutcome<T> {
    /// The unit returned a value.
    Completed(T),
    /// The unit failed with a structured, status-carrying error. Cancellation errors
    /// generated by the coordinator are structured too and land here.
    DomainError(BatchError),
    /// The unit failed with anything else.
    InternalError(BatchError),
}

impl<T> UnitOutcome<T> {
    /// Classifies the result returned by a unit.
    pub fn from_result(result: BatchResult<T>) -> Self {
        match result {
            Ok(value) => UnitOutcome::Completed(value),
            Err(err) => match err.class() {
                ErrorClass::Domain | ErrorClass::Cancellation => UnitOutcome::DomainError(err),
                ErrorClass::Internal => UnitOutcome::InternalError(err),
            },
        }
    }
}

/// Uniform success/failure record of one unit.
#[derive(Debug, Clone)]
pub enum Settled<T> {
    Fulfilled(T),
    Rejected(BatchError),
}

impl<T> Settled<T> {
    /// Returns `true` if the unit completed.
    pub fn is_fulfilled(&self) -> bool {
        matches!(self, Settled::Fulfilled(_))
    }

    /// Returns the value of a fulfilled record.
    pub fn value(&self) -> Option<&T> {
        match self {
            Settled::Fulfilled(value) => Some(value),
            Settled::Rejected(_) => None,
        }
    }

    /// Returns the reason of a rejected record.
    pub fn reason(&self) -> Option<&BatchError> {
        match self {
            Settled::Fulfilled(_) => None,
            Settled::Rejected(reason) => Some(reason),
        }
    }

    /// Converts the record into a [`Result`].
    pub fn into_result(self) -> BatchResult<T> {
        match self {
            Settled::Fulfilled(value) => Ok(value),
            Settled::Rejected(reason) => Err(reason),
        }
    }
}

impl<T> From<UnitOutcome<T>> for Settled<T> {
    fn from(outcome: UnitOutcome<T>) -> Self {
        match outcome {
            UnitOutcome::Completed(value) => Settled::Fulfilled(value),
            UnitOutcome::DomainError(err) => Settled::Rejected(err),
            UnitOutcome::InternalError(err) => Settled::Rejected(err.into_internal()),
        }
    }
}

impl<T> Serialize for Settled<T>
where
    T: Serialize,
{
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut state = serializer.serialize_struct("Settled", 2)?;
        match self {
            Settled::Fulfilled(value) => {
                state.serialize_field("fulfilled", &true)?;
                state.serialize_field("value", value)?;
            }
            Settled::Rejected(reason) => {
                state.serialize_field("fulfilled", &false)?;
                state.serialize_field("reason", &ErrorBody::from(reason))?;
            }
        }
        state.end()
    }
}

/// Serializable summary of a [`BatchError`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub status: u16,
    pub kind: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl From<&BatchError> for ErrorBody {
    fn from(err: &BatchError) -> Self {
        Self {
            status: err.status(),
            kind: format!("{:?}", err.kind()),
            message: err.description().to_string(),
            detail: err.detail().map(str::to_string),
        }
    }
}

/// Materializes one settled record per unit, in submission order.
///
/// A unit without an outcome settles as an internal error. This only happens when the
/// coordinator lost track of the unit.
pub fn settle<T>(outcomes: Vec<Option<UnitOutcome<T>>>) -> Vec<Settled<T>> {
    outcomes
        .into_iter()
        .enumerate()
        .map(|(id, outcome)| {
            let settled = match outcome {
                Some(outcome) => Settled::from(outcome),
                None => Settled::Rejected(batch_error!(
                    ErrorKind::Internal,
                    "Operation unit was never settled",
                    id
                )),
            };

            let label = if settled.is_fulfilled() {
                "fulfilled"
            } else {
                "rejected"
            };
            counter!(RESTBATCH_UNITS_SETTLED_TOTAL, OUTCOME_LABEL => label).increment(1);

            settled
        })
        .collect()
}
