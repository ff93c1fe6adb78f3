//! Error types and result definitions for batch operations.
//!
//! [`BatchError`] carries a classification, a static description, optional dynamic detail
//! and the call site that raised it. Every [`ErrorKind`] maps to an HTTP-equivalent status
//! code and to an [`ErrorClass`] which decides how the coordinator settles a failed unit.

use std::backtrace::Backtrace;
use std::borrow::Cow;
use std::error;
use std::fmt;
use std::panic::Location;
use std::sync::Arc;

/// Convenient result type for batch operations using [`BatchError`] as the error type.
pub type BatchResult<T> = Result<T, BatchError>;

/// How a failed unit is reported once its outcome is settled.
#[derive(PartialEq, Eq, Copy, Clone, Debug, Hash)]
pub enum ErrorClass {
    /// Structured, status-carrying error raised intentionally by a unit.
    Domain,
    /// Synthetic error generated by the coordinator to stop a unit.
    Cancellation,
    /// Anything else. Wrapped into a generic internal error before settling.
    Internal,
}

/// Specific categories of errors that can occur while executing a batch.
#[derive(PartialEq, Eq, Copy, Clone, Debug, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    // Request errors
    ValidationError,
    MethodNotAllowed,

    // Resource errors
    NotFound,
    Conflict,

    // Cancellation errors
    SiblingCancelled,
    ClientCancelled,

    // Capacity errors
    Overloaded,
    StoreUnavailable,

    // Coordination errors
    HookFailed,
    InvalidState,
    UnitPanic,
    CoordinatorClosed,

    Internal,
}

impl ErrorKind {
    /// Returns the HTTP-equivalent status code of this kind.
    pub fn status(self) -> u16 {
        match self {
            ErrorKind::ValidationError => 400,
            ErrorKind::NotFound => 404,
            ErrorKind::MethodNotAllowed => 405,
            ErrorKind::Conflict => 409,
            // Accepted but not processed: the shared transaction was abandoned.
            ErrorKind::SiblingCancelled => 202,
            ErrorKind::ClientCancelled => 499,
            ErrorKind::Overloaded | ErrorKind::StoreUnavailable => 503,
            ErrorKind::HookFailed
            | ErrorKind::InvalidState
            | ErrorKind::UnitPanic
            | ErrorKind::CoordinatorClosed
            | ErrorKind::Internal => 500,
        }
    }

    /// Returns the [`ErrorClass`] of this kind.
    pub fn class(self) -> ErrorClass {
        match self {
            ErrorKind::SiblingCancelled | ErrorKind::ClientCancelled => ErrorClass::Cancellation,
            ErrorKind::HookFailed
            | ErrorKind::InvalidState
            | ErrorKind::UnitPanic
            | ErrorKind::CoordinatorClosed
            | ErrorKind::Internal => ErrorClass::Internal,
            ErrorKind::ValidationError
            | ErrorKind::MethodNotAllowed
            | ErrorKind::NotFound
            | ErrorKind::Conflict
            | ErrorKind::Overloaded
            | ErrorKind::StoreUnavailable => ErrorClass::Domain,
        }
    }
}

#[derive(Debug, Clone)]
struct ErrorInner {
    kind: ErrorKind,
    description: Cow<'static, str>,
    detail: Option<Cow<'static, str>>,
    source: Option<Arc<dyn error::Error + Send + Sync>>,
    location: &'static Location<'static>,
    backtrace: Arc<Backtrace>,
}

/// Main error type for batch operations.
///
/// Cloning is a reference count increment, so the same cancellation error can be delivered
/// into many suspended units.
#[derive(Debug, Clone)]
pub struct BatchError {
    inner: Arc<ErrorInner>,
}

impl BatchError {
    /// Returns the [`ErrorKind`] of this error.
    pub fn kind(&self) -> ErrorKind {
        self.inner.kind
    }

    /// Returns the HTTP-equivalent status code of this error.
    pub fn status(&self) -> u16 {
        self.kind().status()
    }

    /// Returns the [`ErrorClass`] of this error.
    pub fn class(&self) -> ErrorClass {
        self.kind().class()
    }

    /// Returns the static description of this error.
    pub fn description(&self) -> &str {
        &self.inner.description
    }

    /// Returns the dynamic detail of this error, if any.
    pub fn detail(&self) -> Option<&str> {
        self.inner.detail.as_deref()
    }

    /// Returns the call site that created this error.
    pub fn location(&self) -> &'static Location<'static> {
        self.inner.location
    }

    /// Attaches the originating error.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: error::Error + Send + Sync + 'static,
    {
        Arc::make_mut(&mut self.inner).source = Some(Arc::new(source));
        self
    }

    /// Wraps this error into a generic [`ErrorKind::Internal`] error.
    ///
    /// Errors that already are of kind [`ErrorKind::Internal`] are returned unchanged.
    #[track_caller]
    pub fn into_internal(self) -> BatchError {
        if self.kind() == ErrorKind::Internal {
            return self;
        }

        let detail = format!("{:?}: {}", self.kind(), self.description());
        BatchError::new(
            ErrorKind::Internal,
            Cow::Borrowed("Internal error"),
            Some(Cow::Owned(detail)),
        )
        .with_source(self)
    }

    #[track_caller]
    fn new(
        kind: ErrorKind,
        description: Cow<'static, str>,
        detail: Option<Cow<'static, str>>,
    ) -> Self {
        Self {
            inner: Arc::new(ErrorInner {
                kind,
                description,
                detail,
                source: None,
                location: Location::caller(),
                backtrace: Arc::new(Backtrace::capture()),
            }),
        }
    }
}

impl fmt::Display for BatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = &self.inner;
        write!(
            f,
            "[{:?}] {} @ {}:{}:{}",
            inner.kind,
            inner.description,
            inner.location.file(),
            inner.location.line(),
            inner.location.column()
        )?;

        if let Some(detail) = inner.detail.as_deref() {
            write_block(f, "Detail", detail)?;
        }

        let backtrace = inner.backtrace.to_string();
        if !backtrace.trim().is_empty() {
            write_block(f, "Backtrace", &backtrace)?;
        }

        Ok(())
    }
}

impl error::Error for BatchError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        self.inner
            .source
            .as_ref()
            .map(|source| source.as_ref() as &(dyn error::Error + 'static))
    }
}

/// Writes a titled block of lines, indented under the error headline.
fn write_block(f: &mut fmt::Formatter<'_>, title: &str, body: &str) -> fmt::Result {
    if body.trim().is_empty() {
        return write!(f, "\n  {title}: <empty>");
    }

    write!(f, "\n  {title}:")?;
    for line in body.lines() {
        if line.trim().is_empty() {
            write!(f, "\n    ")?;
        } else {
            write!(f, "\n    {line}")?;
        }
    }

    Ok(())
}

/// Creates a [`BatchError`] from an error kind and static description.
impl From<(ErrorKind, &'static str)> for BatchError {
    #[track_caller]
    fn from((kind, description): (ErrorKind, &'static str)) -> BatchError {
        BatchError::new(kind, Cow::Borrowed(description), None)
    }
}

/// Creates a [`BatchError`] from an error kind, static description, and dynamic detail.
impl<D> From<(ErrorKind, &'static str, D)> for BatchError
where
    D: Into<Cow<'static, str>>,
{
    #[track_caller]
    fn from((kind, description, detail): (ErrorKind, &'static str, D)) -> BatchError {
        BatchError::new(kind, Cow::Borrowed(description), Some(detail.into()))
    }
}
