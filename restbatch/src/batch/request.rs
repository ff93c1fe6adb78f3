use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::coordinator::{ErrorBody, Settled};

/// HTTP method of a sub-request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Head,
    Options,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    /// Returns `true` for methods that never mutate a resource.
    pub fn is_safe(self) -> bool {
        matches!(self, Method::Get | Method::Head | Method::Options)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Options => "OPTIONS",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One request inside a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubRequest {
    pub method: Method,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

impl SubRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
        }
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }
}

/// Batch of sub-requests executed as one cohort.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRequest {
    pub requests: Vec<SubRequest>,
}

impl BatchRequest {
    pub fn new(requests: Vec<SubRequest>) -> Self {
        Self { requests }
    }

    /// Returns `true` if no sub-request mutates a resource.
    ///
    /// Failures in a read-only batch do not cancel the other sub-requests.
    pub fn is_read_only(&self) -> bool {
        self.requests.iter().all(|request| request.method.is_safe())
    }
}

/// Response of one sub-request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchResponseItem {
    pub status: u16,
    pub body: Value,
}

impl From<Settled<Value>> for BatchResponseItem {
    fn from(settled: Settled<Value>) -> Self {
        match settled {
            Settled::Fulfilled(body) => Self { status: 200, body },
            Settled::Rejected(reason) => {
                let body = ErrorBody::from(&reason);
                Self {
                    status: body.status,
                    body: serde_json::json!({
                        "kind": body.kind,
                        "message": body.message,
                        "detail": body.detail,
                    }),
                }
            }
        }
    }
}

/// Responses of a batch, in the order of its sub-requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchResponse {
    pub responses: Vec<BatchResponseItem>,
}
