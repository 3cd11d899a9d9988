use crate::types::Resource;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchErrorKind {
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("connection refused: {0}")]
    ConnectionRefused(String),
    #[error("HTTP status {status}{}", .message.as_ref().map(|m| format!(": {}", m)).unwrap_or_default())]
    HttpStatus { status: u16, message: Option<String> },
    #[error("malformed body: {0}")]
    MalformedBody(String),
    #[error("backend reported failure: {}", .message.as_deref().unwrap_or("no reason given"))]
    Rejected { message: Option<String> },
    #[error("transport error: {0}")]
    Transport(String),
}

/// A single resource call failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("failed to fetch {resource}: {kind}")]
pub struct FetchError {
    pub resource: Resource,
    pub kind: FetchErrorKind,
}

impl FetchError {
    pub fn new(resource: Resource, kind: FetchErrorKind) -> Self {
        Self { resource, kind }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self.kind, FetchErrorKind::Timeout(_))
    }
}

/// One of the three calls in an aggregation cycle failed, so no snapshot was built.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("aggregation failed on {failed_resource}: {cause}")]
pub struct AggregationError {
    pub failed_resource: Resource,
    #[source]
    pub cause: FetchError,
}

impl From<FetchError> for AggregationError {
    fn from(cause: FetchError) -> Self {
        Self {
            failed_resource: cause.resource,
            cause,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PollerError {
    #[error("poller has already been started")]
    AlreadyStarted,
}
