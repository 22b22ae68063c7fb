//! Dispatcher trait and typed operation outcomes.

use crate::error::TransportError;
use std::fmt;

/// Classification of a failed operation, as recorded in the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// HTTP 409
    Conflict,
    /// HTTP 404
    NotFound,
    /// Everything else
    Other,
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Conflict => write!(f, "conflict"),
            Self::NotFound => write!(f, "not found"),
            Self::Other => write!(f, "other"),
        }
    }
}

fn classify_status(status: u16) -> FailureClass {
    match status {
        409 => FailureClass::Conflict,
        404 => FailureClass::NotFound,
        _ => FailureClass::Other,
    }
}

/// Outcome of a create request. The response body on the success arms is
/// kept for diagnostics but ignored by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
    /// 201
    Created(String),
    /// 200
    Ok(String),
    /// 409
    Conflict,
    /// 413
    PayloadTooLarge,
    /// 403
    Forbidden,
    /// Any other status
    Other(u16),
}

impl CreateOutcome {
    /// Whether the object is now present on the server.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Created(_) | Self::Ok(_))
    }

    /// Audit classification; only meaningful for failures.
    pub fn failure_class(&self) -> FailureClass {
        match self {
            Self::Created(_) | Self::Ok(_) => FailureClass::Other,
            Self::Conflict => FailureClass::Conflict,
            Self::PayloadTooLarge => classify_status(413),
            Self::Forbidden => classify_status(403),
            Self::Other(status) => classify_status(*status),
        }
    }
}

/// Outcome of an update request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// 200
    Ok(String),
    /// 404
    NotFound,
    /// 403
    Forbidden,
    /// 413
    PayloadTooLarge,
    /// Any other status
    Other(u16),
}

impl UpdateOutcome {
    /// Whether the server accepted the new body.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Ok(_))
    }

    /// Audit classification; only meaningful for failures.
    pub fn failure_class(&self) -> FailureClass {
        match self {
            Self::Ok(_) => FailureClass::Other,
            Self::NotFound => FailureClass::NotFound,
            Self::Forbidden => classify_status(403),
            Self::PayloadTooLarge => classify_status(413),
            Self::Other(status) => classify_status(*status),
        }
    }
}

/// Outcome of a delete request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// 204
    NoContent,
    /// 404; the object is already gone, which is what a delete wanted
    NotFound,
    /// Any other status
    Other(u16),
}

impl DeleteOutcome {
    /// Whether the object is now absent from the server. A 404 counts.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::NoContent | Self::NotFound)
    }

    /// Audit classification; only meaningful for failures.
    pub fn failure_class(&self) -> FailureClass {
        match self {
            Self::NoContent => FailureClass::Other,
            Self::NotFound => FailureClass::NotFound,
            Self::Other(status) => classify_status(*status),
        }
    }
}

/// One HTTP request per operation against a SCIM endpoint.
///
/// Implementations return a typed outcome for anything the server answered,
/// and [`TransportError`] only when the channel itself is unusable (bad
/// certificate, connection refused); the orchestrator treats the latter as
/// fatal for the configuration file.
pub trait ScimDispatcher {
    /// `POST <base>/<endpoint>`.
    fn create(&mut self, endpoint: &str, body: &str) -> Result<CreateOutcome, TransportError>;

    /// `PUT <base>/<endpoint>/<uid>`.
    fn update(
        &mut self,
        endpoint: &str,
        uid: &str,
        body: &str,
    ) -> Result<UpdateOutcome, TransportError>;

    /// `DELETE <base>/<endpoint>/<uid>`.
    fn delete(&mut self, endpoint: &str, uid: &str) -> Result<DeleteOutcome, TransportError>;
}
