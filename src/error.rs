use crate::types::{AgreementStatus, Role};
use std::fmt;

/// Coarse error classes surfaced to callers, one per HTTP-style status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Unauthenticated,
    Unauthorized,
    InvalidTransition,
    Validation,
    Conflict,
    NotFound,
    Unexpected,
}

impl ErrorKind {
    pub fn status_code(&self) -> u16 {
        match self {
            ErrorKind::Unauthenticated => 401,
            ErrorKind::Unauthorized => 403,
            ErrorKind::InvalidTransition | ErrorKind::Validation => 400,
            ErrorKind::NotFound => 404,
            ErrorKind::Conflict => 409,
            ErrorKind::Unexpected => 500,
        }
    }
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Unauthenticated => "unauthenticated",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::InvalidTransition => "invalid_transition",
            ErrorKind::Validation => "validation_error",
            ErrorKind::Conflict => "conflict",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Unexpected => "unexpected",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("Unauthenticated: no resolvable actor identity")]
    Unauthenticated,
    #[error("{0}")]
    Unauthorized(String),
    #[error("Action '{action}' is not enabled for the {role} while the agreement is {status}")]
    PermissionDenied {
        role: Role,
        status: AgreementStatus,
        action: String,
    },
    #[error("{0}")]
    IneligibleSigner(String),
    #[error("{0}")]
    SelfAction(String),
    #[error("{0}")]
    InvalidTransition(String),
    #[error("{0}")]
    InvalidAgreementState(String),
    #[error("{0}")]
    Validation(String),
    #[error("Already signed as {role} on version {version} of this agreement")]
    AlreadySigned { role: Role, version: u32 },
    #[error("Legal resolution already triggered. Case number: {case_number}")]
    AlreadyEscalated { case_number: String },
    #[error("There is already a pending amendment request")]
    AmendmentPending,
    #[error("{0}")]
    Conflict(String),
    #[error(
        "Agreement {agreement_id} was modified concurrently: expected revision {expected}, found {found}"
    )]
    ConcurrentModification {
        agreement_id: String,
        expected: u64,
        found: u64,
    },
    #[error("Agreement not found: {0}")]
    AgreementNotFound(String),
    #[error("{0}")]
    NotFound(String),
    #[error("storage failure: {0}")]
    Storage(String),
    #[error("codec failure: {0}")]
    Codec(String),
    #[error("audit trail integrity failure: {0}")]
    AuditIntegrity(String),
}

impl LifecycleError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LifecycleError::Unauthenticated => ErrorKind::Unauthenticated,
            LifecycleError::Unauthorized(_)
            | LifecycleError::PermissionDenied { .. }
            | LifecycleError::IneligibleSigner(_)
            | LifecycleError::SelfAction(_) => ErrorKind::Unauthorized,
            LifecycleError::InvalidTransition(_) | LifecycleError::InvalidAgreementState(_) => {
                ErrorKind::InvalidTransition
            }
            LifecycleError::Validation(_) => ErrorKind::Validation,
            LifecycleError::AlreadySigned { .. }
            | LifecycleError::AlreadyEscalated { .. }
            | LifecycleError::AmendmentPending
            | LifecycleError::Conflict(_)
            | LifecycleError::ConcurrentModification { .. } => ErrorKind::Conflict,
            LifecycleError::AgreementNotFound(_) | LifecycleError::NotFound(_) => {
                ErrorKind::NotFound
            }
            LifecycleError::Storage(_)
            | LifecycleError::Codec(_)
            | LifecycleError::AuditIntegrity(_) => ErrorKind::Unexpected,
        }
    }
}

impl From<sled::Error> for LifecycleError {
    fn from(value: sled::Error) -> Self {
        LifecycleError::Storage(value.to_string())
    }
}

impl From<minicbor::decode::Error> for LifecycleError {
    fn from(value: minicbor::decode::Error) -> Self {
        LifecycleError::Codec(value.to_string())
    }
}

/// The error half of an action response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorResponse {
    pub kind: ErrorKind,
    pub status: u16,
    pub message: String,
}

impl From<&LifecycleError> for ErrorResponse {
    fn from(value: &LifecycleError) -> Self {
        let kind = value.kind();
        Self {
            kind,
            status: kind.status_code(),
            message: value.to_string(),
        }
    }
}

impl From<LifecycleError> for ErrorResponse {
    fn from(value: LifecycleError) -> Self {
        ErrorResponse::from(&value)
    }
}
