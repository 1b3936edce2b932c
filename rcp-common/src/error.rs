//! Stable, machine-readable error catalog for the control plane.
//!
//! Every error surfaced across a tool invocation carries one of these codes
//! in `_meta.code` alongside a human message. Codes are never removed once
//! shipped; new failure modes get new variants.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable machine-readable error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    Validation,
    Authn,
    AuthzDenied,
    DeviceNotFound,
    EnvironmentMismatch,
    CapabilityDenied,
    DeviceUnreachable,
    PlanNotFound,
    PlanStateConflict,
    ApprovalExpired,
    ApprovalTokenInvalid,
    ApprovalRequestNotFound,
    SelfApproval,
    JobNotFound,
    JobStateConflict,
    RetriesExhausted,
    RollbackNotEnabled,
    NoPreviousState,
    Decryption,
    EncryptionKeyInsecure,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Validation => "VALIDATION",
            Self::Authn => "AUTHN",
            Self::AuthzDenied => "AUTHZ_DENIED",
            Self::DeviceNotFound => "DEVICE_NOT_FOUND",
            Self::EnvironmentMismatch => "ENVIRONMENT_MISMATCH",
            Self::CapabilityDenied => "CAPABILITY_DENIED",
            Self::DeviceUnreachable => "DEVICE_UNREACHABLE",
            Self::PlanNotFound => "PLAN_NOT_FOUND",
            Self::PlanStateConflict => "PLAN_STATE_CONFLICT",
            Self::ApprovalExpired => "APPROVAL_EXPIRED",
            Self::ApprovalTokenInvalid => "APPROVAL_TOKEN_INVALID",
            Self::ApprovalRequestNotFound => "APPROVAL_REQUEST_NOT_FOUND",
            Self::SelfApproval => "SELF_APPROVAL",
            Self::JobNotFound => "JOB_NOT_FOUND",
            Self::JobStateConflict => "JOB_STATE_CONFLICT",
            Self::RetriesExhausted => "RETRIES_EXHAUSTED",
            Self::RollbackNotEnabled => "ROLLBACK_NOT_ENABLED",
            Self::NoPreviousState => "NO_PREVIOUS_STATE",
            Self::Decryption => "DECRYPTION",
            Self::EncryptionKeyInsecure => "ENCRYPTION_KEY_INSECURE",
        };
        write!(f, "{s}")
    }
}

/// The core error type returned by every public operation in `rcp-core` and
/// `rcp-transport`. Carries a stable [`ErrorCode`] so callers at the tool
/// boundary can render `_meta.code` without string matching, and a
/// human-readable message that never contains secrets or raw exception text.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct CoreError {
    pub code: ErrorCode,
    pub message: String,
}

impl CoreError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Validation, message)
    }

    pub fn device_not_found(device_id: impl fmt::Display) -> Self {
        Self::new(ErrorCode::DeviceNotFound, format!("device not found: {device_id}"))
    }

    pub fn plan_not_found(plan_id: impl fmt::Display) -> Self {
        Self::new(ErrorCode::PlanNotFound, format!("plan not found: {plan_id}"))
    }

    pub fn job_not_found(job_id: impl fmt::Display) -> Self {
        Self::new(ErrorCode::JobNotFound, format!("job not found: {job_id}"))
    }

    pub fn approval_request_not_found(request_id: impl fmt::Display) -> Self {
        Self::new(ErrorCode::ApprovalRequestNotFound, format!("approval request not found: {request_id}"))
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
