use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::device::{DeviceId, Environment};
use super::job::JobId;
use super::plan::PlanId;
use crate::opaque_id;

opaque_id!(AuditEventId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolTier {
    Fundamental,
    Advanced,
    Professional,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditResult {
    Success,
    Failure,
}

/// Audit action name. Kept as an open string (not a closed Rust enum)
/// because per-topic tool bodies outside this core mint their own action
/// names; the constants below cover every action this core emits itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuditAction(pub String);

impl AuditAction {
    pub const PLAN_CREATED: &'static str = "PLAN_CREATED";
    pub const PLAN_APPROVED: &'static str = "PLAN_APPROVED";
    pub const PLAN_STATUS_UPDATE: &'static str = "PLAN_STATUS_UPDATE";
    pub const PLAN_ROLLBACK_INITIATED: &'static str = "PLAN_ROLLBACK_INITIATED";
    pub const PLAN_ROLLBACK_COMPLETED: &'static str = "PLAN_ROLLBACK_COMPLETED";
    pub const AUTHZ_DENIED: &'static str = "AUTHZ_DENIED";
    pub const WRITE: &'static str = "WRITE";
    pub const READ_SENSITIVE: &'static str = "READ_SENSITIVE";
    pub const APPROVAL_REQUESTED: &'static str = "APPROVAL_REQUESTED";
    pub const APPROVAL_APPROVED: &'static str = "APPROVAL_APPROVED";
    pub const APPROVAL_REJECTED: &'static str = "APPROVAL_REJECTED";
    pub const JOB_CREATED: &'static str = "JOB_CREATED";
    pub const JOB_STATUS_UPDATE: &'static str = "JOB_STATUS_UPDATE";

    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for AuditAction {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Actor {
    pub sub: String,
    pub email: Option<String>,
    pub role: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: AuditEventId,
    pub timestamp: DateTime<Utc>,
    pub actor: Actor,
    pub device_id: Option<DeviceId>,
    pub environment: Option<Environment>,
    pub action: AuditAction,
    pub tool_name: Option<String>,
    pub tool_tier: Option<ToolTier>,
    pub plan_id: Option<PlanId>,
    pub job_id: Option<JobId>,
    pub result: AuditResult,
    pub metadata: serde_json::Value,
    pub error: Option<String>,
}
