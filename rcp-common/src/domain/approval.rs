use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::plan::PlanId;
use crate::opaque_id;

opaque_id!(ApprovalRequestId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

/// Out-of-band human chain-of-custody object, separate from the plan's
/// in-plan approval token (see `rcp_core::approval`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: ApprovalRequestId,
    pub plan_id: PlanId,
    pub status: ApprovalStatus,
    pub requested_by: String,
    pub approver: Option<String>,
    pub requested_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
    pub note: Option<String>,
}
