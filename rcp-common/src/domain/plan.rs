use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::device::DeviceId;
use crate::opaque_id;

opaque_id!(PlanId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Pending,
    Approved,
    Executing,
    #[serde(alias = "applied")]
    Completed,
    Failed,
    Cancelled,
    RolledBack,
    CompletedWithErrors,
}

impl PlanStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Cancelled | Self::RolledBack | Self::CompletedWithErrors
        )
    }

    /// Valid state-machine edges. `applied` deserializes straight to
    /// `Completed` (see the `#[serde(alias)]` above), so this check never
    /// sees it as a distinct variant.
    pub fn can_transition_to(&self, next: Self) -> bool {
        use PlanStatus::*;
        if self.is_terminal() {
            return false;
        }
        matches!(
            (self, next),
            (Pending, Approved)
                | (Pending, Cancelled)
                | (Approved, Executing)
                | (Approved, Cancelled)
                | (Executing, Completed)
                | (Executing, CompletedWithErrors)
                | (Executing, Failed)
                | (Executing, RolledBack)
                | (Executing, Cancelled)
        )
    }
}

impl fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Executing => "executing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::RolledBack => "rolled_back",
            Self::CompletedWithErrors => "completed_with_errors",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceApplyStatus {
    Pending,
    Applying,
    Applied,
    Failed,
    RollingBack,
    RolledBack,
    RollbackFailed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrecheckResult {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl PrecheckResult {
    pub fn ok(&self) -> bool {
        self.errors.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RolloutParams {
    pub batch_size: usize,
    pub pause_seconds_between_batches: u64,
    pub rollback_on_failure: bool,
}

impl Default for RolloutParams {
    fn default() -> Self {
        Self {
            batch_size: 1,
            pause_seconds_between_batches: 0,
            rollback_on_failure: false,
        }
    }
}

/// A deployment plan. Immutable after creation except for `status` and
/// `device_statuses` (and the `previous_state` subtree of `changes`, written
/// during apply/rollback).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub id: PlanId,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub tool_name: String,
    pub status: PlanStatus,
    pub device_ids: Vec<DeviceId>,
    pub summary: String,
    pub changes: serde_json::Value,
    pub precheck: PrecheckResult,
    pub approval_token: String,
    pub approval_expires_at: DateTime<Utc>,
    pub approved_by: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub rollout: RolloutParams,
    pub device_statuses: HashMap<DeviceId, DeviceApplyStatus>,
    pub risk_level: RiskLevel,
}

impl Plan {
    /// The `previous_state` subtree of `changes`, keyed by device id,
    /// populated during apply and consumed during rollback.
    pub fn previous_state_for(&self, device_id: &DeviceId) -> Option<&serde_json::Value> {
        self.changes.get("previous_state")?.get(device_id.as_str())
    }

    pub fn set_previous_state(&mut self, device_id: &DeviceId, state: serde_json::Value) {
        let changes = self.changes.as_object_mut().expect("plan.changes must be a JSON object");
        let entry = changes
            .entry("previous_state")
            .or_insert_with(|| serde_json::Value::Object(Default::default()));
        entry
            .as_object_mut()
            .expect("previous_state must be a JSON object")
            .insert(device_id.as_str().to_string(), state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn applied_deserializes_to_completed_but_never_serializes_back() {
        let status: PlanStatus = serde_json::from_str("\"applied\"").unwrap();
        assert_eq!(status, PlanStatus::Completed);
        assert_eq!(serde_json::to_string(&status).unwrap(), "\"completed\"");
    }
}
