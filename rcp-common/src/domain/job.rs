use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::device::DeviceId;
use super::plan::PlanId;
use crate::opaque_id;

opaque_id!(JobId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Success,
    Failed,
    RolledBack,
    CompletedWithErrors,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Success | Self::Failed | Self::RolledBack | Self::CompletedWithErrors | Self::Cancelled
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::RolledBack => "rolled_back",
            Self::CompletedWithErrors => "completed_with_errors",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub plan_id: Option<PlanId>,
    pub job_type: String,
    pub status: JobStatus,
    pub device_ids: Vec<DeviceId>,
    pub attempts: u32,
    pub max_attempts: u32,
    pub next_run_at: DateTime<Utc>,
    pub progress_percent: u8,
    pub current_device_id: Option<DeviceId>,
    pub cancellation_requested: bool,
    pub result_summary: HashMap<DeviceId, serde_json::Value>,
    pub error_message: Option<String>,
}

impl Job {
    pub fn new(id: JobId, job_type: impl Into<String>, device_ids: Vec<DeviceId>, plan_id: Option<PlanId>, max_attempts: u32, next_run_at: DateTime<Utc>) -> Self {
        Self {
            id,
            plan_id,
            job_type: job_type.into(),
            status: JobStatus::Pending,
            device_ids,
            attempts: 0,
            max_attempts,
            next_run_at,
            progress_percent: 0,
            current_device_id: None,
            cancellation_requested: false,
            result_summary: HashMap::new(),
            error_message: None,
        }
    }
}
