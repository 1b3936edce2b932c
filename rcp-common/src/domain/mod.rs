pub mod approval;
pub mod audit;
pub mod credential;
pub mod device;
pub mod job;
pub mod plan;
pub mod rbac;
pub mod snapshot;

pub use approval::{ApprovalRequest, ApprovalRequestId, ApprovalStatus};
pub use audit::{Actor, AuditAction, AuditEvent, AuditEventId, AuditResult, ToolTier};
pub use credential::{Credential, CredentialId, CredentialKind};
pub use device::{Device, DeviceCapabilities, DeviceId, DeviceStatus, Environment, PollingState};
pub use job::{Job, JobId, JobStatus};
pub use plan::{DeviceApplyStatus, Plan, PlanId, PlanStatus, PrecheckResult, RiskLevel, RolloutParams};
pub use rbac::{Permission, Role, User};
pub use snapshot::{Snapshot, SnapshotId, SnapshotMeta, SnapshotSource};
