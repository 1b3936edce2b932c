//! Orchestration engine for the RouterOS fleet control plane: the
//! authorization gate, snapshot pipeline, health service, plan and job
//! services, rollout executor, approval workflow, and the audit/notification
//! sink. Per-topic tool bodies (firewall, DNS, routing, ...) live outside
//! this crate and reach it through the `ChangeService`/`BatchExecutor`
//! seams.

pub mod approval;
pub mod approval_token;
pub mod audit;
pub mod authz;
pub mod change_service;
pub mod health;
pub mod job;
pub mod metrics;
pub mod notify;
pub mod plan;
pub mod rollout;
pub mod snapshot;
pub mod store;

pub use approval::ApprovalWorkflow;
pub use approval_token::ApprovalTokenSigner;
pub use audit::{AuditEntry, AuditSink};
pub use authz::{authorize, ApplyBinding, AuthzDenial, ToolDescriptor};
pub use change_service::ChangeService;
pub use health::HealthService;
pub use job::{BatchExecutor, JobService};
pub use plan::{PlanService, RollbackSummary};
pub use rollout::{ApplySummaryCounts, RolloutExecutor, RolloutOutcome};
pub use store::Store;
