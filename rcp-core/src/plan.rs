//! Plan Service: creation, pre-checks, approval, the state machine, and
//! rollback. A plan is immutable after creation except for its status,
//! its per-device status map, and the `previous_state` subtree written
//! during apply/rollback.

use std::collections::HashMap;

use chrono::{Duration as ChronoDuration, Utc};
use rcp_common::domain::device::{Device, DeviceStatus, Environment};
use rcp_common::domain::plan::{DeviceApplyStatus, Plan, PlanId, PlanStatus, PrecheckResult, RiskLevel, RolloutParams};
use rcp_common::domain::rbac::User;
use rcp_common::domain::{Actor, AuditAction, AuditResult, DeviceId, ToolTier};
use rcp_common::error::{CoreError, CoreResult, ErrorCode};
use rcp_common::ids::new_plan_id;
use subtle::ConstantTimeEq;

use crate::approval_token::ApprovalTokenSigner;
use crate::audit::{AuditEntry, AuditSink};
use crate::authz::{self, ToolDescriptor};
use crate::change_service::ChangeService;
use crate::store::{PlanFilter, Store};

const APPROVAL_TOKEN_TTL_MINUTES: i64 = 15;
const MIN_BATCH_DEVICES: usize = 2;
const MAX_BATCH_DEVICES: usize = 50;

#[derive(Debug, Clone)]
pub struct RollbackSummary {
    pub attempted: usize,
    pub rolled_back: usize,
    pub rollback_failed: usize,
}

/// Caller identity plus the tool metadata the authorization gate needs.
/// Built by whatever drives the plan/apply call (the per-topic tool body)
/// and threaded straight into `authz::authorize` for every targeted device.
pub struct ToolInvocation<'a> {
    pub user: &'a User,
    pub tier: ToolTier,
    pub topic: Option<&'a str>,
    pub cross_environment: bool,
}

pub struct PlanService {
    store: Store,
    signer: ApprovalTokenSigner,
    audit: AuditSink,
    environment: Environment,
    allow_prod_writes: bool,
}

impl PlanService {
    pub fn new(store: Store, signer: ApprovalTokenSigner, audit: AuditSink, environment: Environment, allow_prod_writes: bool) -> Self {
        Self {
            store,
            signer,
            audit,
            environment,
            allow_prod_writes,
        }
    }

    /// Runs the gate (`rcp_core::authz`) against every targeted device,
    /// short-circuiting and auditing `AUTHZ_DENIED` on the first denial.
    /// Invoked before a plan is created and before one is applied, per the
    /// "before every tool body" contract.
    async fn authorize_devices(&self, tool_name: &str, invocation: &ToolInvocation<'_>, devices: &[Device], is_apply: bool) -> CoreResult<()> {
        let tool = ToolDescriptor {
            name: tool_name,
            tier: invocation.tier,
            topic: invocation.topic,
            cross_environment: invocation.cross_environment,
            is_apply,
            is_approval_action: false,
        };
        let actor = Actor {
            sub: invocation.user.sub.clone(),
            email: None,
            role: invocation.user.role.clone(),
        };
        for device in devices {
            if let Err(denial) = authz::authorize(invocation.user, &tool, device, self.environment, self.allow_prod_writes, None) {
                self.audit
                    .record(
                        AuditEntry::new(actor, AuditAction::AUTHZ_DENIED, AuditResult::Failure)
                            .with_device(device.id.clone())
                            .with_error(denial.reason.clone()),
                    )
                    .await;
                return Err(CoreError::new(denial.code, denial.reason));
            }
        }
        Ok(())
    }

    fn run_prechecks(devices: &[Device], risk_level: RiskLevel) -> PrecheckResult {
        let mut result = PrecheckResult::default();
        for device in devices {
            if device.status == DeviceStatus::Unreachable || device.status == DeviceStatus::Decommissioned || !device.capabilities.professional_workflows {
                result.errors.push(format!("device {} is unreachable, decommissioned, or lacks professional-workflow capability", device.id));
            }
            if device.status == DeviceStatus::Degraded {
                result.warnings.push(format!("device {} is currently degraded", device.id));
            }
            if risk_level == RiskLevel::High && device.environment == Environment::Prod {
                result.warnings.push(format!("high-risk change targeting production device {}", device.id));
            }
        }
        result
    }

    async fn load_devices(&self, device_ids: &[DeviceId]) -> CoreResult<Vec<Device>> {
        if device_ids.is_empty() {
            return Err(CoreError::validation("device_ids must not be empty"));
        }
        let mut devices = Vec::with_capacity(device_ids.len());
        for id in device_ids {
            let device = self.store.get_device(id).await.ok_or_else(|| CoreError::device_not_found(id))?;
            devices.push(device);
        }
        Ok(devices)
    }

    /// Single or multi-device plan with default rollout parameters
    /// (`batch_size=1`, no inter-batch pause, rollback disabled).
    #[allow(clippy::too_many_arguments)]
    pub async fn create_plan(
        &self,
        tool_name: impl Into<String>,
        created_by: impl Into<String>,
        device_ids: Vec<DeviceId>,
        summary: impl Into<String>,
        changes: serde_json::Value,
        risk_level: RiskLevel,
        invocation: ToolInvocation<'_>,
    ) -> CoreResult<Plan> {
        let tool_name = tool_name.into();
        let created_by = created_by.into();
        let summary = summary.into();
        let rollout = RolloutParams {
            batch_size: device_ids.len().max(1),
            ..RolloutParams::default()
        };
        self.create_plan_inner(tool_name, created_by, device_ids, summary, changes, risk_level, rollout, invocation).await
    }

    /// Requires at least 2 and at most 50 devices sharing one environment;
    /// `batch_size` must fall in `[1, device_count]`.
    #[allow(clippy::too_many_arguments)]
    pub async fn create_multi_device_plan(
        &self,
        tool_name: impl Into<String>,
        created_by: impl Into<String>,
        device_ids: Vec<DeviceId>,
        summary: impl Into<String>,
        changes: serde_json::Value,
        risk_level: RiskLevel,
        batch_size: usize,
        pause_seconds_between_batches: u64,
        rollback_on_failure: bool,
        invocation: ToolInvocation<'_>,
    ) -> CoreResult<(Plan, Vec<Vec<DeviceId>>)> {
        if device_ids.len() < MIN_BATCH_DEVICES || device_ids.len() > MAX_BATCH_DEVICES {
            return Err(CoreError::validation(format!(
                "multi-device plans require between {MIN_BATCH_DEVICES} and {MAX_BATCH_DEVICES} devices, got {}",
                device_ids.len()
            )));
        }
        if batch_size == 0 || batch_size > device_ids.len() {
            return Err(CoreError::validation(format!("batch_size must be in [1, {}]", device_ids.len())));
        }

        let devices = self.load_devices(&device_ids).await?;
        let first_env = devices[0].environment;
        if devices.iter().any(|d| d.environment != first_env) {
            return Err(CoreError::new(ErrorCode::EnvironmentMismatch, "all devices in a multi-device plan must share one environment"));
        }

        let rollout = RolloutParams {
            batch_size,
            pause_seconds_between_batches,
            rollback_on_failure,
        };
        let tool_name = tool_name.into();
        let plan = self
            .create_plan_inner(tool_name, created_by.into(), device_ids.clone(), summary.into(), changes, risk_level, rollout, invocation)
            .await?;
        let batches = device_ids.chunks(batch_size).map(|c| c.to_vec()).collect();
        Ok((plan, batches))
    }

    #[allow(clippy::too_many_arguments)]
    async fn create_plan_inner(
        &self,
        tool_name: String,
        created_by: String,
        device_ids: Vec<DeviceId>,
        summary: String,
        changes: serde_json::Value,
        risk_level: RiskLevel,
        rollout: RolloutParams,
        invocation: ToolInvocation<'_>,
    ) -> CoreResult<Plan> {
        let actor = Actor {
            sub: created_by.clone(),
            email: None,
            role: "system".to_string(),
        };

        let devices = match self.load_devices(&device_ids).await {
            Ok(devices) => devices,
            Err(err) => {
                self.audit
                    .record(AuditEntry::new(actor, AuditAction::PLAN_CREATED, AuditResult::Failure).with_error(err.to_string()))
                    .await;
                return Err(err);
            }
        };

        self.authorize_devices(&tool_name, &invocation, &devices, false).await?;

        let precheck = Self::run_prechecks(&devices, risk_level);
        if !precheck.ok() {
            let err = CoreError::validation(format!("plan pre-checks failed: {}", precheck.errors.join("; ")));
            self.audit
                .record(AuditEntry::new(actor, AuditAction::PLAN_CREATED, AuditResult::Failure).with_error(err.to_string()))
                .await;
            return Err(err);
        }

        let now = Utc::now();
        let plan_id = PlanId::new(new_plan_id(now));
        let expires_at = now + ChronoDuration::minutes(APPROVAL_TOKEN_TTL_MINUTES);
        let token = self.signer.issue(&plan_id, &created_by, expires_at);

        let device_statuses: HashMap<DeviceId, DeviceApplyStatus> = device_ids.iter().cloned().map(|id| (id, DeviceApplyStatus::Pending)).collect();

        let plan = Plan {
            id: plan_id.clone(),
            created_by,
            created_at: now,
            tool_name,
            status: PlanStatus::Pending,
            device_ids,
            summary,
            changes,
            precheck,
            approval_token: token,
            approval_expires_at: expires_at,
            approved_by: None,
            approved_at: None,
            rollout,
            device_statuses,
            risk_level,
        };
        self.store.put_plan(plan.clone()).await;

        self.audit
            .record(AuditEntry::new(actor, AuditAction::PLAN_CREATED, AuditResult::Success).with_plan(plan_id))
            .await;

        Ok(plan)
    }

    pub async fn get_plan(&self, plan_id: &PlanId) -> CoreResult<Plan> {
        self.store.get_plan(plan_id).await.ok_or_else(|| CoreError::plan_not_found(plan_id))
    }

    pub async fn list_plans(&self, filter: &PlanFilter) -> Vec<Plan> {
        self.store.list_plans(filter).await
    }

    pub async fn approve_plan(&self, plan_id: &PlanId, token: &str, approver: impl Into<String>) -> CoreResult<Plan> {
        let approver = approver.into();
        let actor = Actor {
            sub: approver.clone(),
            email: None,
            role: "approver".to_string(),
        };
        let mut plan = self.get_plan(plan_id).await?;

        if plan.status != PlanStatus::Pending {
            let err = CoreError::new(ErrorCode::PlanStateConflict, format!("plan {plan_id} is not pending (status={})", plan.status));
            self.audit
                .record(AuditEntry::new(actor, AuditAction::PLAN_APPROVED, AuditResult::Failure).with_plan(plan_id.clone()).with_error(err.to_string()))
                .await;
            return Err(err);
        }

        let tokens_match: bool = token.as_bytes().ct_eq(plan.approval_token.as_bytes()).into();
        if !tokens_match {
            let err = CoreError::new(ErrorCode::ApprovalTokenInvalid, "supplied approval token does not match the plan's token");
            self.audit
                .record(AuditEntry::new(actor, AuditAction::PLAN_APPROVED, AuditResult::Failure).with_plan(plan_id.clone()).with_error(err.to_string()))
                .await;
            return Err(err);
        }
        if Utc::now() > plan.approval_expires_at {
            let err = CoreError::new(ErrorCode::ApprovalExpired, "approval token has expired");
            self.audit
                .record(AuditEntry::new(actor, AuditAction::PLAN_APPROVED, AuditResult::Failure).with_plan(plan_id.clone()).with_error(err.to_string()))
                .await;
            return Err(err);
        }

        plan.status = PlanStatus::Approved;
        plan.approved_by = Some(approver);
        plan.approved_at = Some(Utc::now());
        self.store.put_plan(plan.clone()).await;

        self.audit
            .record(AuditEntry::new(actor, AuditAction::PLAN_APPROVED, AuditResult::Success).with_plan(plan_id.clone()))
            .await;

        Ok(plan)
    }

    /// Applies the state-machine transition and audits `PLAN_STATUS_UPDATE`
    /// with both the old and new status. Used by the rollout executor as
    /// well as directly by callers driving manual cancellation.
    pub async fn transition_status(&self, plan_id: &PlanId, next: PlanStatus, actor: Actor) -> CoreResult<Plan> {
        let mut plan = self.get_plan(plan_id).await?;
        let previous = plan.status;
        if !previous.can_transition_to(next) {
            return Err(CoreError::new(ErrorCode::PlanStateConflict, format!("plan {plan_id} cannot move from {previous} to {next}")));
        }
        plan.status = next;
        self.store.put_plan(plan.clone()).await;
        self.audit
            .record(
                AuditEntry::new(actor, AuditAction::PLAN_STATUS_UPDATE, AuditResult::Success)
                    .with_plan(plan_id.clone())
                    .with_metadata(serde_json::json!({ "from": previous.to_string(), "to": next.to_string() })),
            )
            .await;
        Ok(plan)
    }

    /// Requires the plan be `executing` with `rollback_on_failure=true`.
    /// Every device currently `applied` has its change inverted via
    /// `previous_state[device_id]`, retried up to `max_retries` with
    /// exponential backoff. Devices not `applied` are skipped.
    pub async fn rollback_plan(&self, plan_id: &PlanId, reason: impl Into<String>, triggered_by: impl Into<String>, max_retries: u32, change_service: &dyn ChangeService) -> CoreResult<RollbackSummary> {
        let reason = reason.into();
        let triggered_by = triggered_by.into();
        let actor = Actor {
            sub: triggered_by,
            email: None,
            role: "system".to_string(),
        };

        let mut plan = self.get_plan(plan_id).await?;
        if plan.status != PlanStatus::Executing {
            return Err(CoreError::new(ErrorCode::PlanStateConflict, format!("plan {plan_id} is not executing (status={})", plan.status)));
        }
        if !plan.rollout.rollback_on_failure {
            return Err(CoreError::new(ErrorCode::RollbackNotEnabled, format!("plan {plan_id} does not have rollback_on_failure enabled")));
        }

        self.audit
            .record(AuditEntry::new(actor.clone(), AuditAction::PLAN_ROLLBACK_INITIATED, AuditResult::Success).with_plan(plan_id.clone()).with_metadata(serde_json::json!({ "reason": reason })))
            .await;

        let applied_devices: Vec<DeviceId> = plan
            .device_statuses
            .iter()
            .filter(|(_, status)| **status == DeviceApplyStatus::Applied)
            .map(|(id, _)| id.clone())
            .collect();

        let mut rolled_back = 0usize;
        let mut rollback_failed = 0usize;

        for device_id in &applied_devices {
            plan.device_statuses.insert(device_id.clone(), DeviceApplyStatus::RollingBack);

            let Some(previous_state) = plan.previous_state_for(device_id).cloned() else {
                plan.device_statuses.insert(device_id.clone(), DeviceApplyStatus::RollbackFailed);
                rollback_failed += 1;
                continue;
            };

            let mut succeeded = false;
            for attempt in 0..=max_retries {
                if attempt > 0 {
                    let backoff_ms = 250u64 * (1u64 << (attempt - 1).min(6));
                    tokio::time::sleep(std::time::Duration::from_millis(backoff_ms)).await;
                }
                if change_service.rollback(device_id, &previous_state).await.is_ok() {
                    succeeded = true;
                    break;
                }
            }

            if succeeded {
                plan.device_statuses.insert(device_id.clone(), DeviceApplyStatus::RolledBack);
                rolled_back += 1;
            } else {
                plan.device_statuses.insert(device_id.clone(), DeviceApplyStatus::RollbackFailed);
                rollback_failed += 1;
            }
        }

        if rolled_back > 0 {
            plan.status = PlanStatus::RolledBack;
        }
        self.store.put_plan(plan.clone()).await;

        let summary = RollbackSummary {
            attempted: applied_devices.len(),
            rolled_back,
            rollback_failed,
        };

        self.audit
            .record(
                AuditEntry::new(actor, AuditAction::PLAN_ROLLBACK_COMPLETED, AuditResult::Success)
                    .with_plan(plan_id.clone())
                    .with_metadata(serde_json::json!({ "attempted": summary.attempted, "rolled_back": summary.rolled_back, "rollback_failed": summary.rollback_failed })),
            )
            .await;

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use rcp_common::domain::device::{Device, DeviceCapabilities};

    struct NoopChangeService;

    #[async_trait]
    impl ChangeService for NoopChangeService {
        async fn capture_previous_state(&self, _device_id: &DeviceId, _changes: &serde_json::Value) -> CoreResult<serde_json::Value> {
            Ok(serde_json::json!({}))
        }
        async fn apply(&self, _device_id: &DeviceId, _changes: &serde_json::Value) -> CoreResult<()> {
            Ok(())
        }
        async fn rollback(&self, _device_id: &DeviceId, _previous_state: &serde_json::Value) -> CoreResult<()> {
            Ok(())
        }
    }

    async fn eligible_device(store: &Store, id: &str) -> DeviceId {
        let mut device = Device::new(DeviceId::new(id), "router", "10.0.0.1", 443, Environment::Lab);
        device.status = DeviceStatus::Healthy;
        device.capabilities = DeviceCapabilities {
            professional_workflows: true,
            ..Default::default()
        };
        let device_id = device.id.clone();
        store.upsert_device(device).await;
        device_id
    }

    fn service(store: Store) -> PlanService {
        PlanService::new(store.clone(), ApprovalTokenSigner::new("test-key"), AuditSink::new(store), Environment::Lab, false)
    }

    fn admin_user() -> User {
        User {
            sub: "tester".to_string(),
            role: "admin".to_string(),
            device_scope: Vec::new(),
        }
    }

    fn invocation(user: &User) -> ToolInvocation<'_> {
        ToolInvocation {
            user,
            tier: ToolTier::Fundamental,
            topic: None,
            cross_environment: false,
        }
    }

    #[tokio::test]
    async fn create_plan_rejects_unreachable_devices() {
        let store = Store::new();
        let mut device = Device::new(DeviceId::new("dev-1"), "router", "10.0.0.1", 443, Environment::Lab);
        device.status = DeviceStatus::Unreachable;
        store.upsert_device(device).await;
        let svc = service(store);
        let user = admin_user();

        let err = svc
            .create_plan("firewall_add_rule", "alice", vec![DeviceId::new("dev-1")], "add rule", serde_json::json!({}), RiskLevel::Low, invocation(&user))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::Validation);
    }

    #[tokio::test]
    async fn approve_then_approve_again_conflicts() {
        let store = Store::new();
        let device_id = eligible_device(&store, "dev-1").await;
        let svc = service(store);
        let user = admin_user();
        let plan = svc
            .create_plan("firewall_add_rule", "alice", vec![device_id], "add rule", serde_json::json!({}), RiskLevel::Low, invocation(&user))
            .await
            .unwrap();

        svc.approve_plan(&plan.id, &plan.approval_token, "bob").await.unwrap();
        let err = svc.approve_plan(&plan.id, &plan.approval_token, "bob").await.unwrap_err();
        assert_eq!(err.code, ErrorCode::PlanStateConflict);
    }

    #[tokio::test]
    async fn approve_rejects_wrong_token() {
        let store = Store::new();
        let device_id = eligible_device(&store, "dev-1").await;
        let svc = service(store);
        let user = admin_user();
        let plan = svc
            .create_plan("firewall_add_rule", "alice", vec![device_id], "add rule", serde_json::json!({}), RiskLevel::Low, invocation(&user))
            .await
            .unwrap();

        let err = svc.approve_plan(&plan.id, "approve-wrong-token", "bob").await.unwrap_err();
        assert_eq!(err.code, ErrorCode::ApprovalTokenInvalid);
    }

    #[tokio::test]
    async fn multi_device_plan_precomputes_batches() {
        let store = Store::new();
        let mut ids = Vec::new();
        for i in 0..5 {
            ids.push(eligible_device(&store, &format!("dev-{i}")).await);
        }
        let svc = service(store);
        let user = admin_user();
        let (plan, batches) = svc
            .create_multi_device_plan("firewall_add_rule", "alice", ids, "bulk change", serde_json::json!({}), RiskLevel::Low, 2, 0, true, invocation(&user))
            .await
            .unwrap();
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].len(), 2);
        assert_eq!(batches[2].len(), 1);
        assert_eq!(plan.rollout.batch_size, 2);
    }

    #[tokio::test]
    async fn rollback_requires_executing_status() {
        let store = Store::new();
        let device_id = eligible_device(&store, "dev-1").await;
        let svc = service(store);
        let user = admin_user();
        let plan = svc
            .create_plan("firewall_add_rule", "alice", vec![device_id], "add rule", serde_json::json!({}), RiskLevel::Low, invocation(&user))
            .await
            .unwrap();

        let err = svc.rollback_plan(&plan.id, "manual", "alice", 2, &NoopChangeService).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::PlanStateConflict);
    }

    #[tokio::test]
    async fn create_plan_runs_the_authorization_gate_before_persisting() {
        let store = Store::new();
        let device_id = eligible_device(&store, "dev-1").await;
        let svc = service(store);
        let mallory = User {
            sub: "mallory".to_string(),
            role: "read_only".to_string(),
            device_scope: Vec::new(),
        };
        let denied = ToolInvocation {
            user: &mallory,
            tier: ToolTier::Advanced,
            topic: None,
            cross_environment: false,
        };

        let err = svc
            .create_plan("firewall_add_rule", "mallory", vec![device_id], "add rule", serde_json::json!({}), RiskLevel::Low, denied)
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::AuthzDenied);
        assert!(svc.list_plans(&PlanFilter::default()).await.is_empty());
    }
}
