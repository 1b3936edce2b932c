//! Rollout Executor: the apex component. Drives a multi-device plan
//! through its batches, gating every batch on a stricter post-apply
//! health check and halting (with an optional automatic rollback) the
//! moment a batch comes back unhealthy.

use std::sync::Arc;

use chrono::Utc;
use rcp_common::domain::device::{DeviceId, Environment};
use rcp_common::domain::job::JobStatus;
use rcp_common::domain::plan::{DeviceApplyStatus, Plan, PlanId, PlanStatus};
use rcp_common::domain::{Actor, AuditAction, AuditResult};
use rcp_common::error::{CoreError, CoreResult, ErrorCode};
use rcp_transport::broker::{CredentialSource, TransportFactory};
use subtle::ConstantTimeEq;

use crate::audit::{AuditEntry, AuditSink};
use crate::authz::{self, ToolDescriptor};
use crate::change_service::ChangeService;
use crate::health::{HealthService, HealthStatus};
use crate::job::JobService;
use crate::metrics;
use crate::plan::{PlanService, RollbackSummary, ToolInvocation};
use crate::store::Store;

#[derive(Debug, Clone, Default)]
pub struct ApplySummaryCounts {
    pub applied: usize,
    pub failed: usize,
    pub rolled_back: usize,
}

#[derive(Debug, Clone)]
pub struct RolloutOutcome {
    pub status: PlanStatus,
    pub batches_completed: usize,
    pub summary: ApplySummaryCounts,
    pub halt_reason: Option<String>,
    pub rollback: Option<RollbackSummary>,
}

pub struct RolloutExecutor<S: CredentialSource, F: TransportFactory> {
    store: Store,
    health: Arc<HealthService<S, F>>,
    plan_service: Arc<PlanService>,
    job_service: JobService,
    audit: AuditSink,
    environment: Environment,
    allow_prod_writes: bool,
    cpu_threshold: f64,
    memory_threshold: f64,
    max_rollback_retries: u32,
}

impl<S: CredentialSource, F: TransportFactory> RolloutExecutor<S, F> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Store,
        health: Arc<HealthService<S, F>>,
        plan_service: Arc<PlanService>,
        audit: AuditSink,
        environment: Environment,
        allow_prod_writes: bool,
        cpu_threshold: f64,
        memory_threshold: f64,
        max_rollback_retries: u32,
    ) -> Self {
        let job_service = JobService::new(store.clone(), audit.clone());
        Self {
            store,
            health,
            plan_service,
            job_service,
            audit,
            environment,
            allow_prod_writes,
            cpu_threshold,
            memory_threshold,
            max_rollback_retries,
        }
    }

    /// Runs the gate against every targeted device before a single batch
    /// moves, auditing `AUTHZ_DENIED` and refusing to apply on the first
    /// denial. The approval-token binding itself is checked separately,
    /// directly against the plan, just below.
    async fn authorize_devices(&self, plan: &Plan, invocation: &ToolInvocation<'_>) -> CoreResult<()> {
        let tool = ToolDescriptor {
            name: &plan.tool_name,
            tier: invocation.tier,
            topic: invocation.topic,
            cross_environment: invocation.cross_environment,
            is_apply: false,
            is_approval_action: false,
        };
        let actor = Actor {
            sub: invocation.user.sub.clone(),
            email: None,
            role: invocation.user.role.clone(),
        };
        for device_id in &plan.device_ids {
            let device = self.store.get_device(device_id).await.ok_or_else(|| CoreError::device_not_found(device_id))?;
            if let Err(denial) = authz::authorize(invocation.user, &tool, &device, self.environment, self.allow_prod_writes, None) {
                self.audit
                    .record(AuditEntry::new(actor, AuditAction::AUTHZ_DENIED, AuditResult::Failure).with_device(device.id.clone()).with_error(denial.reason.clone()))
                    .await;
                return Err(CoreError::new(denial.code, denial.reason));
            }
        }
        Ok(())
    }

    pub async fn apply_multi_device_plan(&self, plan_id: &PlanId, token: &str, applied_by: impl Into<String>, change_service: &dyn ChangeService, invocation: ToolInvocation<'_>) -> CoreResult<RolloutOutcome> {
        let applied_by = applied_by.into();
        let actor = Actor {
            sub: applied_by.clone(),
            email: None,
            role: "system".to_string(),
        };

        let mut plan = self.plan_service.get_plan(plan_id).await?;
        if plan.status != PlanStatus::Approved {
            return Err(CoreError::new(ErrorCode::PlanStateConflict, format!("plan {plan_id} is not approved (status={})", plan.status)));
        }

        let tokens_match: bool = token.as_bytes().ct_eq(plan.approval_token.as_bytes()).into();
        if !tokens_match {
            return Err(CoreError::new(ErrorCode::ApprovalTokenInvalid, "supplied approval token does not match the plan's token"));
        }
        if Utc::now() > plan.approval_expires_at {
            return Err(CoreError::new(ErrorCode::ApprovalExpired, "approval token has expired"));
        }

        self.authorize_devices(&plan, &invocation).await?;

        self.plan_service.transition_status(plan_id, PlanStatus::Executing, actor.clone()).await?;
        plan.status = PlanStatus::Executing;

        for device_id in plan.device_ids.clone() {
            plan.device_statuses.insert(device_id, DeviceApplyStatus::Pending);
        }
        self.store.put_plan(plan.clone()).await;

        // Schedules a job bound to this plan so the rollout has a standalone,
        // queryable record of the attempt; the batch loop below drives it
        // directly rather than through `JobService::execute_job`, since the
        // health-gated rollback semantics here have no generic equivalent.
        let mut job = self.job_service.create_job("rollout_apply", plan.device_ids.clone(), Some(plan.id.clone()), 1, Utc::now()).await?;
        job.attempts += 1;
        job.status = JobStatus::Running;
        self.store.put_job(job.clone()).await;

        let batch_size = plan.rollout.batch_size.max(1);
        let batches: Vec<Vec<DeviceId>> = plan.device_ids.chunks(batch_size).map(|c| c.to_vec()).collect();
        let batch_count = batches.len();
        let total_devices = plan.device_ids.len().max(1);
        let mut completed_devices = 0usize;

        for (index, batch) in batches.iter().enumerate() {
            if index > 0 {
                let current = self.plan_service.get_plan(plan_id).await?;
                if current.status == PlanStatus::Cancelled {
                    metrics::ROLLOUT_BATCHES_TOTAL.with_label_values(&["cancelled"]).inc();
                    job.status = JobStatus::Cancelled;
                    self.store.put_job(job.clone()).await;
                    return Ok(RolloutOutcome {
                        status: PlanStatus::Cancelled,
                        batches_completed: index,
                        summary: summarize(&current.device_statuses),
                        halt_reason: Some("plan was cancelled before the next batch could start".to_string()),
                        rollback: None,
                    });
                }
            }

            for device_id in batch {
                plan.device_statuses.insert(device_id.clone(), DeviceApplyStatus::Applying);
                self.store.put_plan(plan.clone()).await;

                let previous_state = change_service.capture_previous_state(device_id, &plan.changes).await;
                match previous_state {
                    Ok(state) => plan.set_previous_state(device_id, state),
                    Err(_) => {
                        plan.device_statuses.insert(device_id.clone(), DeviceApplyStatus::Failed);
                        self.store.put_plan(plan.clone()).await;
                        continue;
                    }
                }

                match change_service.apply(device_id, &plan.changes).await {
                    Ok(()) => {
                        plan.device_statuses.insert(device_id.clone(), DeviceApplyStatus::Applied);
                    }
                    Err(_) => {
                        plan.device_statuses.insert(device_id.clone(), DeviceApplyStatus::Failed);
                    }
                }
                self.store.put_plan(plan.clone()).await;
            }

            completed_devices += batch.len();
            for device_id in batch {
                let status = serde_json::to_value(plan.device_statuses[device_id]).unwrap_or(serde_json::Value::Null);
                job.result_summary.insert(device_id.clone(), status);
            }
            job.current_device_id = batch.last().cloned();
            job.progress_percent = ((completed_devices * 100) / total_devices).min(100) as u8;
            self.store.put_job(job.clone()).await;

            let health_results = self.health.run_batch_health_checks(batch, self.cpu_threshold, self.memory_threshold).await;
            let unhealthy: Vec<&DeviceId> = batch.iter().filter(|d| !matches!(health_results.get(*d).map(|r| r.status), Some(HealthStatus::Healthy))).collect();

            if !unhealthy.is_empty() {
                metrics::ROLLOUT_BATCHES_TOTAL.with_label_values(&["halted"]).inc();
                let halt_reason = format!("batch {} unhealthy after apply: {}", index + 1, unhealthy.iter().map(|d| d.as_str()).collect::<Vec<_>>().join(", "));

                let rollback = if plan.rollout.rollback_on_failure {
                    self.plan_service
                        .rollback_plan(plan_id, halt_reason.clone(), applied_by.clone(), self.max_rollback_retries, change_service)
                        .await
                        .ok()
                } else {
                    self.plan_service.transition_status(plan_id, PlanStatus::Failed, actor.clone()).await?;
                    None
                };

                let final_plan = self.plan_service.get_plan(plan_id).await?;
                job.status = if rollback.is_some() { JobStatus::RolledBack } else { JobStatus::Failed };
                job.error_message = Some(halt_reason.clone());
                self.store.put_job(job.clone()).await;

                return Ok(RolloutOutcome {
                    status: final_plan.status,
                    batches_completed: index + 1,
                    summary: summarize(&final_plan.device_statuses),
                    halt_reason: Some(halt_reason),
                    rollback,
                });
            }

            metrics::ROLLOUT_BATCHES_TOTAL.with_label_values(&["healthy"]).inc();

            let is_last = index + 1 == batch_count;
            if !is_last && plan.rollout.pause_seconds_between_batches > 0 {
                tokio::time::sleep(std::time::Duration::from_secs(plan.rollout.pause_seconds_between_batches)).await;
            }
        }

        let any_failed = plan.device_statuses.values().any(|s| *s == DeviceApplyStatus::Failed);
        let final_status = if any_failed { PlanStatus::CompletedWithErrors } else { PlanStatus::Completed };
        self.plan_service.transition_status(plan_id, final_status, actor).await?;

        job.status = if any_failed { JobStatus::CompletedWithErrors } else { JobStatus::Success };
        job.progress_percent = 100;
        self.store.put_job(job.clone()).await;

        let final_plan = self.plan_service.get_plan(plan_id).await?;
        Ok(RolloutOutcome {
            status: final_plan.status,
            batches_completed: batch_count,
            summary: summarize(&final_plan.device_statuses),
            halt_reason: None,
            rollback: None,
        })
    }
}

fn summarize(device_statuses: &std::collections::HashMap<DeviceId, DeviceApplyStatus>) -> ApplySummaryCounts {
    let mut counts = ApplySummaryCounts::default();
    for status in device_statuses.values() {
        match status {
            DeviceApplyStatus::Applied => counts.applied += 1,
            DeviceApplyStatus::Failed | DeviceApplyStatus::RollbackFailed => counts.failed += 1,
            DeviceApplyStatus::RolledBack => counts.rolled_back += 1,
            _ => {}
        }
    }
    counts
}
