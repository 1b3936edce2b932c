//! Scenario 3: manual cancellation mid-rollout. A caller requests
//! cancellation once the first batch has gone through; the rollout must
//! stop before the next batch starts, leaving later devices untouched, and
//! the job the rollout scheduled for itself must land on `cancelled` too.

mod common;

use async_trait::async_trait;
use rcp_common::domain::device::{DeviceId, Environment};
use rcp_common::domain::job::JobStatus;
use rcp_common::domain::plan::{DeviceApplyStatus, PlanStatus, RiskLevel};
use rcp_common::domain::Actor;
use rcp_common::error::CoreResult;
use rcp_core::audit::AuditSink;
use rcp_core::change_service::ChangeService;
use rcp_core::rollout::RolloutExecutor;
use rcp_transport::mock::MockBehavior;
use std::time::Duration;

struct AlwaysOkChangeService;

#[async_trait]
impl ChangeService for AlwaysOkChangeService {
    async fn capture_previous_state(&self, _device_id: &DeviceId, _changes: &serde_json::Value) -> CoreResult<serde_json::Value> {
        Ok(serde_json::json!({ "rule": "absent" }))
    }
    async fn apply(&self, _device_id: &DeviceId, _changes: &serde_json::Value) -> CoreResult<()> {
        Ok(())
    }
    async fn rollback(&self, _device_id: &DeviceId, _previous_state: &serde_json::Value) -> CoreResult<()> {
        Ok(())
    }
}

/// 6 devices, batch_size=2: batch 1 applies, then cancellation is
/// requested mid-pause; batches 2-3 never start and the job the rollout
/// scheduled for itself lands on `cancelled` alongside the plan.
#[tokio::test]
async fn cancelling_mid_rollout_stops_before_the_next_batch() {
    let fleet = common::build_fleet(6, MockBehavior::healthy()).await;
    let owner = common::admin_user();
    let executor = std::sync::Arc::new(RolloutExecutor::new(
        fleet.store.clone(),
        fleet.health.clone(),
        fleet.plan_service.clone(),
        AuditSink::new(fleet.store.clone()),
        Environment::Lab,
        false,
        80.0,
        85.0,
        2,
    ));

    let (plan, _batches) = fleet
        .plan_service
        .create_multi_device_plan(
            "firewall_add_rule",
            "alice",
            fleet.device_ids.clone(),
            "add rule everywhere",
            serde_json::json!({}),
            RiskLevel::Low,
            2,
            1,
            false,
            common::invocation(&owner),
        )
        .await
        .unwrap();
    fleet.plan_service.approve_plan(&plan.id, &plan.approval_token, "bob").await.unwrap();

    let plan_id = plan.id.clone();
    let token = plan.approval_token.clone();
    let rollout_handle = {
        let executor = executor.clone();
        let owner = owner.clone();
        tokio::spawn(async move { executor.apply_multi_device_plan(&plan_id, &token, "carol", &AlwaysOkChangeService, common::invocation(&owner)).await })
    };

    // Give batch 1 time to apply and health-check, well inside the
    // 1-second inter-batch pause, then request cancellation on the plan.
    tokio::time::sleep(Duration::from_millis(150)).await;
    fleet
        .plan_service
        .transition_status(
            &plan.id,
            PlanStatus::Cancelled,
            Actor {
                sub: "alice".to_string(),
                email: None,
                role: "admin".to_string(),
            },
        )
        .await
        .unwrap();

    let outcome = rollout_handle.await.unwrap().unwrap();
    assert_eq!(outcome.status, PlanStatus::Cancelled);
    assert_eq!(outcome.batches_completed, 1);
    assert_eq!(outcome.summary.applied, 2);

    let final_plan = fleet.plan_service.get_plan(&plan.id).await.unwrap();
    for device_id in &fleet.device_ids[0..2] {
        assert_eq!(final_plan.device_statuses[device_id], DeviceApplyStatus::Applied);
    }
    for device_id in &fleet.device_ids[2..6] {
        assert_eq!(final_plan.device_statuses[device_id], DeviceApplyStatus::Pending);
    }

    // The rollout schedules its own job up front; it must land on
    // `cancelled` in lockstep with the plan.
    let job = fleet.store.find_job_for_plan(&plan.id).await.unwrap();
    assert_eq!(job.status, JobStatus::Cancelled);
}
