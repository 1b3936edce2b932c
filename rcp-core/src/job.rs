//! Job Service: ad-hoc batch execution independent of the plan/apply
//! pipeline (bulk reads, maintenance sweeps). Jobs track attempts,
//! progress, and a cooperative cancellation flag checked between batches.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rcp_common::domain::job::{Job, JobId, JobStatus};
use rcp_common::domain::plan::PlanId;
use rcp_common::domain::{Actor, AuditAction, AuditResult, DeviceId};
use rcp_common::error::{CoreError, CoreResult, ErrorCode};
use rcp_common::ids::new_job_id;

use crate::audit::{AuditEntry, AuditSink};
use crate::store::Store;

/// The caller-supplied unit of work for one batch. Per-topic callers
/// implement this to drive their own device operation.
#[async_trait]
pub trait BatchExecutor: Send + Sync {
    async fn execute_batch(&self, job_id: &JobId, batch_device_ids: &[DeviceId], ctx: &serde_json::Value) -> CoreResult<HashMap<DeviceId, serde_json::Value>>;
}

pub struct JobService {
    store: Store,
    audit: AuditSink,
}

impl JobService {
    pub fn new(store: Store, audit: AuditSink) -> Self {
        Self { store, audit }
    }

    pub async fn create_job(&self, job_type: impl Into<String>, device_ids: Vec<DeviceId>, plan_id: Option<PlanId>, max_attempts: u32, next_run_at: DateTime<Utc>) -> CoreResult<Job> {
        let job_type = job_type.into();
        let job_id = JobId::new(new_job_id(Utc::now()));
        let job = Job::new(job_id.clone(), job_type, device_ids, plan_id.clone(), max_attempts, next_run_at);
        self.store.put_job(job.clone()).await;

        self.audit
            .record(
                AuditEntry::new(Actor { sub: "system".to_string(), email: None, role: "system".to_string() }, AuditAction::JOB_CREATED, AuditResult::Success)
                    .with_job(job_id),
            )
            .await;

        Ok(job)
    }

    pub async fn get_job(&self, job_id: &JobId) -> CoreResult<Job> {
        self.store.get_job(job_id).await.ok_or_else(|| CoreError::job_not_found(job_id))
    }

    pub async fn request_cancellation(&self, job_id: &JobId) -> CoreResult<Job> {
        let mut job = self.get_job(job_id).await?;
        job.cancellation_requested = true;
        self.store.put_job(job.clone()).await;
        Ok(job)
    }

    /// Loads the job, rejects unless `pending` or `failed`, increments
    /// `attempts`, runs batches sequentially via `executor`, sleeping
    /// `batch_pause_s` between non-final batches. A per-batch exception
    /// fails the job immediately and is re-raised to the caller.
    pub async fn execute_job(&self, job_id: &JobId, executor: &dyn BatchExecutor, ctx: serde_json::Value, batch_size: usize, batch_pause_s: u64) -> CoreResult<Job> {
        let mut job = self.get_job(job_id).await?;
        if !matches!(job.status, JobStatus::Pending | JobStatus::Failed) {
            return Err(CoreError::new(ErrorCode::JobStateConflict, format!("job {job_id} is not pending or failed (status={})", job.status)));
        }
        if batch_size == 0 {
            return Err(CoreError::validation("batch_size must be at least 1"));
        }

        job.attempts += 1;
        job.status = JobStatus::Running;
        self.store.put_job(job.clone()).await;

        let batches: Vec<Vec<DeviceId>> = job.device_ids.chunks(batch_size).map(|c| c.to_vec()).collect();
        let total = job.device_ids.len().max(1);
        let mut completed_devices = 0usize;

        for (index, batch) in batches.iter().enumerate() {
            let current = self.get_job(job_id).await?;
            if current.cancellation_requested {
                job.status = JobStatus::Cancelled;
                self.store.put_job(job.clone()).await;
                self.audit
                    .record(
                        AuditEntry::new(Actor { sub: "system".to_string(), email: None, role: "system".to_string() }, AuditAction::JOB_STATUS_UPDATE, AuditResult::Success)
                            .with_job(job_id.clone())
                            .with_metadata(serde_json::json!({ "status": "cancelled", "completed_devices": completed_devices, "total_devices": total })),
                    )
                    .await;
                return Ok(job);
            }

            match executor.execute_batch(job_id, batch, &ctx).await {
                Ok(results) => {
                    for (device_id, result) in results {
                        job.result_summary.insert(device_id, result);
                    }
                    completed_devices += batch.len();
                    job.progress_percent = ((completed_devices * 100) / total).min(100) as u8;
                    job.current_device_id = batch.last().cloned();
                    self.store.put_job(job.clone()).await;
                }
                Err(err) => {
                    job.status = JobStatus::Failed;
                    job.error_message = Some(err.to_string());
                    self.store.put_job(job.clone()).await;
                    self.audit
                        .record(
                            AuditEntry::new(Actor { sub: "system".to_string(), email: None, role: "system".to_string() }, AuditAction::JOB_STATUS_UPDATE, AuditResult::Failure)
                                .with_job(job_id.clone())
                                .with_error(err.to_string()),
                        )
                        .await;
                    return Err(err);
                }
            }

            let is_last = index + 1 == batches.len();
            if !is_last && batch_pause_s > 0 {
                tokio::time::sleep(std::time::Duration::from_secs(batch_pause_s)).await;
            }
        }

        job.status = JobStatus::Success;
        job.progress_percent = 100;
        self.store.put_job(job.clone()).await;

        self.audit
            .record(
                AuditEntry::new(Actor { sub: "system".to_string(), email: None, role: "system".to_string() }, AuditAction::JOB_STATUS_UPDATE, AuditResult::Success)
                    .with_job(job_id.clone())
                    .with_metadata(serde_json::json!({ "status": "success", "devices": total })),
            )
            .await;

        Ok(job)
    }

    /// Only valid from `failed` and while `attempts < max_attempts`.
    pub async fn schedule_retry(&self, job_id: &JobId, delay_s: i64) -> CoreResult<Job> {
        let mut job = self.get_job(job_id).await?;
        if job.status != JobStatus::Failed {
            return Err(CoreError::new(ErrorCode::JobStateConflict, format!("job {job_id} is not failed (status={})", job.status)));
        }
        if job.attempts >= job.max_attempts {
            return Err(CoreError::new(ErrorCode::RetriesExhausted, format!("job {job_id} has exhausted its {} attempts", job.max_attempts)));
        }
        job.status = JobStatus::Pending;
        job.next_run_at = Utc::now() + chrono::Duration::seconds(delay_s);
        self.store.put_job(job.clone()).await;
        Ok(job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SucceedingExecutor;

    #[async_trait]
    impl BatchExecutor for SucceedingExecutor {
        async fn execute_batch(&self, _job_id: &JobId, batch: &[DeviceId], _ctx: &serde_json::Value) -> CoreResult<HashMap<DeviceId, serde_json::Value>> {
            Ok(batch.iter().map(|d| (d.clone(), serde_json::json!("ok"))).collect())
        }
    }

    struct FailingExecutor;

    #[async_trait]
    impl BatchExecutor for FailingExecutor {
        async fn execute_batch(&self, _job_id: &JobId, _batch: &[DeviceId], _ctx: &serde_json::Value) -> CoreResult<HashMap<DeviceId, serde_json::Value>> {
            Err(CoreError::validation("simulated batch failure"))
        }
    }

    fn service() -> JobService {
        let store = Store::new();
        JobService::new(store.clone(), AuditSink::new(store))
    }

    #[tokio::test]
    async fn execute_job_runs_all_batches_to_success() {
        let svc = service();
        let devices: Vec<DeviceId> = (0..5).map(|i| DeviceId::new(format!("dev-{i}"))).collect();
        let job = svc.create_job("snapshot_sweep", devices, None, 3, Utc::now()).await.unwrap();

        let result = svc.execute_job(&job.id, &SucceedingExecutor, serde_json::json!({}), 2, 0).await.unwrap();
        assert_eq!(result.status, JobStatus::Success);
        assert_eq!(result.progress_percent, 100);
        assert_eq!(result.result_summary.len(), 5);
    }

    #[tokio::test]
    async fn execute_job_fails_and_allows_retry() {
        let svc = service();
        let devices: Vec<DeviceId> = (0..2).map(|i| DeviceId::new(format!("dev-{i}"))).collect();
        let job = svc.create_job("snapshot_sweep", devices, None, 3, Utc::now()).await.unwrap();

        let err = svc.execute_job(&job.id, &FailingExecutor, serde_json::json!({}), 1, 0).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::Validation);

        let retried = svc.schedule_retry(&job.id, 30).await.unwrap();
        assert_eq!(retried.status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn cancellation_requested_before_a_batch_stops_the_job() {
        let svc = service();
        let devices: Vec<DeviceId> = (0..6).map(|i| DeviceId::new(format!("dev-{i}"))).collect();
        let job = svc.create_job("snapshot_sweep", devices, None, 3, Utc::now()).await.unwrap();
        svc.request_cancellation(&job.id).await.unwrap();

        let result = svc.execute_job(&job.id, &SucceedingExecutor, serde_json::json!({}), 2, 0).await.unwrap();
        assert_eq!(result.status, JobStatus::Cancelled);
    }

    #[tokio::test]
    async fn schedule_retry_rejects_when_attempts_exhausted() {
        let svc = service();
        let devices = vec![DeviceId::new("dev-0")];
        let job = svc.create_job("snapshot_sweep", devices, None, 1, Utc::now()).await.unwrap();

        let err = svc.execute_job(&job.id, &FailingExecutor, serde_json::json!({}), 1, 0).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::Validation);

        let err = svc.schedule_retry(&job.id, 30).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::RetriesExhausted);
    }
}
