//! In-process persistence. `Store` is the seam a real relational backend
//! would plug into later; the in-memory implementation keeps the engine
//! testable without a database dependency. All domain state lives in
//! `Arc<RwLock<HashMap<...>>>` maps, one per entity kind.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use rcp_common::domain::{
    ApprovalRequest, ApprovalRequestId, AuditEvent, AuditEventId, Credential, CredentialKind, Device, DeviceId, DeviceStatus, Job, JobId, Plan, PlanId,
    PollingState, Snapshot, SnapshotId,
};

#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub actor_sub: Option<String>,
    pub device_id: Option<DeviceId>,
    pub tool_name: Option<String>,
    pub action: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub search: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct PlanFilter {
    pub created_by: Option<String>,
    pub status: Option<rcp_common::domain::PlanStatus>,
}

/// Append-only / keyed in-memory store backing every `rcp-core` service.
#[derive(Clone)]
pub struct Store {
    devices: Arc<RwLock<HashMap<DeviceId, Device>>>,
    credentials: Arc<RwLock<HashMap<(DeviceId, CredentialKind), Vec<Credential>>>>,
    plans: Arc<RwLock<HashMap<PlanId, Plan>>>,
    jobs: Arc<RwLock<HashMap<JobId, Job>>>,
    snapshots: Arc<RwLock<HashMap<(DeviceId, String), Vec<Snapshot>>>>,
    audit: Arc<RwLock<Vec<AuditEvent>>>,
    approval_requests: Arc<RwLock<HashMap<ApprovalRequestId, ApprovalRequest>>>,
}

impl Store {
    pub fn new() -> Self {
        Self {
            devices: Arc::new(RwLock::new(HashMap::new())),
            credentials: Arc::new(RwLock::new(HashMap::new())),
            plans: Arc::new(RwLock::new(HashMap::new())),
            jobs: Arc::new(RwLock::new(HashMap::new())),
            snapshots: Arc::new(RwLock::new(HashMap::new())),
            audit: Arc::new(RwLock::new(Vec::new())),
            approval_requests: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    // -- devices --------------------------------------------------------

    pub async fn upsert_device(&self, device: Device) {
        self.devices.write().await.insert(device.id.clone(), device);
    }

    pub async fn get_device(&self, id: &DeviceId) -> Option<Device> {
        self.devices.read().await.get(id).cloned()
    }

    pub async fn list_devices(&self) -> Vec<Device> {
        self.devices.read().await.values().cloned().collect()
    }

    pub async fn update_device_status(&self, id: &DeviceId, status: DeviceStatus) {
        if let Some(device) = self.devices.write().await.get_mut(id) {
            device.status = status;
        }
    }

    pub async fn update_device_polling(&self, id: &DeviceId, polling: PollingState) {
        if let Some(device) = self.devices.write().await.get_mut(id) {
            device.polling = polling;
        }
    }

    pub async fn mark_last_seen(&self, id: &DeviceId, at: DateTime<Utc>) {
        if let Some(device) = self.devices.write().await.get_mut(id) {
            device.last_seen_at = Some(at);
        }
    }

    // -- credentials ------------------------------------------------------

    /// Activating a new credential for `(device, kind)` deactivates any
    /// currently-active one for the same pair: at most one active
    /// credential per device per kind.
    pub async fn put_credential(&self, credential: Credential) {
        let key = (credential.device_id.clone(), credential.kind);
        let mut guard = self.credentials.write().await;
        let bucket = guard.entry(key).or_default();
        if credential.active {
            for existing in bucket.iter_mut() {
                existing.active = false;
            }
        }
        bucket.push(credential);
    }

    pub async fn get_active_credential(&self, device_id: &DeviceId, kind: CredentialKind) -> Option<Credential> {
        let guard = self.credentials.read().await;
        guard.get(&(device_id.clone(), kind)).and_then(|bucket| bucket.iter().rev().find(|c| c.active).cloned())
    }

    pub async fn remove_device_credentials(&self, device_id: &DeviceId) {
        let mut guard = self.credentials.write().await;
        guard.retain(|(d, _), _| d != device_id);
    }

    // -- plans ------------------------------------------------------------

    pub async fn put_plan(&self, plan: Plan) {
        self.plans.write().await.insert(plan.id.clone(), plan);
    }

    pub async fn get_plan(&self, id: &PlanId) -> Option<Plan> {
        self.plans.read().await.get(id).cloned()
    }

    pub async fn list_plans(&self, filter: &PlanFilter) -> Vec<Plan> {
        self.plans
            .read()
            .await
            .values()
            .filter(|p| filter.created_by.as_deref().is_none_or(|c| c == p.created_by))
            .filter(|p| filter.status.is_none_or(|s| s == p.status))
            .cloned()
            .collect()
    }

    // -- jobs ---------------------------------------------------------------

    pub async fn put_job(&self, job: Job) {
        self.jobs.write().await.insert(job.id.clone(), job);
    }

    pub async fn get_job(&self, id: &JobId) -> Option<Job> {
        self.jobs.read().await.get(id).cloned()
    }

    /// The job (if any) most recently created for this plan. Plans have at
    /// most one in-flight job at a time, so "most recent" is unambiguous in
    /// practice; ties break on `next_run_at`.
    pub async fn find_job_for_plan(&self, plan_id: &PlanId) -> Option<Job> {
        self.jobs
            .read()
            .await
            .values()
            .filter(|j| j.plan_id.as_ref() == Some(plan_id))
            .max_by_key(|j| j.next_run_at)
            .cloned()
    }

    // -- snapshots ------------------------------------------------------------

    pub async fn put_snapshot(&self, snapshot: Snapshot) {
        let key = (snapshot.device_id.clone(), snapshot.kind.clone());
        let mut guard = self.snapshots.write().await;
        guard.entry(key).or_default().push(snapshot);
    }

    /// Newest first.
    pub async fn list_snapshots(&self, device_id: &DeviceId, kind: &str) -> Vec<Snapshot> {
        let guard = self.snapshots.read().await;
        let mut items = guard.get(&(device_id.clone(), kind.to_string())).cloned().unwrap_or_default();
        items.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        items
    }

    pub async fn delete_snapshots(&self, device_id: &DeviceId, kind: &str, ids: &[SnapshotId]) -> usize {
        let mut guard = self.snapshots.write().await;
        if let Some(bucket) = guard.get_mut(&(device_id.clone(), kind.to_string())) {
            let before = bucket.len();
            bucket.retain(|s| !ids.contains(&s.id));
            return before - bucket.len();
        }
        0
    }

    // -- audit ---------------------------------------------------------------

    pub async fn append_audit(&self, event: AuditEvent) {
        self.audit.write().await.push(event);
    }

    pub async fn query_audit(&self, filter: &AuditFilter, page: usize, page_size: usize) -> (Vec<AuditEvent>, usize) {
        let guard = self.audit.read().await;
        let matches: Vec<AuditEvent> = guard
            .iter()
            .filter(|e| filter.actor_sub.as_deref().is_none_or(|s| s == e.actor.sub))
            .filter(|e| filter.device_id.as_ref().is_none_or(|d| Some(d) == e.device_id.as_ref()))
            .filter(|e| filter.tool_name.as_deref().is_none_or(|t| Some(t) == e.tool_name.as_deref()))
            .filter(|e| filter.action.as_deref().is_none_or(|a| a == e.action.as_str()))
            .filter(|e| filter.from.is_none_or(|f| e.timestamp >= f))
            .filter(|e| filter.to.is_none_or(|t| e.timestamp <= t))
            .filter(|e| {
                filter
                    .search
                    .as_deref()
                    .is_none_or(|needle| e.metadata.to_string().to_lowercase().contains(&needle.to_lowercase()))
            })
            .cloned()
            .collect();
        let total = matches.len();
        let start = page.saturating_sub(1) * page_size;
        let page_items = matches.into_iter().skip(start).take(page_size).collect();
        (page_items, total)
    }

    // -- approval requests -----------------------------------------------------

    pub async fn put_approval_request(&self, request: ApprovalRequest) {
        self.approval_requests.write().await.insert(request.id.clone(), request);
    }

    pub async fn get_approval_request(&self, id: &ApprovalRequestId) -> Option<ApprovalRequest> {
        self.approval_requests.read().await.get(id).cloned()
    }

    pub async fn find_pending_request_for_plan(&self, plan_id: &PlanId) -> Option<ApprovalRequest> {
        self.approval_requests
            .read()
            .await
            .values()
            .find(|r| &r.plan_id == plan_id && r.status == rcp_common::domain::ApprovalStatus::Pending)
            .cloned()
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

/// Wires the broker's narrow view of device state directly onto `Store`, so
/// `rcpd` can hand a `Store` straight to `Broker::new` without a bespoke
/// adapter.
#[async_trait::async_trait]
impl rcp_transport::broker::CredentialSource for Store {
    async fn active_credential(&self, device_id: &DeviceId, kind: CredentialKind) -> Option<Credential> {
        self.get_active_credential(device_id, kind).await
    }

    async fn device_endpoint(&self, device_id: &DeviceId) -> Option<(String, u16)> {
        self.get_device(device_id).await.map(|d| (d.host, d.port))
    }

    async fn mark_connectivity(&self, device_id: &DeviceId, reachable: bool, _transport: &str, at: DateTime<Utc>) {
        if reachable {
            self.mark_last_seen(device_id, at).await;
        } else {
            self.update_device_status(device_id, DeviceStatus::Unreachable).await;
        }
    }
}
