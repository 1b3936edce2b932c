//! Append-only audit log. Every public operation across the authorization
//! gate, plan, job, rollout and approval services commits exactly one
//! event here: SUCCESS on the happy path, FAILURE (with the error message)
//! on every rejection path. Reads go through `query`, a filtered and
//! paginated view over the underlying store.

use chrono::Utc;
use rcp_common::domain::device::{DeviceId, Environment};
use rcp_common::domain::{Actor, AuditAction, AuditEvent, AuditEventId, AuditResult, JobId, PlanId, ToolTier};
use rcp_common::ids::new_audit_event_id;

use crate::store::{AuditFilter, Store};

/// Everything needed to build one audit event. Most callers only fill in a
/// handful of fields; the rest default to `None`/empty.
pub struct AuditEntry {
    pub actor: Actor,
    pub action: String,
    pub result: AuditResult,
    pub device_id: Option<DeviceId>,
    pub environment: Option<Environment>,
    pub tool_name: Option<String>,
    pub tool_tier: Option<ToolTier>,
    pub plan_id: Option<PlanId>,
    pub job_id: Option<JobId>,
    pub metadata: serde_json::Value,
    pub error: Option<String>,
}

impl AuditEntry {
    pub fn new(actor: Actor, action: impl Into<String>, result: AuditResult) -> Self {
        Self {
            actor,
            action: action.into(),
            result,
            device_id: None,
            environment: None,
            tool_name: None,
            tool_tier: None,
            plan_id: None,
            job_id: None,
            metadata: serde_json::Value::Object(Default::default()),
            error: None,
        }
    }

    pub fn with_plan(mut self, plan_id: PlanId) -> Self {
        self.plan_id = Some(plan_id);
        self
    }

    pub fn with_job(mut self, job_id: JobId) -> Self {
        self.job_id = Some(job_id);
        self
    }

    pub fn with_device(mut self, device_id: DeviceId) -> Self {
        self.device_id = Some(device_id);
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

#[derive(Clone)]
pub struct AuditSink {
    store: Store,
}

impl AuditSink {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub async fn record(&self, entry: AuditEntry) {
        let event = AuditEvent {
            id: AuditEventId::new(new_audit_event_id(Utc::now())),
            timestamp: Utc::now(),
            actor: entry.actor,
            device_id: entry.device_id,
            environment: entry.environment,
            action: AuditAction::new(entry.action),
            tool_name: entry.tool_name,
            tool_tier: entry.tool_tier,
            plan_id: entry.plan_id,
            job_id: entry.job_id,
            result: entry.result,
            metadata: entry.metadata,
            error: entry.error,
        };
        self.store.append_audit(event).await;
    }

    /// Filters by user, device, tool, action, date range, and a
    /// substring search over the metadata, paginated.
    pub async fn query(&self, filter: &AuditFilter, page: usize, page_size: usize) -> (Vec<AuditEvent>, usize) {
        self.store.query_audit(filter, page.max(1), page_size.max(1)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcp_common::domain::plan::PlanId;

    fn actor() -> Actor {
        Actor {
            sub: "alice".to_string(),
            email: None,
            role: "admin".to_string(),
        }
    }

    #[tokio::test]
    async fn recorded_event_is_queryable_by_action_and_plan() {
        let sink = AuditSink::new(Store::new());
        let plan_id = PlanId::new("plan-20260101000000-abcd1234");
        sink.record(AuditEntry::new(actor(), AuditAction::PLAN_CREATED, AuditResult::Success).with_plan(plan_id.clone()))
            .await;

        let filter = AuditFilter {
            action: Some(AuditAction::PLAN_CREATED.to_string()),
            ..Default::default()
        };
        let (events, total) = sink.query(&filter, 1, 10).await;
        assert_eq!(total, 1);
        assert_eq!(events[0].plan_id, Some(plan_id));
    }

    #[tokio::test]
    async fn failure_events_carry_the_error_message() {
        let sink = AuditSink::new(Store::new());
        sink.record(AuditEntry::new(actor(), AuditAction::AUTHZ_DENIED, AuditResult::Failure).with_error("device outside scope"))
            .await;

        let (events, _) = sink.query(&AuditFilter::default(), 1, 10).await;
        assert_eq!(events[0].error.as_deref(), Some("device outside scope"));
    }
}
