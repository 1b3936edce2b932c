//! Approval Workflow: the out-of-band human chain-of-custody layer, distinct
//! from the in-plan approval token (`approval_token.rs`). A request here
//! records who asked, who decided, and why; the requester may never be the
//! approver.

use chrono::Utc;
use rcp_common::domain::approval::{ApprovalRequest, ApprovalRequestId, ApprovalStatus};
use rcp_common::domain::plan::PlanId;
use rcp_common::domain::{Actor, AuditAction, AuditResult};
use rcp_common::error::{CoreError, CoreResult, ErrorCode};
use rcp_common::ids::new_approval_request_id;

use crate::audit::{AuditEntry, AuditSink};
use crate::notify::{NotificationSink, NotificationTemplate};
use crate::store::Store;

pub struct ApprovalWorkflow {
    store: Store,
    audit: AuditSink,
    notify: Option<NotificationSink>,
}

impl ApprovalWorkflow {
    pub fn new(store: Store, audit: AuditSink, notify: Option<NotificationSink>) -> Self {
        Self { store, audit, notify }
    }

    pub async fn create_request(&self, plan_id: &PlanId, requested_by: impl Into<String>, notes: Option<String>) -> CoreResult<ApprovalRequest> {
        let requested_by = requested_by.into();
        let actor = Actor {
            sub: requested_by.clone(),
            email: None,
            role: "requester".to_string(),
        };

        self.store.get_plan(plan_id).await.ok_or_else(|| CoreError::plan_not_found(plan_id))?;

        if let Some(existing) = self.store.find_pending_request_for_plan(plan_id).await {
            let err = CoreError::new(ErrorCode::PlanStateConflict, format!("plan {plan_id} already has a pending approval request ({})", existing.id));
            self.audit
                .record(AuditEntry::new(actor, AuditAction::APPROVAL_REQUESTED, AuditResult::Failure).with_plan(plan_id.clone()).with_error(err.to_string()))
                .await;
            return Err(err);
        }

        let request = ApprovalRequest {
            id: ApprovalRequestId::new(new_approval_request_id(Utc::now())),
            plan_id: plan_id.clone(),
            status: ApprovalStatus::Pending,
            requested_by: requested_by.clone(),
            approver: None,
            requested_at: Utc::now(),
            decided_at: None,
            note: notes,
        };
        self.store.put_approval_request(request.clone()).await;

        self.audit
            .record(AuditEntry::new(actor, AuditAction::APPROVAL_REQUESTED, AuditResult::Success).with_plan(plan_id.clone()))
            .await;

        Ok(request)
    }

    pub async fn get_request(&self, id: &ApprovalRequestId) -> CoreResult<ApprovalRequest> {
        self.store.get_approval_request(id).await.ok_or_else(|| CoreError::approval_request_not_found(id))
    }

    pub async fn approve_request(&self, id: &ApprovalRequestId, approver: impl Into<String>, notes: Option<String>) -> CoreResult<ApprovalRequest> {
        let approver = approver.into();
        let mut request = self.decide(id, &approver, ApprovalStatus::Approved, notes).await?;
        request.approver = Some(approver.clone());

        if let Some(sink) = &self.notify {
            sink.notify(Some(&request.requested_by), NotificationTemplate::ApprovalApproved { plan_id: request.plan_id.to_string(), approved_by: approver }).await;
        }

        Ok(request)
    }

    pub async fn reject_request(&self, id: &ApprovalRequestId, approver: impl Into<String>, notes: Option<String>) -> CoreResult<ApprovalRequest> {
        let approver = approver.into();
        let request = self.decide(id, &approver, ApprovalStatus::Rejected, notes.clone()).await?;

        if let Some(sink) = &self.notify {
            sink.notify(Some(&request.requested_by), NotificationTemplate::ApprovalRejected { plan_id: request.plan_id.to_string(), rejected_by: approver, reason: notes }).await;
        }

        Ok(request)
    }

    async fn decide(&self, id: &ApprovalRequestId, approver: &str, status: ApprovalStatus, notes: Option<String>) -> CoreResult<ApprovalRequest> {
        let action = match status {
            ApprovalStatus::Approved => AuditAction::APPROVAL_APPROVED,
            ApprovalStatus::Rejected => AuditAction::APPROVAL_REJECTED,
            ApprovalStatus::Pending => unreachable!("decide is only called with a terminal status"),
        };
        let actor = Actor {
            sub: approver.to_string(),
            email: None,
            role: "approver".to_string(),
        };

        let mut request = self.get_request(id).await?;

        if request.status != ApprovalStatus::Pending {
            let err = CoreError::new(ErrorCode::PlanStateConflict, format!("approval request {id} is not pending (status={:?})", request.status));
            self.audit.record(AuditEntry::new(actor, action, AuditResult::Failure).with_plan(request.plan_id.clone()).with_error(err.to_string())).await;
            return Err(err);
        }
        if request.requested_by == approver {
            let err = CoreError::new(ErrorCode::SelfApproval, "the requester cannot also be the approver");
            self.audit.record(AuditEntry::new(actor, action, AuditResult::Failure).with_plan(request.plan_id.clone()).with_error(err.to_string())).await;
            return Err(err);
        }

        request.status = status;
        request.approver = Some(approver.to_string());
        request.decided_at = Some(Utc::now());
        request.note = notes.or(request.note);
        self.store.put_approval_request(request.clone()).await;

        self.audit
            .record(AuditEntry::new(actor, action, AuditResult::Success).with_plan(request.plan_id.clone()).with_metadata(serde_json::json!({ "approval_request_id": request.id.to_string() })))
            .await;

        Ok(request)
    }
}
