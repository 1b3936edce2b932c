//! Event broadcast + pluggable notification sink. The broadcast channel is
//! the lightweight resource-updated stream used by the health service:
//! subscribers get a URI/etag/status hint and re-fetch if interested,
//! never the full payload.

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tokio::sync::broadcast;
use tracing::warn;

const DEFAULT_BUFFER: usize = 256;

/// Broadcast channel for lightweight resource-updated events.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<String>,
}

impl EventBus {
    pub fn new(buffer: usize) -> Self {
        let buffer = buffer.max(1).max(DEFAULT_BUFFER);
        let (sender, _) = broadcast::channel(buffer);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.sender.subscribe()
    }

    pub fn emit<T: Serialize>(&self, event: &str, data: &T) {
        let payload = json!({
            "event": event,
            "data": data,
            "timestamp": Utc::now().to_rfc3339(),
        });
        match serde_json::to_string(&payload) {
            Ok(serialized) => {
                // Broadcast failure (no subscribers, or a lagging one) never
                // fails the underlying operation that triggered the emit.
                let _ = self.sender.send(serialized);
            }
            Err(err) => warn!(event, %err, "failed to serialize broadcast event"),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER)
    }
}

/// A device-health resource-updated notification: URI + etag + a coarse
/// status hint only. Subscribers re-fetch `run_health_check` if they want
/// the full result.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResourceUpdated {
    pub uri: String,
    pub etag: String,
    pub status_hint: String,
}

/// Outbound notification templates.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "template")]
pub enum NotificationTemplate {
    ApprovalRequested { plan_id: String, summary: String, requested_by: String },
    ApprovalApproved { plan_id: String, approved_by: String },
    ApprovalRejected { plan_id: String, rejected_by: String, reason: Option<String> },
    JobCompleted { job_id: String, plan_id: Option<String> },
    JobFailed { job_id: String, plan_id: Option<String>, error: String },
}

#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub to: String,
    pub subject: String,
    pub body_text: String,
    pub body_html: Option<String>,
}

impl NotificationTemplate {
    /// Renders a template into an outbound message. `base_url` is the
    /// service's public URL used to link back to the plan detail page.
    pub fn render(&self, recipient: &str, base_url: &str) -> OutboundMessage {
        match self {
            Self::ApprovalRequested { plan_id, summary, requested_by } => OutboundMessage {
                to: recipient.to_string(),
                subject: format!("Approval requested for plan {plan_id}"),
                body_text: format!("{requested_by} requested approval for plan {plan_id}: {summary}\n\n{base_url}/plans/{plan_id}"),
                body_html: None,
            },
            Self::ApprovalApproved { plan_id, approved_by } => OutboundMessage {
                to: recipient.to_string(),
                subject: format!("Plan {plan_id} approved"),
                body_text: format!("{approved_by} approved plan {plan_id}.\n\n{base_url}/plans/{plan_id}"),
                body_html: None,
            },
            Self::ApprovalRejected { plan_id, rejected_by, reason } => OutboundMessage {
                to: recipient.to_string(),
                subject: format!("Plan {plan_id} rejected"),
                body_text: format!(
                    "{rejected_by} rejected plan {plan_id}.{}\n\n{base_url}/plans/{plan_id}",
                    reason.as_deref().map(|r| format!(" Reason: {r}")).unwrap_or_default()
                ),
                body_html: None,
            },
            Self::JobCompleted { job_id, plan_id } => OutboundMessage {
                to: recipient.to_string(),
                subject: format!("Job {job_id} completed"),
                body_text: format!("Job {job_id} completed successfully.{}", plan_id.as_deref().map(|p| format!(" ({base_url}/plans/{p})")).unwrap_or_default()),
                body_html: None,
            },
            Self::JobFailed { job_id, plan_id, error } => OutboundMessage {
                to: recipient.to_string(),
                subject: format!("Job {job_id} failed"),
                body_text: format!(
                    "Job {job_id} failed: {error}.{}",
                    plan_id.as_deref().map(|p| format!(" ({base_url}/plans/{p})")).unwrap_or_default()
                ),
                body_html: None,
            },
        }
    }
}

/// Delivery backend. Missing recipients or transport failures degrade
/// gracefully: logged, never propagated.
#[async_trait::async_trait]
pub trait NotificationBackend: Send + Sync {
    async fn deliver(&self, message: &OutboundMessage);
}

pub struct LoggingBackend;

#[async_trait::async_trait]
impl NotificationBackend for LoggingBackend {
    async fn deliver(&self, message: &OutboundMessage) {
        tracing::info!(to = %message.to, subject = %message.subject, "notification delivered (logging backend)");
    }
}

/// Sends via an outbound webhook, HMAC-signing the payload the way the
/// approval-token protocol signs plan ids.
pub struct WebhookBackend {
    endpoint: String,
    signing_key: Vec<u8>,
}

impl WebhookBackend {
    pub fn new(endpoint: impl Into<String>, signing_key: Vec<u8>) -> Self {
        Self {
            endpoint: endpoint.into(),
            signing_key,
        }
    }

    fn sign(&self, body: &str) -> String {
        use hmac::{Hmac, Mac};
        use sha2::Sha256;
        let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(&self.signing_key).expect("hmac accepts any key length");
        mac.update(body.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }
}

#[async_trait::async_trait]
impl NotificationBackend for WebhookBackend {
    async fn deliver(&self, message: &OutboundMessage) {
        let body = json!({
            "to": message.to,
            "subject": message.subject,
            "body_text": message.body_text,
            "body_html": message.body_html,
        })
        .to_string();
        let signature = self.sign(&body);
        let endpoint = self.endpoint.clone();
        let result = tokio::task::spawn_blocking(move || {
            ureq::post(&endpoint)
                .header("X-RCP-Signature", &signature)
                .send(body.as_bytes())
        })
        .await;
        match result {
            Ok(Ok(_)) => tracing::debug!(to = %message.to, "webhook notification delivered"),
            Ok(Err(err)) => tracing::warn!(to = %message.to, %err, "webhook notification delivery failed"),
            Err(join_err) => tracing::warn!(to = %message.to, %join_err, "webhook delivery task panicked"),
        }
    }
}

pub struct NotificationSink {
    backend: Box<dyn NotificationBackend>,
    base_url: String,
}

impl NotificationSink {
    pub fn new(backend: Box<dyn NotificationBackend>, base_url: impl Into<String>) -> Self {
        Self {
            backend,
            base_url: base_url.into(),
        }
    }

    pub async fn notify(&self, recipient: Option<&str>, template: NotificationTemplate) {
        let Some(recipient) = recipient else {
            tracing::debug!("skipping notification: no recipient configured");
            return;
        };
        let message = template.render(recipient, &self.base_url);
        self.backend.deliver(&message).await;
    }
}
