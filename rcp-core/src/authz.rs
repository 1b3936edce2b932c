//! Authorization Gate. Stateless apart from the audit sink; a single
//! short-circuiting call invoked before every tool body. An ordered list
//! of checks, first failure wins, no retries.

use chrono::{DateTime, Utc};
use rcp_common::domain::device::{Device, Environment};
use rcp_common::domain::rbac::User;
use rcp_common::domain::ToolTier;
use rcp_common::error::ErrorCode;
use subtle::ConstantTimeEq;

/// Describes the tool being invoked, just enough for the gate to reason
/// about it. Per-topic tool bodies construct one of these before calling
/// `authorize`.
pub struct ToolDescriptor<'a> {
    pub name: &'a str,
    pub tier: ToolTier,
    /// Topic name matching a `DeviceCapabilities` flag (e.g. "firewall");
    /// `None` for tools with no per-topic gate (most fundamental reads).
    pub topic: Option<&'a str>,
    pub cross_environment: bool,
    pub is_apply: bool,
    pub is_approval_action: bool,
}

/// Present only for apply operations; binds the gate to a specific plan's
/// stored token.
pub struct ApplyBinding<'a> {
    pub supplied_token: &'a str,
    pub plan_token: &'a str,
    pub plan_expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct AuthzDenial {
    pub code: ErrorCode,
    pub reason: String,
}

impl std::fmt::Display for AuthzDenial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.reason)
    }
}

fn role_reaches_tier(role: &str, tier: ToolTier) -> bool {
    match role {
        "admin" => true,
        "ops" => matches!(tier, ToolTier::Fundamental | ToolTier::Advanced),
        "read_only" => matches!(tier, ToolTier::Fundamental),
        "approver" => matches!(tier, ToolTier::Fundamental),
        _ => false,
    }
}

fn device_has_topic_capability(device: &Device, topic: &str) -> bool {
    let c = &device.capabilities;
    match topic {
        "advanced" => c.advanced,
        "professional_workflows" => c.professional_workflows,
        "firewall" => c.firewall,
        "routing" => c.routing,
        "wireless" => c.wireless,
        "dhcp" => c.dhcp,
        "bridge" => c.bridge,
        "bandwidth_test" => c.bandwidth_test,
        _ => false,
    }
}

/// Runs the six ordered checks, short-circuiting on the first failure.
/// Never retries; the caller decides whether to audit.
pub fn authorize(
    user: &User,
    tool: &ToolDescriptor,
    device: &Device,
    service_environment: Environment,
    allow_prod_writes: bool,
    apply: Option<ApplyBinding>,
) -> Result<(), AuthzDenial> {
    // 1. Role capability for the tool's tier (or approval action).
    let role_ok = if tool.is_approval_action {
        user.role == "approver" || user.role == "admin"
    } else {
        role_reaches_tier(&user.role, tool.tier)
    };
    if !role_ok {
        return Err(AuthzDenial {
            code: ErrorCode::AuthzDenied,
            reason: format!("role '{}' cannot invoke {:?}-tier tool '{}'", user.role, tool.tier, tool.name),
        });
    }

    // 2. Device scope.
    if !user.in_scope(&device.id) {
        return Err(AuthzDenial {
            code: ErrorCode::AuthzDenied,
            reason: format!("device {} is outside the caller's scope", device.id),
        });
    }

    // 3. Environment match, unless the tool is explicitly cross-environment.
    if !tool.cross_environment && device.environment != service_environment {
        return Err(AuthzDenial {
            code: ErrorCode::EnvironmentMismatch,
            reason: format!("device environment {} does not match service environment {service_environment}", device.environment),
        });
    }

    // 4. Per-topic capability flag.
    if let Some(topic) = tool.topic {
        if !device_has_topic_capability(device, topic) {
            return Err(AuthzDenial {
                code: ErrorCode::CapabilityDenied,
                reason: format!("device {} does not have the '{topic}' write capability enabled", device.id),
            });
        }
    }

    // 5. Production guardrail for professional-tier tools.
    if tool.tier == ToolTier::Professional && device.environment == Environment::Prod && !allow_prod_writes {
        return Err(AuthzDenial {
            code: ErrorCode::AuthzDenied,
            reason: "professional-tier writes to prod devices are disabled; allowed environments: lab, staging".to_string(),
        });
    }

    // 6. Approval-token binding, apply operations only.
    if tool.is_apply {
        let binding = apply.ok_or_else(|| AuthzDenial {
            code: ErrorCode::ApprovalTokenInvalid,
            reason: "apply operation requires an approval token".to_string(),
        })?;
        let tokens_match = binding.supplied_token.as_bytes().ct_eq(binding.plan_token.as_bytes()).into();
        if !tokens_match {
            return Err(AuthzDenial {
                code: ErrorCode::ApprovalTokenInvalid,
                reason: "supplied approval token does not match the plan's token".to_string(),
            });
        }
        if Utc::now() > binding.plan_expires_at {
            return Err(AuthzDenial {
                code: ErrorCode::ApprovalExpired,
                reason: "approval token has expired".to_string(),
            });
        }
    }

    Ok(())
}
