use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::opaque_id;

opaque_id!(DeviceId);

/// Deployment environment a device lives in. Gates cross-environment writes
/// in the authorization gate and scopes the periodic snapshot/health jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    Lab,
    Staging,
    Prod,
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Lab => "lab",
            Self::Staging => "staging",
            Self::Prod => "prod",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    Healthy,
    Degraded,
    Unreachable,
    Pending,
    Decommissioned,
}

impl DeviceStatus {
    /// Devices in either state are never accepted as a plan target.
    pub fn excluded_from_plans(&self) -> bool {
        matches!(self, Self::Unreachable | Self::Decommissioned)
    }
}

/// Per-topic write capability flags. Each defaults false; the authz gate
/// consults the field matching a tool's topic before allowing a write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceCapabilities {
    pub advanced: bool,
    pub professional_workflows: bool,
    pub firewall: bool,
    pub routing: bool,
    pub wireless: bool,
    pub dhcp: bool,
    pub bridge: bool,
    pub bandwidth_test: bool,
}

/// Adaptive-polling state mutated after every health check (see
/// `rcp_core::health`). Lives on the device so the per-device scheduler can
/// read/write it without a side table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollingState {
    pub interval_secs: u64,
    pub consecutive_healthy: u32,
    pub last_backoff_at: Option<DateTime<Utc>>,
}

impl PollingState {
    pub fn base(critical: bool) -> Self {
        Self {
            interval_secs: if critical { 30 } else { 60 },
            consecutive_healthy: 0,
            last_backoff_at: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub id: DeviceId,
    pub name: String,
    pub host: String,
    pub port: u16,
    pub environment: Environment,
    pub status: DeviceStatus,
    #[serde(default)]
    pub tags: HashMap<String, String>,
    #[serde(default)]
    pub capabilities: DeviceCapabilities,
    pub critical: bool,
    pub routeros_version: Option<String>,
    pub routeros_model: Option<String>,
    pub polling: PollingState,
    pub last_seen_at: Option<DateTime<Utc>>,
}

impl Device {
    pub fn new(id: DeviceId, name: impl Into<String>, host: impl Into<String>, port: u16, environment: Environment) -> Self {
        Self {
            id,
            name: name.into(),
            host: host.into(),
            port,
            environment,
            status: DeviceStatus::Pending,
            tags: HashMap::new(),
            capabilities: DeviceCapabilities::default(),
            critical: false,
            routeros_version: None,
            routeros_model: None,
            polling: PollingState::base(false),
            last_seen_at: None,
        }
    }
}
