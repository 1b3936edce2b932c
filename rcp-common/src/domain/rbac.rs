use serde::{Deserialize, Serialize};

use super::device::DeviceId;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Role {
    pub name: String,
    pub description: String,
}

/// `resource_id: None` means "`*`" — every resource of `resource_type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Permission {
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub action: String,
}

/// Authenticated caller. `device_scope` empty means fleet-wide; the
/// authorization gate (`rcp_core::authz`) enforces this.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub sub: String,
    pub role: String,
    #[serde(default)]
    pub device_scope: Vec<DeviceId>,
}

impl User {
    pub fn in_scope(&self, device_id: &DeviceId) -> bool {
        self.device_scope.is_empty() || self.device_scope.contains(device_id)
    }
}
