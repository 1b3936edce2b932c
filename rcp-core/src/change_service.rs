//! The per-topic change service seam. Capturing, applying and rolling back
//! an individual device's configuration change is delegated to whichever
//! per-topic tool body owns that change (firewall rule, DNS record,
//! routing entry, ...); only the contract lives here.

use async_trait::async_trait;
use rcp_common::domain::device::DeviceId;
use rcp_common::error::CoreResult;

#[async_trait]
pub trait ChangeService: Send + Sync {
    /// Reads the device's current state for whatever `changes` is about to
    /// touch, so it can be restored later. Written into the plan's
    /// `previous_state[device_id]` subtree before `apply` runs.
    async fn capture_previous_state(&self, device_id: &DeviceId, changes: &serde_json::Value) -> CoreResult<serde_json::Value>;

    async fn apply(&self, device_id: &DeviceId, changes: &serde_json::Value) -> CoreResult<()>;

    async fn rollback(&self, device_id: &DeviceId, previous_state: &serde_json::Value) -> CoreResult<()>;
}
