//! Loads the initial device manifest the daemon polls and snapshots.
//! Devices can also be registered later by whatever system drives plan
//! creation; this just seeds the store at startup.

use std::path::Path;

use rcp_common::domain::device::{Device, DeviceCapabilities, DeviceId, Environment};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct DeviceManifestEntry {
    pub id: String,
    pub name: String,
    pub host: String,
    pub port: u16,
    pub environment: Environment,
    #[serde(default)]
    pub capabilities: DeviceCapabilities,
    #[serde(default)]
    pub critical: bool,
}

pub fn load_manifest(path: &Path) -> anyhow::Result<Vec<Device>> {
    let raw = std::fs::read_to_string(path)?;
    let entries: Vec<DeviceManifestEntry> = serde_json::from_str(&raw)?;
    Ok(entries
        .into_iter()
        .map(|entry| {
            let mut device = Device::new(DeviceId::new(entry.id), entry.name, entry.host, entry.port, entry.environment);
            device.capabilities = entry.capabilities;
            device.critical = entry.critical;
            device
        })
        .collect())
}
