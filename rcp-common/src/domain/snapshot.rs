use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::device::DeviceId;
use crate::opaque_id;

opaque_id!(SnapshotId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotSource {
    Rest,
    Shell,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotMeta {
    pub uncompressed_size: u64,
    pub compressed_size: u64,
    pub compression: String,
    pub compression_level: u32,
    pub checksum: String,
    pub checksum_algorithm: String,
    pub source: SnapshotSource,
    pub redacted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: SnapshotId,
    pub device_id: DeviceId,
    pub kind: String,
    pub timestamp: DateTime<Utc>,
    pub compressed: Vec<u8>,
    pub meta: SnapshotMeta,
}

impl Snapshot {
    pub fn default_kind() -> String {
        "config".to_string()
    }
}
