use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::device::DeviceId;
use crate::opaque_id;

opaque_id!(CredentialId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialKind {
    Rest,
    Shell,
    ShellKey,
}

/// A device credential. `encrypted_secret` is ciphertext produced by
/// `crate::crypto`; plaintext never crosses this boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub id: CredentialId,
    pub device_id: DeviceId,
    pub kind: CredentialKind,
    pub username: String,
    pub encrypted_secret: Vec<u8>,
    pub key_fingerprint: Option<String>,
    pub active: bool,
    pub rotated_at: DateTime<Utc>,
}
