//! Issues the in-plan approval token: `approve-{sig}-{rand}`, where `sig`
//! is an HMAC-SHA256 of `(plan_id || created_by || expires_at)` under a
//! server-held key. The signature makes the token unguessable; validity is
//! still decided by a constant-time comparison against the plan's stored
//! token (see `plan::PlanService::approve_plan`), never by recomputing it.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use rcp_common::domain::plan::PlanId;
use rcp_common::ids::new_token_suffix;
use sha2::Sha256;

pub struct ApprovalTokenSigner {
    key: Vec<u8>,
}

impl ApprovalTokenSigner {
    pub fn new(key_material: &str) -> Self {
        Self {
            key: rcp_common::crypto::derive_32_bytes(key_material).to_vec(),
        }
    }

    fn sign(&self, plan_id: &PlanId, created_by: &str, expires_at: DateTime<Utc>) -> String {
        let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(&self.key).expect("hmac accepts any key length");
        mac.update(plan_id.as_str().as_bytes());
        mac.update(created_by.as_bytes());
        mac.update(expires_at.to_rfc3339().as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    pub fn issue(&self, plan_id: &PlanId, created_by: &str, expires_at: DateTime<Utc>) -> String {
        let sig = self.sign(plan_id, created_by, expires_at);
        format!("approve-{sig}-{}", new_token_suffix())
    }
}
