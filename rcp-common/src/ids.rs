//! Opaque id and token generation. Ids are `prefix-timestamp-random`;
//! never parsed by callers.

use chrono::{DateTime, Utc};
use rand::Rng;
use rand::distributions::Alphanumeric;

fn random_suffix(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect::<String>()
        .to_lowercase()
}

/// `plan-YYYYMMDDHHMMSS-{8 random chars}`
pub fn new_plan_id(now: DateTime<Utc>) -> String {
    format!("plan-{}-{}", now.format("%Y%m%d%H%M%S"), random_suffix(8))
}

/// `snap-YYYYMMDDHHMMSS-{8 random chars}`
pub fn new_snapshot_id(now: DateTime<Utc>) -> String {
    format!("snap-{}-{}", now.format("%Y%m%d%H%M%S"), random_suffix(8))
}

/// `job-YYYYMMDDHHMMSS-{8 random chars}`
pub fn new_job_id(now: DateTime<Utc>) -> String {
    format!("job-{}-{}", now.format("%Y%m%d%H%M%S"), random_suffix(8))
}

/// `req-YYYYMMDDHHMMSS-{8 random chars}`
pub fn new_approval_request_id(now: DateTime<Utc>) -> String {
    format!("req-{}-{}", now.format("%Y%m%d%H%M%S"), random_suffix(8))
}

/// `evt-YYYYMMDDHHMMSS-{8 random chars}`
pub fn new_audit_event_id(now: DateTime<Utc>) -> String {
    format!("evt-{}-{}", now.format("%Y%m%d%H%M%S"), random_suffix(8))
}

/// Opaque random suffix used inside an approval token (`approve-{sig}-{rand}`,
/// the `{rand}` part); the signature itself is computed by
/// `rcp_core::approval_token`, which owns the HMAC key.
pub fn new_token_suffix() -> String {
    random_suffix(16)
}
