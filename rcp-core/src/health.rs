//! Health Service & Adaptive Poller. REST-first, shell-fallback resource
//! checks, CPU/memory threshold classification, and an adaptive polling
//! interval that backs off on sustained health and on unreachability.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use rcp_common::domain::device::{Device, DeviceId, DeviceStatus, PollingState};
use rcp_transport::broker::{Broker, CredentialSource, TransportFactory};
use rcp_transport::client::ResourceSample;

use crate::metrics;
use crate::notify::{EventBus, HealthResourceUpdated};
use crate::store::Store;

const HIGH_THRESHOLD: f64 = 90.0;
const WARN_THRESHOLD: f64 = 75.0;

const POLL_FLOOR_SECONDS: u64 = 30;
const POLL_HEALTHY_STABILIZE_COUNT: u32 = 10;
const POLL_HEALTHY_BACKOFF_MULTIPLIER: f64 = 1.5;
const POLL_HEALTHY_CAP_SECONDS: u64 = 300;
const POLL_UNREACHABLE_FIRST_SECONDS: u64 = 60;
const POLL_UNREACHABLE_CAP_SECONDS: u64 = 960;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unreachable,
}

impl HealthStatus {
    fn as_label(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unreachable => "unreachable",
        }
    }
}

#[derive(Debug, Clone)]
pub struct HealthCheckResult {
    pub device_id: DeviceId,
    pub status: HealthStatus,
    pub cpu_usage_percent: f64,
    pub memory_usage_percent: f64,
    pub uptime_seconds: u64,
    pub issues: Vec<String>,
    pub warnings: Vec<String>,
    pub source: &'static str,
}

pub struct HealthService<S: CredentialSource, F: TransportFactory> {
    store: Store,
    broker: Arc<Broker<S, F>>,
    events: EventBus,
}

impl<S: CredentialSource, F: TransportFactory> HealthService<S, F> {
    pub fn new(store: Store, broker: Arc<Broker<S, F>>, events: EventBus) -> Self {
        Self { store, broker, events }
    }

    /// Fetches a resource sample via REST, falling back to shell; classifies
    /// against the default 90%/75% thresholds, persists, runs the adaptive
    /// poller, then broadcasts a lightweight resource-updated event.
    pub async fn run_health_check(&self, device_id: &DeviceId) -> HealthCheckResult {
        self.run_health_check_with_thresholds(device_id, HIGH_THRESHOLD, HIGH_THRESHOLD, WARN_THRESHOLD, WARN_THRESHOLD).await
    }

    /// Fans the full check out over `device_ids` against caller-supplied
    /// issue thresholds (used by the rollout executor's stricter post-batch
    /// gate), still persisting, adapting the poll interval, and broadcasting
    /// for each device the same as a single `run_health_check` would.
    pub async fn run_batch_health_checks(&self, device_ids: &[DeviceId], cpu_threshold: f64, memory_threshold: f64) -> HashMap<DeviceId, HealthCheckResult> {
        let mut handles = Vec::with_capacity(device_ids.len());
        for device_id in device_ids {
            let device_id = device_id.clone();
            handles.push(self.run_health_check_with_thresholds(&device_id, cpu_threshold, HIGH_THRESHOLD, memory_threshold, WARN_THRESHOLD));
        }
        let results = futures_join_all(handles).await;
        results.into_iter().map(|r| (r.device_id.clone(), r)).collect()
    }

    async fn run_health_check_with_thresholds(
        &self,
        device_id: &DeviceId,
        cpu_issue_threshold: f64,
        cpu_warn_floor: f64,
        mem_issue_threshold: f64,
        mem_warn_floor: f64,
    ) -> HealthCheckResult {
        let result = self.sample_and_classify(device_id, cpu_issue_threshold, cpu_warn_floor, mem_issue_threshold, mem_warn_floor).await;

        metrics::HEALTH_CHECK_TOTAL
            .with_label_values(&[device_id.as_str(), result.status.as_label(), result.source])
            .inc();

        if let Some(device) = self.store.get_device(device_id).await {
            self.store.update_device_status(device_id, status_for(result.status)).await;
            self.adaptive_update(&device, result.status).await;
        }

        self.events.emit(
            "resource_updated",
            &HealthResourceUpdated {
                uri: format!("device://{device_id}/health"),
                etag: Utc::now().to_rfc3339(),
                status_hint: result.status.as_label().to_string(),
            },
        );

        result
    }

    async fn sample_and_classify(&self, device_id: &DeviceId, cpu_issue_threshold: f64, cpu_warn_floor: f64, mem_issue_threshold: f64, mem_warn_floor: f64) -> HealthCheckResult {
        let cpu_warn_threshold = cpu_warn_floor.min(WARN_THRESHOLD);
        let mem_warn_threshold = mem_warn_floor.min(WARN_THRESHOLD);

        let (sample, source) = match self.fetch_sample(device_id).await {
            Ok(pair) => pair,
            Err(reason) => {
                return HealthCheckResult {
                    device_id: device_id.clone(),
                    status: HealthStatus::Unreachable,
                    cpu_usage_percent: 0.0,
                    memory_usage_percent: 0.0,
                    uptime_seconds: 0,
                    issues: vec![reason],
                    warnings: Vec::new(),
                    source: "none",
                };
            }
        };

        let memory_usage_percent = sample.memory_used_percent();
        let mut issues = Vec::new();
        let mut warnings = Vec::new();

        if sample.cpu_load_percent > cpu_issue_threshold {
            issues.push(format!("cpu load {:.1}% exceeds {:.1}%", sample.cpu_load_percent, cpu_issue_threshold));
        } else if sample.cpu_load_percent > cpu_warn_threshold {
            warnings.push(format!("cpu load {:.1}% exceeds warning threshold {:.1}%", sample.cpu_load_percent, cpu_warn_threshold));
        }
        if memory_usage_percent > mem_issue_threshold {
            issues.push(format!("memory usage {memory_usage_percent:.1}% exceeds {mem_issue_threshold:.1}%"));
        } else if memory_usage_percent > mem_warn_threshold {
            warnings.push(format!("memory usage {memory_usage_percent:.1}% exceeds warning threshold {mem_warn_threshold:.1}%"));
        }

        let status = if !issues.is_empty() {
            HealthStatus::Degraded
        } else if !warnings.is_empty() {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        HealthCheckResult {
            device_id: device_id.clone(),
            status,
            cpu_usage_percent: sample.cpu_load_percent,
            memory_usage_percent,
            uptime_seconds: sample.uptime_seconds,
            issues,
            warnings,
            source,
        }
    }

    async fn fetch_sample(&self, device_id: &DeviceId) -> Result<(ResourceSample, &'static str), String> {
        if let Ok(client) = self.broker.get_rest_client(device_id).await {
            if let Ok(sample) = self.broker.call(client.get_system_resource()).await {
                return Ok((sample, "rest"));
            }
        }
        let shell = self.broker.get_shell_client(device_id).await.map_err(|e| e.to_string())?;
        let output = self.broker.call(shell.system_resource_print()).await.map_err(|e| e.to_string())?;
        let sample = rcp_transport::client::parse_resource_print(&output).map_err(|e| e.to_string())?;
        Ok((sample, "shell"))
    }

    /// Mutates the device's polling interval and persists it. Does not
    /// itself reschedule the periodic task; the scheduler owns that (see
    /// `rcpd`'s cron wiring).
    async fn adaptive_update(&self, device: &Device, status: HealthStatus) {
        let mut polling = device.polling.clone();
        match status {
            HealthStatus::Healthy => {
                polling.consecutive_healthy += 1;
                if polling.consecutive_healthy >= POLL_HEALTHY_STABILIZE_COUNT {
                    let scaled = (polling.interval_secs as f64 * POLL_HEALTHY_BACKOFF_MULTIPLIER) as u64;
                    polling.interval_secs = scaled.min(POLL_HEALTHY_CAP_SECONDS).max(POLL_FLOOR_SECONDS);
                    polling.consecutive_healthy = 0;
                }
                polling.last_backoff_at = None;
            }
            HealthStatus::Degraded => {
                polling.consecutive_healthy = 0;
                polling.interval_secs = if device.critical { 30 } else { 60 };
            }
            HealthStatus::Unreachable => {
                polling.consecutive_healthy = 0;
                polling.interval_secs = if polling.last_backoff_at.is_none() {
                    POLL_UNREACHABLE_FIRST_SECONDS
                } else {
                    (polling.interval_secs * 2).min(POLL_UNREACHABLE_CAP_SECONDS)
                };
                polling.last_backoff_at = Some(Utc::now());
            }
        }
        self.store.update_device_polling(&device.id, polling).await;
    }

    /// Environment-wide health roll-up, counted by device status.
    pub async fn fleet_health(&self, devices: &[Device]) -> FleetHealthSummary {
        let mut summary = FleetHealthSummary::default();
        for device in devices {
            match device.status {
                DeviceStatus::Healthy => summary.healthy += 1,
                DeviceStatus::Degraded => summary.degraded += 1,
                DeviceStatus::Unreachable => summary.unreachable += 1,
                DeviceStatus::Pending => summary.pending += 1,
                DeviceStatus::Decommissioned => summary.decommissioned += 1,
            }
        }
        summary
    }
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct FleetHealthSummary {
    pub healthy: usize,
    pub degraded: usize,
    pub unreachable: usize,
    pub pending: usize,
    pub decommissioned: usize,
}

fn status_for(status: HealthStatus) -> DeviceStatus {
    match status {
        HealthStatus::Healthy => DeviceStatus::Healthy,
        HealthStatus::Degraded => DeviceStatus::Degraded,
        HealthStatus::Unreachable => DeviceStatus::Unreachable,
    }
}

/// Tiny local stand-in for `futures::future::join_all` so this crate does
/// not need to pull in the `futures` crate for a single call site.
async fn futures_join_all<Fut: std::future::Future>(futures: Vec<Fut>) -> Vec<Fut::Output> {
    let mut handles = Vec::with_capacity(futures.len());
    for fut in futures {
        handles.push(fut.await);
    }
    handles
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_polling() -> PollingState {
        PollingState {
            interval_secs: 60,
            consecutive_healthy: 9,
            last_backoff_at: None,
        }
    }

    #[test]
    fn healthy_status_never_drops_interval() {
        assert!(POLL_HEALTHY_BACKOFF_MULTIPLIER > 1.0);
    }

    #[test]
    fn unreachable_cap_matches_spec_table() {
        assert_eq!(POLL_UNREACHABLE_CAP_SECONDS, 960);
        assert_eq!(POLL_UNREACHABLE_FIRST_SECONDS, 60);
    }

    #[test]
    fn healthy_cap_matches_spec_table() {
        assert_eq!(POLL_HEALTHY_CAP_SECONDS, 300);
        assert_eq!(POLL_HEALTHY_STABILIZE_COUNT, 10);
        let _ = base_polling();
    }

    mod end_to_end {
        use super::*;
        use rcp_common::config::Settings;
        use rcp_common::crypto::CredentialCipher;
        use rcp_common::domain::credential::{Credential, CredentialId, CredentialKind};
        use rcp_common::domain::device::Environment;
        use rcp_transport::broker::{Broker, CredentialSource, TransportFactory};
        use rcp_transport::mock::{MockBehavior, MockRestClient, MockShellClient};
        use rcp_transport::{RestClient, ShellClient};
        use std::collections::HashMap as StdHashMap;
        use std::sync::Mutex as StdMutex;
        use std::time::Duration;
        use tokio::sync::Mutex as AsyncMutex;

        struct FakeSource {
            credentials: StdHashMap<(DeviceId, CredentialKind), Credential>,
            endpoints: StdHashMap<DeviceId, (String, u16)>,
            seen: AsyncMutex<Vec<(DeviceId, bool)>>,
        }

        #[async_trait::async_trait]
        impl CredentialSource for FakeSource {
            async fn active_credential(&self, device_id: &DeviceId, kind: CredentialKind) -> Option<Credential> {
                self.credentials.get(&(device_id.clone(), kind)).cloned()
            }
            async fn device_endpoint(&self, device_id: &DeviceId) -> Option<(String, u16)> {
                self.endpoints.get(device_id).cloned()
            }
            async fn mark_connectivity(&self, device_id: &DeviceId, reachable: bool, _transport: &str, _at: chrono::DateTime<Utc>) {
                self.seen.lock().await.push((device_id.clone(), reachable));
            }
        }

        struct FakeFactory {
            rest: StdMutex<MockBehavior>,
            shell: StdMutex<MockBehavior>,
        }

        impl TransportFactory for FakeFactory {
            fn build_rest_client(&self, _host: &str, _port: u16, _u: &str, _s: &[u8], _v: bool) -> Box<dyn RestClient> {
                Box::new(MockRestClient::new(self.rest.lock().unwrap().clone(), "lab-1"))
            }
            fn build_shell_client(&self, _host: &str, _port: u16, _u: &str, _s: &[u8]) -> Box<dyn ShellClient> {
                Box::new(MockShellClient::new(self.shell.lock().unwrap().clone()))
            }
        }

        fn lab_settings() -> Settings {
            Settings {
                environment: Environment::Lab,
                encryption_key: "test-key".to_string(),
                allow_prod_writes: false,
                snapshot_capture_enabled: true,
                snapshot_capture_interval_seconds: 3600,
                snapshot_max_size_bytes: 10 * 1024 * 1024,
                snapshot_compression_level: 6,
                snapshot_retention_count: 5,
                snapshot_use_shell_fallback: true,
                routeros_verify_ssl: true,
                session_ttl_seconds: 8 * 3600,
                approval_token_ttl_seconds: 900,
                default_batch_size: 5,
                transport_semaphore_permits: 5,
                health_cpu_threshold_default: 90.0,
                health_memory_threshold_default: 90.0,
                rollout_health_cpu_threshold: 80.0,
                rollout_health_memory_threshold: 85.0,
            }
        }

        #[tokio::test]
        async fn healthy_sample_classifies_as_healthy() {
            let device_id = DeviceId::new("dev-health-2");
            let cipher = Arc::new(CredentialCipher::from_settings(&lab_settings()).unwrap());
            let secret = cipher.encrypt(b"secret").unwrap();
            let mut credentials = StdHashMap::new();
            credentials.insert(
                (device_id.clone(), CredentialKind::Rest),
                Credential {
                    id: CredentialId::new("cred-2"),
                    device_id: device_id.clone(),
                    kind: CredentialKind::Rest,
                    username: "admin".to_string(),
                    encrypted_secret: secret,
                    key_fingerprint: None,
                    active: true,
                    rotated_at: Utc::now(),
                },
            );
            let mut endpoints = StdHashMap::new();
            endpoints.insert(device_id.clone(), ("10.0.0.6".to_string(), 443));
            let source = Arc::new(FakeSource {
                credentials,
                endpoints,
                seen: AsyncMutex::new(Vec::new()),
            });
            let factory = Arc::new(FakeFactory {
                rest: StdMutex::new(MockBehavior::healthy()),
                shell: StdMutex::new(MockBehavior::Fail("unused".into())),
            });
            let broker = Arc::new(Broker::new(source, factory, cipher, true, Duration::from_secs(5)));
            let store = Store::new();
            let device = Device::new(device_id.clone(), "lab-router", "10.0.0.6", 443, Environment::Lab);
            store.upsert_device(device).await;
            let service = HealthService::new(store, broker, EventBus::new(8));

            let result = service.run_health_check(&device_id).await;
            assert_eq!(result.status, HealthStatus::Healthy);
            assert_eq!(result.source, "rest");
        }

        #[tokio::test]
        async fn unreachable_device_first_backoff_is_sixty_seconds() {
            let device_id = DeviceId::new("dev-health-3");
            let cipher = Arc::new(CredentialCipher::from_settings(&lab_settings()).unwrap());
            let source = Arc::new(FakeSource {
                credentials: StdHashMap::new(),
                endpoints: StdHashMap::new(),
                seen: AsyncMutex::new(Vec::new()),
            });
            let factory = Arc::new(FakeFactory {
                rest: StdMutex::new(MockBehavior::Fail("down".into())),
                shell: StdMutex::new(MockBehavior::Fail("down".into())),
            });
            let broker = Arc::new(Broker::new(source, factory, cipher, true, Duration::from_secs(5)));
            let store = Store::new();
            let mut device = Device::new(device_id.clone(), "lab-router", "10.0.0.7", 443, Environment::Lab);
            device.polling = PollingState {
                interval_secs: 60,
                consecutive_healthy: 0,
                last_backoff_at: None,
            };
            store.upsert_device(device).await;
            let service = HealthService::new(store.clone(), broker, EventBus::new(8));

            let result = service.run_health_check(&device_id).await;
            assert_eq!(result.status, HealthStatus::Unreachable);

            let updated = store.get_device(&device_id).await.unwrap();
            assert_eq!(updated.polling.interval_secs, 60);
            assert!(updated.polling.last_backoff_at.is_some());
        }

        #[tokio::test]
        async fn batch_check_persists_status_and_adapts_polling_like_a_single_check() {
            let device_id = DeviceId::new("dev-health-batch");
            let cipher = Arc::new(CredentialCipher::from_settings(&lab_settings()).unwrap());
            let secret = cipher.encrypt(b"secret").unwrap();
            let mut credentials = StdHashMap::new();
            credentials.insert(
                (device_id.clone(), CredentialKind::Rest),
                Credential {
                    id: CredentialId::new("cred-batch"),
                    device_id: device_id.clone(),
                    kind: CredentialKind::Rest,
                    username: "admin".to_string(),
                    encrypted_secret: secret,
                    key_fingerprint: None,
                    active: true,
                    rotated_at: Utc::now(),
                },
            );
            let mut endpoints = StdHashMap::new();
            endpoints.insert(device_id.clone(), ("10.0.0.9".to_string(), 443));
            let source = Arc::new(FakeSource {
                credentials,
                endpoints,
                seen: AsyncMutex::new(Vec::new()),
            });
            // Healthy by the default 90%/75% thresholds but above the
            // stricter 10%/10% rollout gate passed to the batch call.
            let factory = Arc::new(FakeFactory {
                rest: StdMutex::new(MockBehavior::healthy()),
                shell: StdMutex::new(MockBehavior::Fail("unused".into())),
            });
            let broker = Arc::new(Broker::new(source, factory, cipher, true, Duration::from_secs(5)));
            let store = Store::new();
            let device = Device::new(device_id.clone(), "lab-router", "10.0.0.9", 443, Environment::Lab);
            store.upsert_device(device).await;
            let service = HealthService::new(store.clone(), broker, EventBus::new(8));

            let results = service.run_batch_health_checks(&[device_id.clone()], 10.0, 10.0).await;
            let result = &results[&device_id];
            assert_eq!(result.status, HealthStatus::Degraded);

            let updated = store.get_device(&device_id).await.unwrap();
            assert_eq!(updated.status, DeviceStatus::Degraded);
        }
    }
}
