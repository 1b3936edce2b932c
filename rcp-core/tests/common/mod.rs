//! Shared fixtures for the crate's end-to-end scenario tests: a lab fleet
//! of healthy devices wired to a `Broker` whose per-host mock behavior can
//! be overridden per device, so a single batch can mix healthy and
//! degraded responses.

use std::collections::HashMap as StdHashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rcp_common::config::Settings;
use rcp_common::crypto::CredentialCipher;
use rcp_common::domain::credential::{Credential, CredentialId, CredentialKind};
use rcp_common::domain::device::{Device, DeviceCapabilities, DeviceId, DeviceStatus, Environment};
use rcp_common::domain::rbac::User;
use rcp_common::domain::ToolTier;
use rcp_core::approval_token::ApprovalTokenSigner;
use rcp_core::audit::AuditSink;
use rcp_core::health::HealthService;
use rcp_core::notify::EventBus;
use rcp_core::plan::{PlanService, ToolInvocation};
use rcp_core::store::Store;
use rcp_transport::broker::{Broker, CredentialSource, TransportFactory};
use rcp_transport::mock::{MockBehavior, MockRestClient, MockShellClient};
use rcp_transport::{RestClient, ShellClient};

pub fn lab_settings() -> Settings {
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
        default_batch_size: 2,
        transport_semaphore_permits: 5,
        health_cpu_threshold_default: 90.0,
        health_memory_threshold_default: 90.0,
        rollout_health_cpu_threshold: 80.0,
        rollout_health_memory_threshold: 85.0,
    }
}

pub struct FakeSource {
    pub credentials: StdHashMap<(DeviceId, CredentialKind), Credential>,
    pub endpoints: StdHashMap<DeviceId, (String, u16)>,
}

#[async_trait::async_trait]
impl CredentialSource for FakeSource {
    async fn active_credential(&self, device_id: &DeviceId, kind: CredentialKind) -> Option<Credential> {
        self.credentials.get(&(device_id.clone(), kind)).cloned()
    }
    async fn device_endpoint(&self, device_id: &DeviceId) -> Option<(String, u16)> {
        self.endpoints.get(device_id).cloned()
    }
    async fn mark_connectivity(&self, _device_id: &DeviceId, _reachable: bool, _transport: &str, _at: DateTime<Utc>) {}
}

/// Dispatches mock behavior by host, so one fleet can have most devices
/// healthy and a named few degraded or unreachable.
pub struct HostKeyedFactory {
    pub by_host: StdMutex<StdHashMap<String, MockBehavior>>,
    pub default: MockBehavior,
}

impl HostKeyedFactory {
    pub fn new(default: MockBehavior) -> Self {
        Self {
            by_host: StdMutex::new(StdHashMap::new()),
            default,
        }
    }

    pub fn set_host_behavior(&self, host: impl Into<String>, behavior: MockBehavior) {
        self.by_host.lock().unwrap().insert(host.into(), behavior);
    }

    fn behavior_for(&self, host: &str) -> MockBehavior {
        self.by_host.lock().unwrap().get(host).cloned().unwrap_or_else(|| self.default.clone())
    }
}

impl TransportFactory for HostKeyedFactory {
    fn build_rest_client(&self, host: &str, _port: u16, username: &str, _secret: &[u8], _verify_ssl: bool) -> Box<dyn RestClient> {
        Box::new(MockRestClient::new(self.behavior_for(host), username))
    }
    fn build_shell_client(&self, host: &str, _port: u16, _username: &str, _secret: &[u8]) -> Box<dyn ShellClient> {
        Box::new(MockShellClient::new(self.behavior_for(host)))
    }
}

/// A lab fleet of `count` devices, each `dev-lab-NN` with a distinct host
/// (so `HostKeyedFactory` can single one out), credentials already seeded.
pub struct Fleet {
    pub store: Store,
    pub device_ids: Vec<DeviceId>,
    pub broker: Arc<Broker<FakeSource, HostKeyedFactory>>,
    pub factory: Arc<HostKeyedFactory>,
    pub health: Arc<HealthService<FakeSource, HostKeyedFactory>>,
    pub plan_service: Arc<PlanService>,
    pub audit: AuditSink,
}

pub async fn build_fleet(count: usize, default_behavior: MockBehavior) -> Fleet {
    let store = Store::new();
    let cipher = Arc::new(CredentialCipher::from_settings(&lab_settings()).unwrap());
    let mut device_ids = Vec::with_capacity(count);
    let mut credentials = StdHashMap::new();
    let mut endpoints = StdHashMap::new();

    for i in 1..=count {
        let id = DeviceId::new(format!("dev-lab-{i:02}"));
        let host = format!("10.10.0.{i}");
        let mut device = Device::new(id.clone(), format!("lab-router-{i:02}"), host.clone(), 443, Environment::Lab);
        device.status = DeviceStatus::Healthy;
        device.capabilities = DeviceCapabilities {
            professional_workflows: true,
            firewall: true,
            ..Default::default()
        };
        store.upsert_device(device).await;

        let secret = cipher.encrypt(b"secret").unwrap();
        credentials.insert(
            (id.clone(), CredentialKind::Rest),
            Credential {
                id: CredentialId::new(format!("cred-{i}")),
                device_id: id.clone(),
                kind: CredentialKind::Rest,
                username: "admin".to_string(),
                encrypted_secret: secret,
                key_fingerprint: None,
                active: true,
                rotated_at: Utc::now(),
            },
        );
        endpoints.insert(id.clone(), (host, 443));
        device_ids.push(id);
    }

    let source = Arc::new(FakeSource { credentials, endpoints });
    let factory = Arc::new(HostKeyedFactory::new(default_behavior));
    let broker = Arc::new(Broker::new(source, factory.clone(), cipher, true, Duration::from_secs(5)));
    let health = Arc::new(HealthService::new(store.clone(), broker.clone(), EventBus::new(8)));
    let plan_service = Arc::new(PlanService::new(store.clone(), ApprovalTokenSigner::new("test-key"), AuditSink::new(store.clone()), Environment::Lab, false));
    let audit = AuditSink::new(store.clone());

    Fleet {
        store,
        device_ids,
        broker,
        factory,
        health,
        plan_service,
        audit,
    }
}

pub fn host_of(fleet: &Fleet, device_id: &DeviceId) -> String {
    fleet.device_ids.iter().position(|d| d == device_id).map(|i| format!("10.10.0.{}", i + 1)).expect("device must be part of the fleet")
}

/// An admin user whose scope and tier clear the authorization gate for
/// every fixture device these scenarios exercise.
pub fn admin_user() -> User {
    User {
        sub: "alice".to_string(),
        role: "admin".to_string(),
        device_scope: Vec::new(),
    }
}

pub fn invocation(user: &User) -> ToolInvocation<'_> {
    ToolInvocation {
        user,
        tier: ToolTier::Fundamental,
        topic: None,
        cross_environment: false,
    }
}
