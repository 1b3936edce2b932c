//! Credential & Transport Broker: resolves a device's active credential,
//! decrypts it, and hands the caller a scoped client handle that releases
//! deterministically on every exit path.

use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rcp_common::crypto::CredentialCipher;
use rcp_common::domain::credential::{Credential, CredentialKind};
use rcp_common::domain::device::DeviceId;

use crate::client::{RestClient, ShellClient};
use crate::error::TransportError;

/// What the broker needs from the device store to resolve a transport.
/// Implemented by `rcp-core`'s store adapter; kept here as a narrow seam so
/// `rcp-transport` never depends on `rcp-core`.
#[async_trait::async_trait]
pub trait CredentialSource: Send + Sync {
    async fn active_credential(&self, device_id: &DeviceId, kind: CredentialKind) -> Option<Credential>;
    async fn device_endpoint(&self, device_id: &DeviceId) -> Option<(String, u16)>;
    async fn mark_connectivity(&self, device_id: &DeviceId, reachable: bool, transport: &str, at: DateTime<Utc>);
}

/// Builds concrete transport clients from a resolved endpoint and decrypted
/// secret. The default (mock) factory never opens a socket; a production
/// deployment supplies a REST/SSH-backed factory at the same seam.
pub trait TransportFactory: Send + Sync {
    fn build_rest_client(&self, host: &str, port: u16, username: &str, secret: &[u8], verify_ssl: bool) -> Box<dyn RestClient>;
    fn build_shell_client(&self, host: &str, port: u16, username: &str, secret: &[u8]) -> Box<dyn ShellClient>;
}

/// A scoped client handle. Release is deterministic: dropping the handle
/// (end of scope, early return, or panic unwind) always runs [`Drop`].
pub struct ClientHandle<T: ?Sized> {
    device_id: DeviceId,
    inner: Box<T>,
}

impl<T: ?Sized> Deref for ClientHandle<T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.inner
    }
}

impl<T: ?Sized> Drop for ClientHandle<T> {
    fn drop(&mut self) {
        tracing::debug!(device_id = %self.device_id, "released transport client");
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transport {
    Rest,
    Shell,
}

impl Transport {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Rest => "rest",
            Self::Shell => "shell",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConnectivityReport {
    pub reachable: bool,
    pub transport: Option<Transport>,
    pub fallback_used: bool,
    pub attempted_transports: Vec<Transport>,
    pub failure_reason: Option<String>,
}

pub struct Broker<S: CredentialSource, F: TransportFactory> {
    source: Arc<S>,
    factory: Arc<F>,
    cipher: Arc<CredentialCipher>,
    verify_ssl: bool,
    call_timeout: Duration,
}

impl<S: CredentialSource, F: TransportFactory> Broker<S, F> {
    pub fn new(source: Arc<S>, factory: Arc<F>, cipher: Arc<CredentialCipher>, verify_ssl: bool, call_timeout: Duration) -> Self {
        Self {
            source,
            factory,
            cipher,
            verify_ssl,
            call_timeout,
        }
    }

    /// Enforces the broker's fixed per-call timeout around a single
    /// REST/shell round-trip. Every client call, in this module or at a
    /// caller's site, goes through here rather than being awaited bare.
    pub async fn call<T>(&self, fut: impl std::future::Future<Output = Result<T, TransportError>>) -> Result<T, TransportError> {
        match tokio::time::timeout(self.call_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(self.call_timeout)),
        }
    }

    async fn resolve(&self, device_id: &DeviceId, kind: CredentialKind) -> Result<(String, u16, String, Vec<u8>), TransportError> {
        let credential = self
            .source
            .active_credential(device_id, kind)
            .await
            .ok_or_else(|| TransportError::NoCredentials {
                kind: format!("{kind:?}"),
            })?;
        let (host, port) = self
            .source
            .device_endpoint(device_id)
            .await
            .ok_or_else(|| TransportError::DeviceUnreachable("device endpoint unknown".to_string()))?;
        let secret = self.cipher.decrypt(&credential.encrypted_secret).map_err(|_| TransportError::Decryption)?;
        Ok((host, port, credential.username, secret))
    }

    pub async fn get_rest_client(&self, device_id: &DeviceId) -> Result<ClientHandle<dyn RestClient>, TransportError> {
        let (host, port, username, secret) = self.resolve(device_id, CredentialKind::Rest).await?;
        let inner = self.factory.build_rest_client(&host, port, &username, &secret, self.verify_ssl);
        Ok(ClientHandle {
            device_id: device_id.clone(),
            inner,
        })
    }

    pub async fn get_shell_client(&self, device_id: &DeviceId) -> Result<ClientHandle<dyn ShellClient>, TransportError> {
        let kind = CredentialKind::Shell;
        let credential = match self.source.active_credential(device_id, kind).await {
            Some(c) => c,
            None => self
                .source
                .active_credential(device_id, CredentialKind::ShellKey)
                .await
                .ok_or_else(|| TransportError::NoCredentials {
                    kind: "shell".to_string(),
                })?,
        };
        let (host, port) = self
            .source
            .device_endpoint(device_id)
            .await
            .ok_or_else(|| TransportError::DeviceUnreachable("device endpoint unknown".to_string()))?;
        let secret = self.cipher.decrypt(&credential.encrypted_secret).map_err(|_| TransportError::Decryption)?;
        let inner = self.factory.build_shell_client(&host, port, &credential.username, &secret);
        Ok(ClientHandle {
            device_id: device_id.clone(),
            inner,
        })
    }

    /// Tries REST first; on failure (and only then) falls back to shell.
    /// Records which transports were attempted either way.
    pub async fn check_connectivity(&self, device_id: &DeviceId) -> ConnectivityReport {
        let mut attempted = Vec::new();
        let now = Utc::now();

        match self.get_rest_client(device_id).await {
            Ok(client) => {
                attempted.push(Transport::Rest);
                if self.call(client.get_system_identity()).await.is_ok() {
                    self.source.mark_connectivity(device_id, true, Transport::Rest.as_str(), now).await;
                    return ConnectivityReport {
                        reachable: true,
                        transport: Some(Transport::Rest),
                        fallback_used: false,
                        attempted_transports: attempted,
                        failure_reason: None,
                    };
                }
            }
            Err(_) => attempted.push(Transport::Rest),
        }

        match self.get_shell_client(device_id).await {
            Ok(client) => {
                attempted.push(Transport::Shell);
                match self.call(client.system_resource_print()).await {
                    Ok(_) => {
                        self.source.mark_connectivity(device_id, true, Transport::Shell.as_str(), now).await;
                        ConnectivityReport {
                            reachable: true,
                            transport: Some(Transport::Shell),
                            fallback_used: true,
                            attempted_transports: attempted,
                            failure_reason: None,
                        }
                    }
                    Err(e) => {
                        self.source.mark_connectivity(device_id, false, "none", now).await;
                        ConnectivityReport {
                            reachable: false,
                            transport: None,
                            fallback_used: true,
                            attempted_transports: attempted,
                            failure_reason: Some(e.to_string()),
                        }
                    }
                }
            }
            Err(e) => {
                self.source.mark_connectivity(device_id, false, "none", now).await;
                ConnectivityReport {
                    reachable: false,
                    transport: None,
                    fallback_used: !attempted.is_empty(),
                    attempted_transports: attempted,
                    failure_reason: Some(e.to_string()),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockBehavior, MockRestClient, MockShellClient};
    use rcp_common::config::Settings;
    use rcp_common::domain::device::Environment;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tokio::sync::Mutex as AsyncMutex;

    struct FakeSource {
        credentials: HashMap<(DeviceId, CredentialKind), Credential>,
        endpoints: HashMap<DeviceId, (String, u16)>,
        connectivity: AsyncMutex<Vec<(DeviceId, bool)>>,
    }

    #[async_trait::async_trait]
    impl CredentialSource for FakeSource {
        async fn active_credential(&self, device_id: &DeviceId, kind: CredentialKind) -> Option<Credential> {
            self.credentials.get(&(device_id.clone(), kind)).cloned()
        }
        async fn device_endpoint(&self, device_id: &DeviceId) -> Option<(String, u16)> {
            self.endpoints.get(device_id).cloned()
        }
        async fn mark_connectivity(&self, device_id: &DeviceId, reachable: bool, _transport: &str, _at: DateTime<Utc>) {
            self.connectivity.lock().await.push((device_id.clone(), reachable));
        }
    }

    struct FakeFactory {
        rest_behavior: Mutex<MockBehavior>,
        shell_behavior: Mutex<MockBehavior>,
    }

    impl TransportFactory for FakeFactory {
        fn build_rest_client(&self, _host: &str, _port: u16, _username: &str, _secret: &[u8], _verify_ssl: bool) -> Box<dyn RestClient> {
            Box::new(MockRestClient::new(self.rest_behavior.lock().unwrap().clone(), "mock-identity"))
        }
        fn build_shell_client(&self, _host: &str, _port: u16, _username: &str, _secret: &[u8]) -> Box<dyn ShellClient> {
            Box::new(MockShellClient::new(self.shell_behavior.lock().unwrap().clone()))
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

    fn broker_with(rest: MockBehavior, shell: MockBehavior) -> (Broker<FakeSource, FakeFactory>, DeviceId) {
        let device_id = DeviceId::new("dev-1");
        let cipher = Arc::new(CredentialCipher::from_settings(&lab_settings()).unwrap());
        let secret = cipher.encrypt(b"s3cr3t").unwrap();
        let mut credentials = HashMap::new();
        credentials.insert(
            (device_id.clone(), CredentialKind::Rest),
            Credential {
                id: rcp_common::domain::credential::CredentialId::new("cred-1"),
                device_id: device_id.clone(),
                kind: CredentialKind::Rest,
                username: "admin".to_string(),
                encrypted_secret: secret.clone(),
                key_fingerprint: None,
                active: true,
                rotated_at: Utc::now(),
            },
        );
        credentials.insert(
            (device_id.clone(), CredentialKind::Shell),
            Credential {
                id: rcp_common::domain::credential::CredentialId::new("cred-2"),
                device_id: device_id.clone(),
                kind: CredentialKind::Shell,
                username: "admin".to_string(),
                encrypted_secret: secret,
                key_fingerprint: None,
                active: true,
                rotated_at: Utc::now(),
            },
        );
        let mut endpoints = HashMap::new();
        endpoints.insert(device_id.clone(), ("10.0.0.1".to_string(), 443));
        let source = Arc::new(FakeSource {
            credentials,
            endpoints,
            connectivity: AsyncMutex::new(Vec::new()),
        });
        let factory = Arc::new(FakeFactory {
            rest_behavior: Mutex::new(rest),
            shell_behavior: Mutex::new(shell),
        });
        (Broker::new(source, factory, cipher, true, Duration::from_secs(10)), device_id)
    }

    #[tokio::test]
    async fn prefers_rest_when_it_answers() {
        let (broker, device_id) = broker_with(MockBehavior::healthy(), MockBehavior::healthy());
        let report = broker.check_connectivity(&device_id).await;
        assert!(report.reachable);
        assert_eq!(report.transport, Some(Transport::Rest));
        assert!(!report.fallback_used);
    }

    #[tokio::test]
    async fn falls_back_to_shell_when_rest_fails() {
        let (broker, device_id) = broker_with(MockBehavior::Fail("rest down".into()), MockBehavior::healthy());
        let report = broker.check_connectivity(&device_id).await;
        assert!(report.reachable);
        assert_eq!(report.transport, Some(Transport::Shell));
        assert!(report.fallback_used);
        assert_eq!(report.attempted_transports, vec![Transport::Rest, Transport::Shell]);
    }

    #[tokio::test]
    async fn reports_unreachable_when_both_fail() {
        let (broker, device_id) = broker_with(MockBehavior::Fail("rest down".into()), MockBehavior::Fail("shell down".into()));
        let report = broker.check_connectivity(&device_id).await;
        assert!(!report.reachable);
        assert!(report.failure_reason.is_some());
    }

    #[tokio::test]
    async fn call_enforces_the_configured_timeout() {
        let device_id = DeviceId::new("dev-1");
        let cipher = Arc::new(CredentialCipher::from_settings(&lab_settings()).unwrap());
        let secret = cipher.encrypt(b"s3cr3t").unwrap();
        let mut credentials = HashMap::new();
        credentials.insert(
            (device_id.clone(), CredentialKind::Rest),
            Credential {
                id: rcp_common::domain::credential::CredentialId::new("cred-1"),
                device_id: device_id.clone(),
                kind: CredentialKind::Rest,
                username: "admin".to_string(),
                encrypted_secret: secret,
                key_fingerprint: None,
                active: true,
                rotated_at: Utc::now(),
            },
        );
        let mut endpoints = HashMap::new();
        endpoints.insert(device_id.clone(), ("10.0.0.1".to_string(), 443));
        let source = Arc::new(FakeSource {
            credentials,
            endpoints,
            connectivity: AsyncMutex::new(Vec::new()),
        });
        let factory = Arc::new(FakeFactory {
            rest_behavior: Mutex::new(MockBehavior::Hang),
            shell_behavior: Mutex::new(MockBehavior::Hang),
        });
        let broker = Broker::new(source, factory, cipher, true, Duration::from_millis(20));
        let client = broker.get_rest_client(&device_id).await.unwrap();

        let err = broker.call(client.get_system_resource()).await.unwrap_err();
        assert!(matches!(err, TransportError::Timeout(d) if d == Duration::from_millis(20)));
    }

    #[tokio::test]
    async fn missing_credentials_surface_as_no_credentials() {
        let device_id = DeviceId::new("dev-missing");
        let cipher = Arc::new(CredentialCipher::from_settings(&lab_settings()).unwrap());
        let source = Arc::new(FakeSource {
            credentials: HashMap::new(),
            endpoints: HashMap::new(),
            connectivity: AsyncMutex::new(Vec::new()),
        });
        let factory = Arc::new(FakeFactory {
            rest_behavior: Mutex::new(MockBehavior::healthy()),
            shell_behavior: Mutex::new(MockBehavior::healthy()),
        });
        let broker = Broker::new(source, factory, cipher, true, Duration::from_secs(10));
        let err = broker.get_rest_client(&device_id).await.unwrap_err();
        assert!(matches!(err, TransportError::NoCredentials { .. }));
    }
}
