//! In-memory stand-ins for REST/shell transports, used by tests and by the
//! `mock://` device scheme: canned success/failure behavior per transport.

use async_trait::async_trait;
use std::sync::Mutex;

use crate::client::{RestClient, ResourceSample, ShellClient};
use crate::error::TransportError;

#[derive(Debug, Clone)]
pub enum MockBehavior {
    Success(ResourceSample),
    Fail(String),
    /// Never resolves within any reasonable call timeout; used to exercise
    /// `Broker::call`'s timeout enforcement without a real slow device.
    Hang,
}

impl MockBehavior {
    pub fn healthy() -> Self {
        Self::Success(ResourceSample {
            cpu_load_percent: 12.0,
            free_memory_bytes: 200 * 1024 * 1024,
            total_memory_bytes: 256 * 1024 * 1024,
            uptime_seconds: 86_400,
        })
    }
}

pub struct MockRestClient {
    behavior: Mutex<MockBehavior>,
    identity: String,
}

impl MockRestClient {
    pub fn new(behavior: MockBehavior, identity: impl Into<String>) -> Self {
        Self {
            behavior: Mutex::new(behavior),
            identity: identity.into(),
        }
    }

    pub fn set_behavior(&self, behavior: MockBehavior) {
        *self.behavior.lock().unwrap() = behavior;
    }
}

#[async_trait]
impl RestClient for MockRestClient {
    async fn get_system_resource(&self) -> Result<ResourceSample, TransportError> {
        match self.behavior.lock().unwrap().clone() {
            MockBehavior::Success(sample) => Ok(sample),
            MockBehavior::Fail(reason) => Err(TransportError::DeviceUnreachable(reason)),
            MockBehavior::Hang => {
                tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
                unreachable!("mock hang outlasted the caller's timeout")
            }
        }
    }

    async fn get_system_identity(&self) -> Result<String, TransportError> {
        Ok(self.identity.clone())
    }
}

pub struct MockShellClient {
    behavior: Mutex<MockBehavior>,
}

impl MockShellClient {
    pub fn new(behavior: MockBehavior) -> Self {
        Self {
            behavior: Mutex::new(behavior),
        }
    }

    pub fn set_behavior(&self, behavior: MockBehavior) {
        *self.behavior.lock().unwrap() = behavior;
    }
}

#[async_trait]
impl ShellClient for MockShellClient {
    async fn run(&self, command: &str) -> Result<String, TransportError> {
        match self.behavior.lock().unwrap().clone() {
            MockBehavior::Success(sample) => {
                if command.starts_with("/system/resource/print") {
                    Ok(format!(
                        "cpu-load: {}%\nfree-memory: {}\ntotal-memory: {}\nuptime: 1d0h0m\n",
                        sample.cpu_load_percent as u64, sample.free_memory_bytes, sample.total_memory_bytes
                    ))
                } else {
                    Ok("# mock export\n".to_string())
                }
            }
            MockBehavior::Fail(reason) => Err(TransportError::DeviceUnreachable(reason)),
            MockBehavior::Hang => {
                tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
                unreachable!("mock hang outlasted the caller's timeout")
            }
        }
    }
}
