//! The daemon's default transport factory. Real RouterOS REST/SSH client
//! internals are outside this crate's scope; the daemon ships with the
//! reference mock transport so the rest of the engine (health polling,
//! snapshot capture, rollout apply) runs end to end without a live fleet.

use rcp_transport::broker::TransportFactory;
use rcp_transport::client::{RestClient, ShellClient};
use rcp_transport::mock::{MockBehavior, MockRestClient, MockShellClient};

pub struct DefaultTransportFactory {
    behavior: MockBehavior,
}

impl DefaultTransportFactory {
    pub fn new(behavior: MockBehavior) -> Self {
        Self { behavior }
    }
}

impl Default for DefaultTransportFactory {
    fn default() -> Self {
        Self::new(MockBehavior::healthy())
    }
}

impl TransportFactory for DefaultTransportFactory {
    fn build_rest_client(&self, _host: &str, _port: u16, username: &str, _secret: &[u8], _verify_ssl: bool) -> Box<dyn RestClient> {
        Box::new(MockRestClient::new(self.behavior.clone(), username))
    }

    fn build_shell_client(&self, _host: &str, _port: u16, _username: &str, _secret: &[u8]) -> Box<dyn ShellClient> {
        Box::new(MockShellClient::new(self.behavior.clone()))
    }
}
