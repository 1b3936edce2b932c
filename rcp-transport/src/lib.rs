//! Credential & Transport Broker: REST/shell client contracts, a mock
//! transport for tests and lab devices, and connectivity probing.

pub mod broker;
pub mod client;
pub mod error;
pub mod mock;

pub use broker::{Broker, ClientHandle, ConnectivityReport, CredentialSource, Transport, TransportFactory};
pub use client::{RestClient, ResourceSample, ShellClient};
pub use error::TransportError;
