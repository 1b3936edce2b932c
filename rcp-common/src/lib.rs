//! Shared domain types, error catalog, configuration and credential
//! encryption for the RouterOS fleet control plane.

pub mod macros;

pub mod config;
pub mod crypto;
pub mod domain;
pub mod error;
pub mod ids;

pub use error::{CoreError, CoreResult, ErrorCode};
