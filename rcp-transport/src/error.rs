use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("no active {kind} credential for device")]
    NoCredentials { kind: String },
    #[error("device unreachable: {0}")]
    DeviceUnreachable(String),
    #[error("failed to decrypt credential secret")]
    Decryption,
    #[error("transport call timed out after {0:?}")]
    Timeout(std::time::Duration),
}
