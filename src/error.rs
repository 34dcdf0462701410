//! Error types for DomainChain

use crate::amount::Amount;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("Domain already owned: {0}")]
    AlreadyRegistered(String),
    #[error("Wrong price: expected {expected} base units, attached {attached}")]
    WrongPrice { expected: Amount, attached: Amount },
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Registry has not been configured")]
    NotConfigured,
    #[error("Registry is already configured")]
    AlreadyConfigured,
    #[error("Invalid domain name: {0}")]
    InvalidName(String),
    #[error("Domain '{name}' has {labels} labels (max {max})")]
    DepthExceeded {
        name: String,
        labels: usize,
        max: usize,
    },
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Transfer failed: {0}")]
    TransferFailed(String),
    /// The transfer failed and the balance was restored in memory, but the
    /// restored balance could not be saved yet.
    #[error("Transfer failed ({transfer}); balance restored but not yet saved: {persistence}")]
    RefundNotPersisted { transfer: String, persistence: String },
    #[error("Arithmetic overflow")]
    ArithmeticOverflow,
    #[error("Cryptographic error: {0}")]
    CryptoError(String),
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("IO error: {0}")]
    IoError(String),
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl RegistryError {
    /// Whether the same caller may retry the same operation after fixing its
    /// inputs or waiting for the host. Everything else needs a different
    /// name, caller, or setup.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RegistryError::WrongPrice { .. } | RegistryError::TransferFailed(_)
        )
    }
}

impl From<std::io::Error> for RegistryError {
    fn from(err: std::io::Error) -> Self {
        RegistryError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for RegistryError {
    fn from(err: serde_json::Error) -> Self {
        RegistryError::SerializationError(err.to_string())
    }
}

impl From<rusqlite::Error> for RegistryError {
    fn from(err: rusqlite::Error) -> Self {
        RegistryError::DatabaseError(err.to_string())
    }
}

/// Convenience alias used across the crate
pub type Result<T> = std::result::Result<T, RegistryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(RegistryError::WrongPrice { expected: 1, attached: 2 }.is_retryable());
        assert!(RegistryError::TransferFailed("host offline".into()).is_retryable());
        assert!(!RegistryError::AlreadyRegistered("com".into()).is_retryable());
        assert!(!RegistryError::Unauthorized("nope".into()).is_retryable());
        assert!(!RegistryError::NotFound("com".into()).is_retryable());
        assert!(!RegistryError::RefundNotPersisted {
            transfer: "host offline".into(),
            persistence: "disk full".into(),
        }
        .is_retryable());
    }

    #[test]
    fn test_display_messages() {
        assert_eq!(
            RegistryError::AlreadyRegistered("com".into()).to_string(),
            "Domain already owned: com"
        );
        assert_eq!(
            RegistryError::WrongPrice { expected: 10, attached: 9 }.to_string(),
            "Wrong price: expected 10 base units, attached 9"
        );
    }
}
