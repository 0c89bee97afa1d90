//! Registry errors

use crate::config::KeychainError;
use crate::exchange::ExchangeError;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Invalid host: {0}")]
    InvalidHost(String),

    #[error("Host id already exists: {0}")]
    DuplicateHost(String),

    #[error("Invalid group: {0}")]
    InvalidGroup(String),

    #[error("Group already exists: {0}")]
    DuplicateGroup(String),

    #[error("Identity id already exists: {0}")]
    DuplicateIdentity(String),

    #[error("Not an ssh config host: {0}")]
    NotSystemHost(String),

    #[error("Secret store error: {0}")]
    Secret(#[from] KeychainError),

    #[error(transparent)]
    Exchange(#[from] ExchangeError),
}
