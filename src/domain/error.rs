use std::fmt;

use thiserror::Error;

use crate::domain::models::user::NationalId;

/// Errors that may go away on their own: a later attempt can succeed.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

/// Fields a registration cannot be persisted without.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequiredField {
    NationalId,
    Name,
    Email,
    Secret,
    Phone,
}

impl fmt::Display for RequiredField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RequiredField::NationalId => "DNI",
            RequiredField::Name => "Name",
            RequiredField::Email => "Email",
            RequiredField::Secret => "Password",
            RequiredField::Phone => "Phone",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("{0} is required")]
    MissingField(RequiredField),

    #[error("User with DNI {0} already exists")]
    DuplicateNationalId(NationalId),

    #[error("User with email {0} already exists")]
    DuplicateEmail(String),

    #[error("Failed to secure credentials: {0}")]
    Secret(String),

    #[error("Error persisting user: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Database error: {0}")]
    Query(String),
}

impl Retryable for StoreError {
    fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Connection(_) | StoreError::Timeout(_))
    }
}

#[derive(Debug, Clone, Error)]
pub enum BrokerError {
    #[error("Broker connection error: {0}")]
    Connection(String),

    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    #[error("Broker protocol error: {0}")]
    Protocol(String),

    #[error("Serialization failed: {0}")]
    Serialization(String),
}

impl Retryable for BrokerError {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            BrokerError::Connection(_) | BrokerError::ChannelClosed(_)
        )
    }
}
