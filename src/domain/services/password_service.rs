use crate::domain::{error::RegistrationError, models::secret::HashedSecret};

/// Service for hashing and verifying registration secrets
pub trait SecretHasher: Send + Sync {
    /// Hash a plain secret
    fn hash(&self, plain_secret: &str) -> Result<HashedSecret, RegistrationError>;

    /// Verify a plain secret against a hashed secret
    fn verify(
        &self,
        plain_secret: &str,
        hashed_secret: &HashedSecret,
    ) -> Result<bool, RegistrationError>;
}
