use argon2::{
    Argon2, PasswordHash as Argon2Hash,
    password_hash::{PasswordHasher as Argon2Hasher, PasswordVerifier, SaltString, rand_core::OsRng},
};

use crate::domain::{
    error::RegistrationError, models::secret::HashedSecret, services::password_service::SecretHasher,
};

#[derive(Clone)]
pub struct Argon2SecretHasher;

impl Argon2SecretHasher {
    pub fn new() -> Self {
        Self
    }
}

impl Default for Argon2SecretHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl SecretHasher for Argon2SecretHasher {
    fn hash(&self, plain_secret: &str) -> Result<HashedSecret, RegistrationError> {
        let salt = SaltString::generate(&mut OsRng);
        let argon2 = Argon2::default();

        let hash = argon2
            .hash_password(plain_secret.as_bytes(), &salt)
            .map_err(|e| RegistrationError::Secret(e.to_string()))?
            .to_string();

        Ok(HashedSecret::new(hash))
    }

    fn verify(
        &self,
        plain_secret: &str,
        hashed_secret: &HashedSecret,
    ) -> Result<bool, RegistrationError> {
        let parsed_hash = Argon2Hash::new(hashed_secret.as_str())
            .map_err(|e| RegistrationError::Secret(e.to_string()))?;

        Ok(Argon2::default()
            .verify_password(plain_secret.as_bytes(), &parsed_hash)
            .is_ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_then_verify() {
        let hasher = Argon2SecretHasher::new();
        let hashed = hasher.hash("1234").unwrap();

        assert_ne!("1234", hashed.as_str());
        assert!(hasher.verify("1234", &hashed).unwrap());
        assert!(!hasher.verify("4321", &hashed).unwrap());
    }

    #[test]
    fn test_hash_is_salted() {
        let hasher = Argon2SecretHasher::new();
        let first = hasher.hash("1234").unwrap();
        let second = hasher.hash("1234").unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn test_verify_rejects_malformed_hash() {
        let hasher = Argon2SecretHasher::new();
        let result = hasher.verify("1234", &HashedSecret::new("not-a-phc-string".to_string()));
        assert!(matches!(result, Err(RegistrationError::Secret(_))));
    }
}
