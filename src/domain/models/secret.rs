use serde::{Deserialize, Serialize};

/// Value object representing a hashed registration secret
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashedSecret(String);

impl HashedSecret {
    /// Create a new HashedSecret from an already hashed string
    pub fn new(hash: String) -> Self {
        Self(hash)
    }

    /// Get the hash as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}
