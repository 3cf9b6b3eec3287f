use async_trait::async_trait;

use crate::domain::{
    error::StoreError,
    models::user::{NationalId, User},
};

/// Entry point to the user store: hands out transactions.
#[async_trait]
pub trait UserStore: Send + Sync {
    type Transaction: UserTransaction;

    async fn begin(&self) -> Result<Self::Transaction, StoreError>;
}

/// Row-level user operations scoped to one transaction.
///
/// Nothing written through a transaction is visible to others until
/// [`UserTransaction::commit`]. Dropping a transaction without committing
/// discards every write made through it.
#[async_trait]
pub trait UserTransaction: Send + Sync {
    async fn exists_by_national_id(&self, national_id: NationalId) -> Result<bool, StoreError>;

    async fn exists_by_email(&self, email: &str) -> Result<bool, StoreError>;

    /// Loads the user with both sides of its friend adjacency.
    async fn find_by_national_id(&self, national_id: NationalId)
    -> Result<Option<User>, StoreError>;

    /// Inserts the user when it has no id yet, otherwise overwrites the row with that id.
    async fn save(&self, user: User) -> Result<User, StoreError>;

    /// Persists every outgoing edge in `user.friends()`; existing edges are left as is.
    async fn save_friend_edges(&self, user: &User) -> Result<(), StoreError>;

    async fn commit(self) -> Result<(), StoreError>;

    async fn rollback(self) -> Result<(), StoreError>;
}
