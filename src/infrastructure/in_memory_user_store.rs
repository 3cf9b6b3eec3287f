//! Transactional in-memory user store.
//!
//! Each transaction works on its own copy of the tables. Commit re-checks
//! the unique and foreign-key constraints against the shared tables and
//! applies the staged rows atomically; dropping a transaction discards them.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::domain::{
    error::StoreError,
    models::{
        secret::HashedSecret,
        user::{NationalId, User, UserId},
    },
    repositories::user_repository::{UserStore, UserTransaction},
};

#[derive(Debug, Clone)]
struct UserRow {
    name: String,
    email: String,
    secret: String,
    national_id: NationalId,
    phone: i64,
}

#[derive(Debug, Clone, Default)]
struct Tables {
    users: BTreeMap<i64, UserRow>,
    edges: BTreeSet<(i64, i64)>,
}

impl Tables {
    fn id_of(&self, national_id: NationalId) -> Option<i64> {
        self.users
            .iter()
            .find(|(_, row)| row.national_id == national_id)
            .map(|(id, _)| *id)
    }

    fn to_user(&self, id: i64, row: &UserRow) -> User {
        let friends = self
            .edges
            .iter()
            .filter(|(owner, _)| *owner == id)
            .filter_map(|(_, friend)| self.users.get(friend).map(|r| r.national_id))
            .collect();
        let friend_of = self
            .edges
            .iter()
            .filter(|(_, friend)| *friend == id)
            .filter_map(|(owner, _)| self.users.get(owner).map(|r| r.national_id))
            .collect();

        User::reconstruct(
            UserId::new(id),
            row.name.clone(),
            row.email.clone(),
            HashedSecret::new(row.secret.clone()),
            row.national_id,
            row.phone,
            friends,
            friend_of,
        )
    }
}

#[derive(Clone, Default)]
pub struct InMemoryUserStore {
    tables: Arc<Mutex<Tables>>,
    next_id: Arc<AtomicI64>,
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of committed user rows.
    pub fn user_count(&self) -> usize {
        lock(&self.tables).map(|t| t.users.len()).unwrap_or(0)
    }

    /// Committed directed edges as `(owner, friend)` DNI pairs.
    pub fn edges(&self) -> Vec<(NationalId, NationalId)> {
        let Ok(tables) = lock(&self.tables) else {
            return Vec::new();
        };
        tables
            .edges
            .iter()
            .filter_map(|(owner, friend)| {
                let owner = tables.users.get(owner)?.national_id;
                let friend = tables.users.get(friend)?.national_id;
                Some((owner, friend))
            })
            .collect()
    }

    /// Committed view of one user.
    pub fn find(&self, national_id: NationalId) -> Option<User> {
        let tables = lock(&self.tables).ok()?;
        let id = tables.id_of(national_id)?;
        let row = tables.users.get(&id)?;
        Some(tables.to_user(id, row))
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    type Transaction = InMemoryTransaction;

    async fn begin(&self) -> Result<InMemoryTransaction, StoreError> {
        let snapshot = lock(&self.tables)?.clone();
        Ok(InMemoryTransaction {
            shared: Arc::clone(&self.tables),
            next_id: Arc::clone(&self.next_id),
            staged: Mutex::new(Staged {
                working: snapshot,
                written_users: BTreeSet::new(),
                written_edges: BTreeSet::new(),
            }),
        })
    }
}

struct Staged {
    working: Tables,
    written_users: BTreeSet<i64>,
    written_edges: BTreeSet<(i64, i64)>,
}

pub struct InMemoryTransaction {
    shared: Arc<Mutex<Tables>>,
    next_id: Arc<AtomicI64>,
    staged: Mutex<Staged>,
}

#[async_trait]
impl UserTransaction for InMemoryTransaction {
    async fn exists_by_national_id(&self, national_id: NationalId) -> Result<bool, StoreError> {
        Ok(lock(&self.staged)?.working.id_of(national_id).is_some())
    }

    async fn exists_by_email(&self, email: &str) -> Result<bool, StoreError> {
        Ok(lock(&self.staged)?
            .working
            .users
            .values()
            .any(|row| row.email == email))
    }

    async fn find_by_national_id(
        &self,
        national_id: NationalId,
    ) -> Result<Option<User>, StoreError> {
        let staged = lock(&self.staged)?;
        let tables = &staged.working;
        Ok(tables
            .id_of(national_id)
            .and_then(|id| tables.users.get(&id).map(|row| tables.to_user(id, row))))
    }

    async fn save(&self, mut user: User) -> Result<User, StoreError> {
        let mut staged = lock(&self.staged)?;
        let id = match user.id() {
            Some(id) => {
                if !staged.working.users.contains_key(&id.value()) {
                    return Err(StoreError::Query(format!("no user row with id {}", id.value())));
                }
                id
            }
            None => {
                let id = UserId::new(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
                user.assign_id(id);
                id
            }
        };

        staged.working.users.insert(
            id.value(),
            UserRow {
                name: user.name().to_string(),
                email: user.email().to_string(),
                secret: user.secret().as_str().to_string(),
                national_id: user.national_id(),
                phone: user.phone(),
            },
        );
        staged.written_users.insert(id.value());
        Ok(user)
    }

    async fn save_friend_edges(&self, user: &User) -> Result<(), StoreError> {
        let owner = user.id().ok_or_else(|| {
            StoreError::Query(format!("user {} has not been saved", user.national_id()))
        })?;
        let mut staged = lock(&self.staged)?;

        let mut edges = Vec::with_capacity(user.friends().len());
        for friend in user.friends() {
            let friend_id = staged.working.id_of(*friend).ok_or_else(|| {
                StoreError::Constraint(format!("friend {friend} references a missing user"))
            })?;
            edges.push((owner.value(), friend_id));
        }

        for edge in edges {
            if staged.working.edges.insert(edge) {
                staged.written_edges.insert(edge);
            }
        }
        Ok(())
    }

    async fn commit(self) -> Result<(), StoreError> {
        let staged = self
            .staged
            .into_inner()
            .map_err(|_| StoreError::Query("in-memory transaction poisoned".to_string()))?;
        let mut shared = lock(&self.shared)?;

        for id in &staged.written_users {
            let row = &staged.working.users[id];
            let clash = shared.users.iter().find(|(other, existing)| {
                *other != id
                    && (existing.national_id == row.national_id || existing.email == row.email)
            });
            if let Some((_, existing)) = clash {
                let column = if existing.national_id == row.national_id {
                    "users.dni"
                } else {
                    "users.correo"
                };
                return Err(StoreError::Constraint(format!("duplicate key for {column}")));
            }
        }
        for (owner, friend) in &staged.written_edges {
            let known = |id: &i64| shared.users.contains_key(id) || staged.written_users.contains(id);
            if !known(owner) || !known(friend) {
                return Err(StoreError::Constraint(
                    "friend edge references a missing user".to_string(),
                ));
            }
        }

        for id in &staged.written_users {
            shared.users.insert(*id, staged.working.users[id].clone());
        }
        shared.edges.extend(staged.written_edges.iter().copied());
        Ok(())
    }

    async fn rollback(self) -> Result<(), StoreError> {
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, StoreError> {
    mutex
        .lock()
        .map_err(|_| StoreError::Query("in-memory store lock poisoned".to_string()))
}
