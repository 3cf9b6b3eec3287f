use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::domain::models::secret::HashedSecret;

/// Identity assigned by the store on first insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UserId(i64);
impl UserId {
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> i64 {
        self.0
    }
}

/// National identity number (DNI). Users are the same entity iff their DNI matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NationalId(i64);
impl NationalId {
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for NationalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A registered user together with both sides of its friend adjacency.
///
/// `friends` holds outgoing edges and `friend_of` the incoming ones, both
/// keyed by DNI. They are only mutated through [`User::add_friend`] and
/// [`User::remove_friend`], which always touch both endpoints.
#[derive(Debug, Clone)]
pub struct User {
    id: Option<UserId>,
    name: String,
    email: String,
    secret: HashedSecret,
    national_id: NationalId,
    phone: i64,
    friends: BTreeSet<NationalId>,
    friend_of: BTreeSet<NationalId>,
}

impl User {
    pub fn new(
        name: String,
        email: String,
        secret: HashedSecret,
        national_id: NationalId,
        phone: i64,
    ) -> Self {
        Self {
            id: None,
            name,
            email,
            secret,
            national_id,
            phone,
            friends: BTreeSet::new(),
            friend_of: BTreeSet::new(),
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn reconstruct(
        id: UserId,
        name: String,
        email: String,
        secret: HashedSecret,
        national_id: NationalId,
        phone: i64,
        friends: BTreeSet<NationalId>,
        friend_of: BTreeSet<NationalId>,
    ) -> Self {
        Self {
            id: Some(id),
            name,
            email,
            secret,
            national_id,
            phone,
            friends,
            friend_of,
        }
    }

    pub fn assign_id(&mut self, id: UserId) {
        self.id = Some(id);
    }

    /// Adds the directed edge `self -> friend`, recording the inverse on `friend`.
    ///
    /// Returns false for a self-loop or an edge that already exists.
    pub fn add_friend(&mut self, friend: &mut User) -> bool {
        if self.national_id == friend.national_id {
            return false;
        }
        let added = self.friends.insert(friend.national_id);
        friend.friend_of.insert(self.national_id);
        added
    }

    /// Removes the directed edge `self -> friend` from both endpoints.
    pub fn remove_friend(&mut self, friend: &mut User) -> bool {
        let removed = self.friends.remove(&friend.national_id);
        friend.friend_of.remove(&self.national_id);
        removed
    }

    // getters
    pub fn id(&self) -> Option<UserId> {
        self.id
    }
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn email(&self) -> &str {
        &self.email
    }
    pub fn secret(&self) -> &HashedSecret {
        &self.secret
    }
    pub fn national_id(&self) -> NationalId {
        self.national_id
    }
    pub fn phone(&self) -> i64 {
        self.phone
    }
    pub fn friends(&self) -> &BTreeSet<NationalId> {
        &self.friends
    }
    pub fn friend_of(&self) -> &BTreeSet<NationalId> {
        &self.friend_of
    }
}

impl PartialEq for User {
    fn eq(&self, other: &Self) -> bool {
        self.national_id == other.national_id
    }
}

impl Eq for User {}

impl Hash for User {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.national_id.hash(state);
    }
}
