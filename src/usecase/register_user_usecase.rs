use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::domain::{
    error::{RegistrationError, StoreError},
    models::{
        outcome::PersistenceOutcome,
        registration::{NewUser, RegistrationRequest},
        secret::HashedSecret,
        user::{NationalId, User},
    },
    repositories::user_repository::{UserStore, UserTransaction},
    services::password_service::SecretHasher,
};

/// What a successful registration wrote.
#[derive(Debug, Clone)]
pub struct RegisteredUser {
    pub user: User,
    pub linked_friends: Vec<NationalId>,
    pub missing_friends: Vec<NationalId>,
}

pub struct RegisterUserUsecase<S: UserStore, H: SecretHasher> {
    store: S,
    secret_hasher: Arc<H>,
}

impl<S: UserStore, H: SecretHasher + 'static> RegisterUserUsecase<S, H> {
    pub fn new(store: S, secret_hasher: H) -> Self {
        Self {
            store,
            secret_hasher: Arc::new(secret_hasher),
        }
    }

    /// Registers the request and reports the result as an outcome. Never fails.
    pub async fn persist(&self, request: &RegistrationRequest) -> PersistenceOutcome {
        match self.try_persist(request).await {
            Ok(outcome) => outcome,
            Err(err) => {
                PersistenceOutcome::failed(request.national_id, RegistrationError::from(err).to_string())
            }
        }
    }

    /// Like [`Self::persist`], but hands store failures back to the caller so it
    /// can decide whether to retry. Validation and conflict failures are
    /// reported as FAILED outcomes.
    pub async fn try_persist(
        &self,
        request: &RegistrationRequest,
    ) -> Result<PersistenceOutcome, StoreError> {
        match self.register(request).await {
            Ok(registered) => {
                let national_id = registered.user.national_id();
                Ok(PersistenceOutcome::success(
                    national_id,
                    format!("User registered successfully with DNI: {national_id}"),
                ))
            }
            Err(RegistrationError::Store(err)) => {
                warn!(dni = ?request.national_id.map(|d| d.value()), error = %err, "failed to persist user");
                Err(err)
            }
            Err(err) => {
                warn!(dni = ?request.national_id.map(|d| d.value()), reason = %err, "registration rejected");
                Ok(PersistenceOutcome::failed(request.national_id, err.to_string()))
            }
        }
    }

    /// Validates and writes the user and its friend edges in one transaction.
    ///
    /// The secret is hashed before the transaction is opened. Any error after
    /// that rolls every write back.
    pub async fn register(
        &self,
        request: &RegistrationRequest,
    ) -> Result<RegisteredUser, RegistrationError> {
        let new_user = request.validate()?;
        let secret = self.hash_secret(&new_user).await?;

        let txn = self.store.begin().await?;
        match self.register_in(&txn, new_user, secret).await {
            Ok(registered) => {
                txn.commit().await?;
                info!(
                    dni = registered.user.national_id().value(),
                    friends = registered.linked_friends.len(),
                    "user registered"
                );
                Ok(registered)
            }
            Err(err) => {
                if let Err(rollback_err) = txn.rollback().await {
                    warn!(error = %rollback_err, "rollback failed");
                }
                Err(err)
            }
        }
    }

    // Argon2 is CPU bound; keep it off the runtime workers.
    async fn hash_secret(&self, new_user: &NewUser) -> Result<HashedSecret, RegistrationError> {
        let hasher = Arc::clone(&self.secret_hasher);
        let plain_secret = new_user.secret.to_string();
        tokio::task::spawn_blocking(move || hasher.hash(&plain_secret))
            .await
            .map_err(|e| RegistrationError::Secret(e.to_string()))?
    }

    async fn register_in(
        &self,
        txn: &S::Transaction,
        new_user: NewUser,
        secret: HashedSecret,
    ) -> Result<RegisteredUser, RegistrationError> {
        // DNI takes priority over email when both collide
        if txn.exists_by_national_id(new_user.national_id).await? {
            return Err(RegistrationError::DuplicateNationalId(new_user.national_id));
        }
        if txn.exists_by_email(&new_user.email).await? {
            return Err(RegistrationError::DuplicateEmail(new_user.email));
        }

        let mut user = txn
            .save(User::new(
                new_user.name,
                new_user.email,
                secret,
                new_user.national_id,
                new_user.phone,
            ))
            .await?;
        debug!(dni = user.national_id().value(), id = ?user.id().map(|id| id.value()), "user row inserted");

        let mut linked_friends = Vec::new();
        let mut missing_friends = Vec::new();
        let mut friends = Vec::new();
        for friend_id in new_user.friend_ids {
            if friend_id == user.national_id() {
                warn!(dni = friend_id.value(), "skipping self reference in friend list");
                continue;
            }
            if linked_friends.contains(&friend_id) || missing_friends.contains(&friend_id) {
                continue;
            }
            match txn.find_by_national_id(friend_id).await? {
                Some(mut friend) => {
                    user.add_friend(&mut friend);
                    friend.add_friend(&mut user);
                    linked_friends.push(friend_id);
                    friends.push(friend);
                }
                None => {
                    warn!(dni = user.national_id().value(), friend = friend_id.value(), "friend not found");
                    missing_friends.push(friend_id);
                }
            }
        }

        if !friends.is_empty() {
            txn.save_friend_edges(&user).await?;
            for friend in &friends {
                txn.save_friend_edges(friend).await?;
            }
        }
        if !missing_friends.is_empty() {
            let missing: Vec<i64> = missing_friends.iter().map(NationalId::value).collect();
            warn!(dni = user.national_id().value(), ?missing, "could not link friends, users not found");
        }

        Ok(RegisteredUser {
            user,
            linked_friends,
            missing_friends,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use async_trait::async_trait;
    use rstest::*;

    use super::*;
    use crate::{
        domain::{
            error::StoreError,
            models::outcome::OutcomeStatus,
        },
        infrastructure::in_memory_user_store::{InMemoryTransaction, InMemoryUserStore},
    };

    // mock secret hasher
    #[derive(Clone)]
    struct MockSecretHasher;

    impl SecretHasher for MockSecretHasher {
        fn hash(&self, plain_secret: &str) -> Result<HashedSecret, RegistrationError> {
            Ok(HashedSecret::new(format!("hashed:{plain_secret}")))
        }

        fn verify(
            &self,
            plain_secret: &str,
            hashed_secret: &HashedSecret,
        ) -> Result<bool, RegistrationError> {
            Ok(hashed_secret.as_str() == format!("hashed:{plain_secret}"))
        }
    }

    struct BrokenHasher;

    impl SecretHasher for BrokenHasher {
        fn hash(&self, _plain_secret: &str) -> Result<HashedSecret, RegistrationError> {
            Err(RegistrationError::Secret("out of memory".to_string()))
        }

        fn verify(&self, _plain_secret: &str, _hashed_secret: &HashedSecret) -> Result<bool, RegistrationError> {
            Ok(false)
        }
    }

    /// Wraps the in-memory store to count transactions and inject failures.
    #[derive(Clone, Default)]
    struct FaultyStore {
        inner: InMemoryUserStore,
        begun: Arc<AtomicUsize>,
        fail_edges: Arc<AtomicBool>,
        unavailable: Arc<AtomicBool>,
    }

    struct FaultyTransaction {
        inner: InMemoryTransaction,
        fail_edges: bool,
    }

    #[async_trait]
    impl UserStore for FaultyStore {
        type Transaction = FaultyTransaction;

        async fn begin(&self) -> Result<FaultyTransaction, StoreError> {
            self.begun.fetch_add(1, Ordering::SeqCst);
            if self.unavailable.load(Ordering::SeqCst) {
                return Err(StoreError::Connection("Connection refused".to_string()));
            }
            Ok(FaultyTransaction {
                inner: self.inner.begin().await?,
                fail_edges: self.fail_edges.load(Ordering::SeqCst),
            })
        }
    }

    #[async_trait]
    impl UserTransaction for FaultyTransaction {
        async fn exists_by_national_id(&self, national_id: NationalId) -> Result<bool, StoreError> {
            self.inner.exists_by_national_id(national_id).await
        }

        async fn exists_by_email(&self, email: &str) -> Result<bool, StoreError> {
            self.inner.exists_by_email(email).await
        }

        async fn find_by_national_id(
            &self,
            national_id: NationalId,
        ) -> Result<Option<User>, StoreError> {
            self.inner.find_by_national_id(national_id).await
        }

        async fn save(&self, user: User) -> Result<User, StoreError> {
            self.inner.save(user).await
        }

        async fn save_friend_edges(&self, user: &User) -> Result<(), StoreError> {
            if self.fail_edges {
                return Err(StoreError::Query("friend insert failed".to_string()));
            }
            self.inner.save_friend_edges(user).await
        }

        async fn commit(self) -> Result<(), StoreError> {
            self.inner.commit().await
        }

        async fn rollback(self) -> Result<(), StoreError> {
            self.inner.rollback().await
        }
    }

    fn request(dni: i64, email: &str, friends: &[i64]) -> RegistrationRequest {
        RegistrationRequest {
            request_id: None,
            name: Some(format!("user {dni}")),
            email: Some(email.to_string()),
            secret: Some(1234),
            national_id: Some(NationalId::new(dni)),
            phone: Some(987654321),
            friend_ids: friends.iter().copied().map(NationalId::new).collect(),
        }
    }

    #[fixture]
    fn store() -> FaultyStore {
        FaultyStore::default()
    }

    fn usecase(store: &FaultyStore) -> RegisterUserUsecase<FaultyStore, MockSecretHasher> {
        RegisterUserUsecase::new(store.clone(), MockSecretHasher)
    }

    #[rstest]
    #[tokio::test]
    async fn test_persist_positive(store: FaultyStore) {
        let juan = RegistrationRequest {
            request_id: None,
            name: Some("Juan Perez".to_string()),
            email: Some("juan@example.com".to_string()),
            secret: Some(1234),
            national_id: Some(NationalId::new(12345678)),
            phone: Some(987654321),
            friend_ids: vec![],
        };

        let outcome = usecase(&store).persist(&juan).await;

        assert_eq!(OutcomeStatus::Success, outcome.status);
        assert_eq!(Some(NationalId::new(12345678)), outcome.national_id);
        assert!(outcome.message.contains("12345678"));
        assert_eq!(1, store.inner.user_count());
        let saved = store.inner.find(NationalId::new(12345678)).unwrap();
        assert!(saved.friends().is_empty());
        assert_eq!("Juan Perez", saved.name());
    }

    #[rstest]
    #[tokio::test]
    async fn test_secret_is_stored_hashed(store: FaultyStore) {
        usecase(&store).persist(&request(1, "a@example.com", &[])).await;

        let saved = store.inner.find(NationalId::new(1)).unwrap();
        assert_eq!("hashed:1234", saved.secret().as_str());
        assert!(MockSecretHasher.verify("1234", saved.secret()).unwrap());
    }

    #[rstest]
    #[case::national_id(|r: &mut RegistrationRequest| r.national_id = None, "DNI")]
    #[case::name(|r: &mut RegistrationRequest| r.name = Some(" ".to_string()), "Name")]
    #[case::email(|r: &mut RegistrationRequest| r.email = None, "Email")]
    #[case::secret(|r: &mut RegistrationRequest| r.secret = None, "Password")]
    #[case::phone(|r: &mut RegistrationRequest| r.phone = None, "Phone")]
    #[tokio::test]
    async fn test_missing_field_touches_no_store(
        store: FaultyStore,
        #[case] strip: fn(&mut RegistrationRequest),
        #[case] field: &str,
    ) {
        let mut incomplete = request(1, "a@example.com", &[]);
        strip(&mut incomplete);

        let outcome = usecase(&store).persist(&incomplete).await;

        assert_eq!(OutcomeStatus::Failed, outcome.status);
        assert!(outcome.message.contains(field), "{}", outcome.message);
        assert_eq!(0, store.begun.load(Ordering::SeqCst));
        assert_eq!(0, store.inner.user_count());
    }

    #[rstest]
    #[tokio::test]
    async fn test_hash_failure_opens_no_transaction(store: FaultyStore) {
        let usecase = RegisterUserUsecase::new(store.clone(), BrokenHasher);

        let outcome = usecase.persist(&request(1, "a@example.com", &[])).await;

        assert_eq!(OutcomeStatus::Failed, outcome.status);
        assert!(outcome.message.contains("out of memory"), "{}", outcome.message);
        assert_eq!(0, store.begun.load(Ordering::SeqCst));
        assert_eq!(0, store.inner.user_count());
    }

    #[rstest]
    #[tokio::test]
    async fn test_duplicate_national_id_negative(store: FaultyStore) {
        let usecase = usecase(&store);
        let first = usecase.persist(&request(12345678, "juan@example.com", &[])).await;
        assert!(first.is_success());

        let second = usecase.persist(&request(12345678, "other@example.com", &[])).await;

        assert_eq!(OutcomeStatus::Failed, second.status);
        assert_eq!(Some(NationalId::new(12345678)), second.national_id);
        assert!(second.message.contains("already exists"));
        assert!(second.message.contains("12345678"));
        assert_eq!(1, store.inner.user_count());
    }

    #[rstest]
    #[tokio::test]
    async fn test_duplicate_email_negative(store: FaultyStore) {
        let usecase = usecase(&store);
        usecase.persist(&request(1, "taken@example.com", &[])).await;

        let outcome = usecase.persist(&request(2, "taken@example.com", &[])).await;

        assert_eq!(OutcomeStatus::Failed, outcome.status);
        assert!(outcome.message.contains("email"));
        assert!(outcome.message.contains("already exists"));
        assert_eq!(1, store.inner.user_count());
    }

    #[rstest]
    #[tokio::test]
    async fn test_duplicate_national_id_wins_over_email(store: FaultyStore) {
        let usecase = usecase(&store);
        usecase.persist(&request(1, "taken@example.com", &[])).await;

        let outcome = usecase.persist(&request(1, "taken@example.com", &[])).await;

        assert!(outcome.message.contains("DNI 1 already exists"), "{}", outcome.message);
    }

    #[rstest]
    #[tokio::test]
    async fn test_missing_friend_is_skipped(store: FaultyStore) {
        let usecase = usecase(&store);
        usecase.persist(&request(100, "a@example.com", &[])).await;

        let registered = usecase
            .register(&request(200, "b@example.com", &[100, 300]))
            .await
            .unwrap();

        assert_eq!(vec![NationalId::new(100)], registered.linked_friends);
        assert_eq!(vec![NationalId::new(300)], registered.missing_friends);

        let outcome = usecase.persist(&request(201, "c@example.com", &[100, 300])).await;
        assert!(outcome.is_success());

        let new_user = store.inner.find(NationalId::new(200)).unwrap();
        assert_eq!(1, new_user.friends().len());
        assert!(new_user.friends().contains(&NationalId::new(100)));
    }

    #[rstest]
    #[tokio::test]
    async fn test_friendship_is_symmetric(store: FaultyStore) {
        let usecase = usecase(&store);
        usecase.persist(&request(100, "a@example.com", &[])).await;

        usecase.persist(&request(200, "b@example.com", &[100])).await;

        let a = store.inner.find(NationalId::new(100)).unwrap();
        let b = store.inner.find(NationalId::new(200)).unwrap();
        assert!(b.friends().contains(&a.national_id()));
        assert!(a.friend_of().contains(&b.national_id()));
        assert!(a.friends().contains(&b.national_id()));
        assert!(b.friend_of().contains(&a.national_id()));
        assert_eq!(2, store.inner.edges().len());
    }

    #[rstest]
    #[tokio::test]
    async fn test_self_reference_is_not_linked(store: FaultyStore) {
        let registered = usecase(&store)
            .register(&request(5, "self@example.com", &[5, 5]))
            .await
            .unwrap();

        assert!(registered.linked_friends.is_empty());
        assert!(registered.missing_friends.is_empty());
        assert!(store.inner.edges().is_empty());
    }

    #[rstest]
    #[tokio::test]
    async fn test_edge_failure_rolls_back_user(store: FaultyStore) {
        let usecase = usecase(&store);
        usecase.persist(&request(100, "a@example.com", &[])).await;
        store.fail_edges.store(true, Ordering::SeqCst);

        let outcome = usecase.persist(&request(200, "b@example.com", &[100])).await;

        assert_eq!(OutcomeStatus::Failed, outcome.status);
        assert!(outcome.message.contains("friend insert failed"));
        assert!(store.inner.find(NationalId::new(200)).is_none());
        assert_eq!(1, store.inner.user_count());
        assert!(store.inner.edges().is_empty());
    }

    #[rstest]
    #[tokio::test]
    async fn test_store_unavailable(store: FaultyStore) {
        store.unavailable.store(true, Ordering::SeqCst);
        let usecase = usecase(&store);
        let juan = request(12345678, "juan@example.com", &[]);

        let outcome = usecase.persist(&juan).await;
        assert_eq!(OutcomeStatus::Failed, outcome.status);
        assert!(outcome.message.contains("Connection refused"));

        let result = usecase.try_persist(&juan).await;
        assert!(matches!(result, Err(StoreError::Connection(_))));
    }

    #[rstest]
    #[tokio::test]
    async fn test_redelivery_is_harmless(store: FaultyStore) {
        let usecase = usecase(&store);
        let juan = request(12345678, "juan@example.com", &[]);

        let first = usecase.try_persist(&juan).await.unwrap();
        let replay = usecase.try_persist(&juan).await.unwrap();

        assert!(first.is_success());
        assert!(!replay.is_success());
        assert_eq!(1, store.inner.user_count());
    }
}
