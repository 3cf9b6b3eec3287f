use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use sea_orm::{
    ActiveValue::{NotSet, Set},
    ColumnTrait, ConnAcquireErr, ConnectOptions, ConnectionTrait, Database, DatabaseConnection,
    DatabaseTransaction, DbErr, EntityTrait, Insert, PaginatorTrait, QueryFilter, RuntimeErr,
    Schema, SqlErr, TransactionTrait, TryInsert, sea_query::OnConflict, sqlx,
};
use tracing::info;

use crate::{
    config::DatabaseConfig,
    domain::{
        error::StoreError,
        models::{
            secret::HashedSecret,
            user::{NationalId, User, UserId},
        },
        repositories::user_repository::{UserStore, UserTransaction},
    },
    infrastructure::entity::{friend, users},
};

#[cfg_attr(not(test), derive(Clone))]
pub struct SeaOrmUserStore {
    db: DatabaseConnection,
}

impl SeaOrmUserStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn connect(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let mut opt = ConnectOptions::new(config.url.clone());
        opt.max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .connect_timeout(config.connect_timeout)
            .sqlx_logging(config.sqlx_logging);

        let db = Database::connect(opt).await.map_err(store_error)?;
        Ok(Self::new(db))
    }

    /// Creates `users` and `friend` when they do not exist yet.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        let backend = self.db.get_database_backend();
        let schema = Schema::new(backend);

        let mut users_table = schema.create_table_from_entity(users::Entity);
        users_table.if_not_exists();
        let mut friend_table = schema.create_table_from_entity(friend::Entity);
        friend_table.if_not_exists();

        for table in [users_table, friend_table] {
            self.db
                .execute(backend.build(&table))
                .await
                .map_err(store_error)?;
        }

        let registered = users::Entity::find()
            .count(&self.db)
            .await
            .map_err(store_error)?;
        info!(registered, "user tables verified");
        Ok(())
    }

    pub async fn close(self) -> Result<(), StoreError> {
        self.db.close().await.map_err(store_error)
    }
}

#[async_trait]
impl UserStore for SeaOrmUserStore {
    type Transaction = SeaOrmUserTransaction;

    async fn begin(&self) -> Result<SeaOrmUserTransaction, StoreError> {
        let txn = self.db.begin().await.map_err(store_error)?;
        Ok(SeaOrmUserTransaction { txn })
    }
}

pub struct SeaOrmUserTransaction {
    txn: DatabaseTransaction,
}

impl SeaOrmUserTransaction {
    async fn national_ids_by_id(
        &self,
        ids: Vec<i64>,
    ) -> Result<HashMap<i64, NationalId>, StoreError> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let rows = users::Entity::find()
            .filter(users::Column::Id.is_in(ids))
            .all(&self.txn)
            .await
            .map_err(store_error)?;

        Ok(rows
            .into_iter()
            .map(|row| (row.id, NationalId::new(row.national_id)))
            .collect())
    }
}

#[async_trait]
impl UserTransaction for SeaOrmUserTransaction {
    async fn exists_by_national_id(&self, national_id: NationalId) -> Result<bool, StoreError> {
        let count = users::Entity::find()
            .filter(users::Column::NationalId.eq(national_id.value()))
            .count(&self.txn)
            .await
            .map_err(store_error)?;
        Ok(count > 0)
    }

    async fn exists_by_email(&self, email: &str) -> Result<bool, StoreError> {
        let count = users::Entity::find()
            .filter(users::Column::Email.eq(email))
            .count(&self.txn)
            .await
            .map_err(store_error)?;
        Ok(count > 0)
    }

    async fn find_by_national_id(
        &self,
        national_id: NationalId,
    ) -> Result<Option<User>, StoreError> {
        let Some(model) = users::Entity::find()
            .filter(users::Column::NationalId.eq(national_id.value()))
            .one(&self.txn)
            .await
            .map_err(store_error)?
        else {
            return Ok(None);
        };

        let outgoing = friend::Entity::find()
            .filter(friend::Column::UserId.eq(model.id))
            .all(&self.txn)
            .await
            .map_err(store_error)?;
        let incoming = friend::Entity::find()
            .filter(friend::Column::FriendId.eq(model.id))
            .all(&self.txn)
            .await
            .map_err(store_error)?;

        let neighbour_ids = outgoing
            .iter()
            .map(|edge| edge.friend_id)
            .chain(incoming.iter().map(|edge| edge.user_id))
            .collect();
        let national_ids = self.national_ids_by_id(neighbour_ids).await?;

        let friends: BTreeSet<NationalId> = outgoing
            .iter()
            .filter_map(|edge| national_ids.get(&edge.friend_id).copied())
            .collect();
        let friend_of: BTreeSet<NationalId> = incoming
            .iter()
            .filter_map(|edge| national_ids.get(&edge.user_id).copied())
            .collect();

        Ok(Some(User::reconstruct(
            UserId::new(model.id),
            model.name,
            model.email,
            HashedSecret::new(model.secret),
            NationalId::new(model.national_id),
            model.phone,
            friends,
            friend_of,
        )))
    }

    async fn save(&self, mut user: User) -> Result<User, StoreError> {
        let mut row = users::ActiveModel {
            id: NotSet,
            name: Set(user.name().to_string()),
            email: Set(user.email().to_string()),
            secret: Set(user.secret().as_str().to_string()),
            national_id: Set(user.national_id().value()),
            phone: Set(user.phone()),
        };

        match user.id() {
            Some(id) => {
                row.id = Set(id.value());
                users::Entity::update(row)
                    .exec(&self.txn)
                    .await
                    .map_err(store_error)?;
            }
            None => {
                let inserted = users::Entity::insert(row)
                    .exec(&self.txn)
                    .await
                    .map_err(store_error)?;
                user.assign_id(UserId::new(inserted.last_insert_id));
            }
        }

        Ok(user)
    }

    async fn save_friend_edges(&self, user: &User) -> Result<(), StoreError> {
        let owner = user.id().ok_or_else(|| {
            StoreError::Query(format!("user {} has not been saved", user.national_id()))
        })?;
        if user.friends().is_empty() {
            return Ok(());
        }

        let national_ids: Vec<i64> = user.friends().iter().map(NationalId::value).collect();
        let friends = users::Entity::find()
            .filter(users::Column::NationalId.is_in(national_ids))
            .all(&self.txn)
            .await
            .map_err(store_error)?;
        if friends.len() != user.friends().len() {
            return Err(StoreError::Constraint(format!(
                "friend edges of {} reference unknown users",
                user.national_id()
            )));
        }

        friend_edges_insert(owner, friends.iter().map(|friend_row| friend_row.id))
            .exec_without_returning(&self.txn)
            .await
            .map_err(store_error)?;

        Ok(())
    }

    async fn commit(self) -> Result<(), StoreError> {
        self.txn.commit().await.map_err(store_error)
    }

    async fn rollback(self) -> Result<(), StoreError> {
        self.txn.rollback().await.map_err(store_error)
    }
}

/// Insert of `owner -> friend` edges that leaves existing edges untouched.
///
/// MySQL has no `DO NOTHING`; there the conflict becomes a self-assignment of `user_id`.
fn friend_edges_insert(
    owner: UserId,
    friend_ids: impl IntoIterator<Item = i64>,
) -> TryInsert<friend::ActiveModel> {
    let edges = friend_ids.into_iter().map(|friend_id| friend::ActiveModel {
        user_id: Set(owner.value()),
        friend_id: Set(friend_id),
    });

    Insert::many(edges)
        .on_conflict(
            OnConflict::columns([friend::Column::UserId, friend::Column::FriendId])
                .do_nothing_on([friend::Column::UserId])
                .to_owned(),
        )
        .do_nothing()
}

fn store_error(err: DbErr) -> StoreError {
    if let Some(SqlErr::UniqueConstraintViolation(detail)) = err.sql_err() {
        return StoreError::Constraint(detail);
    }
    match err {
        DbErr::Exec(RuntimeErr::SqlxError(e)) | DbErr::Query(RuntimeErr::SqlxError(e)) => {
            driver_error(e)
        }
        DbErr::Conn(e) => StoreError::Connection(e.to_string()),
        DbErr::ConnectionAcquire(ConnAcquireErr::Timeout) => {
            StoreError::Timeout(ConnAcquireErr::Timeout.to_string())
        }
        DbErr::ConnectionAcquire(e) => StoreError::Connection(e.to_string()),
        other => StoreError::Query(other.to_string()),
    }
}

// A statement can also fail because the connection under it went away.
fn driver_error(err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::Io(_) | sqlx::Error::PoolClosed | sqlx::Error::WorkerCrashed => {
            StoreError::Connection(err.to_string())
        }
        sqlx::Error::PoolTimedOut => StoreError::Timeout(err.to_string()),
        _ => StoreError::Query(err.to_string()),
    }
}
