pub mod amqp_broker;
pub mod argon2_secret_hasher;
pub mod entity;
pub mod in_memory_user_store;
pub mod retry_policy;
pub mod sea_orm_user_store;
