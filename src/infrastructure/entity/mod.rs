pub mod friend;
pub mod users;
