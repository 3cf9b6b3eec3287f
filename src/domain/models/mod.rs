pub mod outcome;
pub mod registration;
pub mod secret;
pub mod user;
