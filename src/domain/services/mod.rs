pub mod message_bus;
pub mod password_service;
