pub mod messages;
pub mod registration_consumer;
pub mod response_publisher;
