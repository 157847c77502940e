// HTTP route handlers
pub mod articles;
pub mod generate;
pub mod health;
pub mod progress;
pub mod trending;
