pub mod feeds;
pub mod health;
