pub mod config;
pub mod database;
pub mod error;
pub mod stats;
pub mod transaction;
pub mod types;
