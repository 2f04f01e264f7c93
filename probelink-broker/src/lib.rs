pub mod config;
pub mod core;
pub mod server;
pub mod types;

pub use config::BrokerConfig;
pub use server::listener::{serve, spawn_local};
