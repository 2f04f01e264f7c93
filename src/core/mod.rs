pub mod connection;
pub mod constants;
pub mod endpoint;
pub mod envelope;
pub mod error;
pub mod ledger;
pub mod publisher;
pub mod state;
pub mod subscriber;
pub mod topology;
pub mod url;
