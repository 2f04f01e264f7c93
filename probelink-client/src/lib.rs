pub mod client;
mod error;

pub use client::{BrokerLink, Incoming, LinkTarget};
pub use error::LinkError;
