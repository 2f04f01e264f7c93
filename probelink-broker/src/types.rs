use crate::core::broker::Broker;
use std::sync::Arc;
use tokio::sync::Mutex;

pub type SharedBroker = Arc<Mutex<Broker>>;
