pub mod config;
pub mod core;
pub mod runtime;

pub use config::{ConnectionParams, LinkConfig};
pub use crate::core::connection::LinkStatus;
pub use crate::core::envelope::{Arrival, Envelope};
pub use crate::core::error::{ConfigError, EngineError, LedgerError};
pub use crate::core::ledger::{Confirmation, DeliveryLedger, LedgerSnapshot};
pub use crate::core::publisher::{Producer, Publisher};
pub use crate::core::state::{ChannelPhase, LinkState};
pub use crate::core::subscriber::Subscriber;
pub use crate::core::topology::Topology;
pub use runtime::{LinkHandle, Stopper};
