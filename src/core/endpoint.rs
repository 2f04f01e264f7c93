use crate::core::error::EngineError;
use crate::core::topology::Topology;
use async_trait::async_trait;
use probelink_client::BrokerLink;
use probelink_protocol::Method;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Publisher,
    Subscriber,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Publisher => f.write_str("publisher"),
            Role::Subscriber => f.write_str("subscriber"),
        }
    }
}

/// The role-specific half of a link. The connection manager owns negotiation
/// and recovery; an endpoint decides how the channel is activated and what
/// flows over it once ready.
#[async_trait]
pub trait Endpoint: Send {
    fn role(&self) -> Role;

    fn topology(&self) -> &Topology;

    /// Last negotiation step, sent after all bindings are in place.
    fn activation(&self) -> Method;

    /// Whether `reply` completes the activation step.
    fn on_activated(&mut self, reply: &Method) -> bool;

    /// Sent before the channel is closed on a graceful stop.
    fn deactivation(&self) -> Option<Method> {
        None
    }

    /// A new connection generation began; previous per-connection state is void.
    fn begin_generation(&mut self, generation: u64);

    /// Whether the reactor should call `pump` on its interval while ready.
    fn pumps(&self) -> bool {
        false
    }

    /// Moves queued work onto the link. Returns how many items were sent.
    async fn pump(&mut self, _link: &mut BrokerLink) -> Result<usize, EngineError> {
        Ok(0)
    }

    /// Handles a method that arrived while the channel is ready.
    async fn on_method(&mut self, method: Method, link: &mut BrokerLink) -> Result<(), EngineError>;
}
