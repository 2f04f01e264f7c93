/*
Connection lifecycle as a pure transition function.

  Disconnected --Start/BackoffElapsed--> Connecting --TransportOpened--> Connected(Opening)
  Connected: Opening -> DeclaringExchange -> DeclaringQueue -> Binding(i).. -> Activating -> Ready
  any live state --TransportLost--> Disconnected (+ backoff)
  Connected --ChannelClosed / out-of-order reply--> Connected(Abandoned) (+ close connection)
  any live state --StopRequested--> Closing --CloseCompleted/TransportLost--> Closed

The reactor feeds events in and executes the returned action. Nothing here does I/O.
*/

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelPhase {
    Opening,
    DeclaringExchange,
    DeclaringQueue,
    Binding(usize),
    Activating,
    Ready,
    /// Channel is unusable; waiting for the connection to go away.
    Abandoned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected(ChannelPhase),
    Closing,
    Closed,
}

impl LinkState {
    pub fn is_ready(&self) -> bool {
        matches!(self, LinkState::Connected(ChannelPhase::Ready))
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, LinkState::Closed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Start,
    TransportOpened,
    TransportLost,
    BackoffElapsed,
    ChannelOpened,
    ExchangeDeclared,
    QueueDeclared,
    QueueBound,
    Activated,
    ChannelClosed,
    StopRequested,
    CloseCompleted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Connect,
    OpenChannel { generation: u64 },
    DeclareExchange,
    DeclareQueue,
    Bind(usize),
    Activate,
    BeginFlow { generation: u64 },
    Backoff(Duration),
    AbandonConnection,
    CloseGracefully { channel_open: bool, consuming: bool },
    Finish,
    None,
}

#[derive(Debug, Clone)]
pub struct Lifecycle {
    state: LinkState,
    generation: u64,
    bindings: usize,
    reconnect_delay: Duration,
}

impl Lifecycle {
    pub fn new(bindings: usize, reconnect_delay: Duration) -> Self {
        Lifecycle {
            state: LinkState::Disconnected,
            generation: 0,
            bindings,
            reconnect_delay,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_ready(&self) -> bool {
        self.state.is_ready()
    }

    pub fn apply(&mut self, event: Event) -> Action {
        use ChannelPhase::*;
        use LinkState::*;

        let (next, action) = match (self.state, event) {
            (Closed, _) => (Closed, Action::None),

            (Closing, Event::CloseCompleted | Event::TransportLost) => (Closed, Action::Finish),
            (Closing, _) => (Closing, Action::None),

            (state, Event::StopRequested) => {
                let (channel_open, consuming) = match state {
                    Connected(Opening | Abandoned) => (false, false),
                    Connected(Ready) => (true, true),
                    Connected(_) => (true, false),
                    _ => (false, false),
                };
                (
                    Closing,
                    Action::CloseGracefully {
                        channel_open,
                        consuming,
                    },
                )
            }

            (Disconnected, Event::Start | Event::BackoffElapsed) => (Connecting, Action::Connect),

            (Connecting, Event::TransportOpened) => {
                self.generation += 1;
                (
                    Connected(Opening),
                    Action::OpenChannel {
                        generation: self.generation,
                    },
                )
            }

            (Connecting | Connected(_), Event::TransportLost) => {
                (Disconnected, Action::Backoff(self.reconnect_delay))
            }

            (Connected(Abandoned), _) => (Connected(Abandoned), Action::None),

            (Connected(Opening), Event::ChannelOpened) => {
                (Connected(DeclaringExchange), Action::DeclareExchange)
            }
            (Connected(DeclaringExchange), Event::ExchangeDeclared) => {
                (Connected(DeclaringQueue), Action::DeclareQueue)
            }
            (Connected(DeclaringQueue), Event::QueueDeclared) if self.bindings > 0 => {
                (Connected(Binding(0)), Action::Bind(0))
            }
            (Connected(DeclaringQueue), Event::QueueDeclared) => {
                (Connected(Activating), Action::Activate)
            }
            (Connected(Binding(i)), Event::QueueBound) if i + 1 < self.bindings => {
                (Connected(Binding(i + 1)), Action::Bind(i + 1))
            }
            (Connected(Binding(_)), Event::QueueBound) => (Connected(Activating), Action::Activate),
            (Connected(Activating), Event::Activated) => (
                Connected(Ready),
                Action::BeginFlow {
                    generation: self.generation,
                },
            ),

            // A broker channel close, or a negotiation reply that does not
            // match the step in progress.
            (
                Connected(_),
                Event::ChannelClosed
                | Event::ChannelOpened
                | Event::ExchangeDeclared
                | Event::QueueDeclared
                | Event::QueueBound
                | Event::Activated,
            ) => (Connected(Abandoned), Action::AbandonConnection),

            (state, _) => (state, Action::None),
        };

        if next != self.state {
            tracing::debug!(from = ?self.state, to = ?next, ?event, "link state change");
        }
        self.state = next;
        action
    }
}
