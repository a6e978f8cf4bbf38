//! Session engine: the [`LiveAgent`] facade over a per-connection
//! [`Session`] actor.
//!
//! Wire types stay reachable through `crate::protocol` when you need full
//! control.

mod agent;
mod builder;
pub mod events;
mod handlers;
mod modes;
mod session;
mod state;
pub mod tools;
pub mod transcript;
pub mod transmit;
pub mod transport;

pub use agent::LiveAgent;
pub use builder::{API_KEY_ENV, CaptureFactory, LiveBuilder, LiveConfig, SinkFactory};
pub use events::{EventStream, SessionEvent};
pub use handlers::{EventHandlers, MessageHandler, SpeakingHandler, StateHandler, SuggestionHandler};
pub use modes::AgentMode;
pub use session::Session;
pub use state::{SessionState, SessionView};
pub use tools::{
    RollCheckArgs, RollOutcome, SuggestEditArgs, Suggestion, ToolDispatcher, ToolEffect,
    ToolInvocation, ToolOutcome,
};
pub use transcript::{Channel, Message, Speaker, TranscriptAssembler};
pub use transmit::{TransmitReceiver, TransmitSender, TransmitStats, transmit_channel};
pub use transport::{BoxFuture, Connector, Transport, WsConnector};
