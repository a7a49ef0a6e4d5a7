//! Streaming connection to the remote conversational-audio collaborator.

mod directive;
mod protocol;
mod session;
#[cfg(test)]
mod tests;

pub use directive::{build_directive, AgentMode, ALERT_PHRASE};
pub use session::{
    LiveConnection, LiveConnector, OutboundLink, SessionHandlers, SessionManager,
    TungsteniteConnector,
};
