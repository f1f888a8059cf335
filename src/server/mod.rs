// Replication coordinator: join/leave handling, message routing, tick
// dispatch, and the tokio runtime loop around them.

mod coordinator;
mod host;
mod rules;

pub use coordinator::{JoinError, Server};
pub use host::{ServerHandle, ServerHost};
pub use rules::{GameRules, RulesContext};
