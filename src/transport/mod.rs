// Connection providers bridge transports to the replication engine:
// they register joining clients with an outgoing message channel and
// route inbound messages through a ServerHandle.

mod local;
mod ws;

pub use local::LocalClient;
pub use ws::WebSocketProvider;

use crate::server::{GameRules, ServerHandle};

/// Identifier returned by a provider for its transport session.
pub type SessionId = String;

/// A source of client connections (in-process channel pair, WebSocket
/// listener, ...). `connect` spawns whatever tasks the transport needs
/// and returns immediately; `disconnect` tears them down.
pub trait ConnectionProvider<R: GameRules>: Send {
    fn connect(&mut self, server: ServerHandle<R>) -> anyhow::Result<SessionId>;

    fn disconnect(&mut self);
}
