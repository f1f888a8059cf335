use crate::entity::{ClientId, TickId};
use crate::protocol::{ClientMessage, ServerMessage};
use crate::server::{GameRules, JoinError, ServerHandle};
use tokio::sync::mpsc::{self, UnboundedReceiver};

/// In-process client connected over channels: the transport for offline
/// play and integration tests. No provider task is needed; the channel
/// pair is the connection.
pub struct LocalClient<R: GameRules> {
    name: ClientId,
    server: ServerHandle<R>,
    incoming: UnboundedReceiver<ServerMessage<R::Event>>,
}

impl<R: GameRules> LocalClient<R> {
    /// Join the server under `name`. Rejection reasons mirror what a
    /// remote client would receive as an error message.
    pub async fn connect(server: &ServerHandle<R>, name: &str) -> Result<Self, JoinError> {
        let (sender, incoming) = mpsc::unbounded_channel();
        server.client_connected(name, sender).await?;

        Ok(Self {
            name: name.to_string(),
            server: server.clone(),
            incoming,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn send_command(&self, command: R::Command) {
        self.server
            .receive(&self.name, ClientMessage::Command(command))
            .await;
    }

    /// Confirm receipt of state up to `tick`.
    pub async fn acknowledge(&self, tick: TickId) {
        self.server
            .receive(&self.name, ClientMessage::Acknowledge(tick))
            .await;
    }

    pub async fn quit(self) {
        self.server.receive(&self.name, ClientMessage::Quit).await;
    }

    /// Next message from the server; `None` once disconnected and
    /// drained.
    pub async fn recv(&mut self) -> Option<ServerMessage<R::Event>> {
        self.incoming.recv().await
    }

    pub fn try_recv(&mut self) -> Option<ServerMessage<R::Event>> {
        self.incoming.try_recv().ok()
    }
}
