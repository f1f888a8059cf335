use crate::client::ClientStateManager;
use crate::config::ServerConfig;
use crate::entity::{ClientId, TickId};
use crate::protocol::{ClientMessage, CommonEvent, ServerMessage};
use crate::server::rules::{GameRules, RulesContext};
use crate::state::EntityStore;
use std::collections::HashMap;
use std::fmt;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

/// Reasons a connection is refused at join time. The error is delivered
/// to the rejecting connection only; it is never registered.
#[derive(Debug, Clone, PartialEq)]
pub enum JoinError {
    NameTooLong,
    NameInUse,
}

impl fmt::Display for JoinError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JoinError::NameTooLong => write!(f, "Your name is too long"),
            JoinError::NameInUse => write!(f, "Your name is already in use"),
        }
    }
}

impl std::error::Error for JoinError {}

/// Replication coordinator: owns the entity store and the outgoing
/// connection for every client, routes inbound messages, and transmits
/// each tick's per-client state messages.
///
/// All entity and client collections are owned exclusively here; rule
/// logic and transports reach them only through these methods.
pub struct Server<R: GameRules> {
    rules: R,
    config: ServerConfig,
    state: EntityStore,
    connections: HashMap<ClientId, UnboundedSender<ServerMessage<R::Event>>>,
}

impl<R: GameRules> Server<R> {
    pub fn new(rules: R, config: ServerConfig) -> Self {
        Self {
            rules,
            config,
            state: EntityStore::new(),
            connections: HashMap::new(),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn state(&self) -> &EntityStore {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut EntityStore {
        &mut self.state
    }

    pub fn rules(&self) -> &R {
        &self.rules
    }

    pub fn client_names(&self) -> impl Iterator<Item = &ClientId> {
        self.connections.keys()
    }

    pub fn has_client(&self, name: &str) -> bool {
        self.connections.contains_key(name)
    }

    /// Fire the startup hook. Called once by the host before the first
    /// tick.
    pub fn start(&mut self) {
        self.with_rules(|rules, ctx| rules.server_started(ctx));
    }

    /// Register a joining client. On rejection the error message is sent
    /// through `sender` and nothing is registered.
    pub fn add_client(
        &mut self,
        name: &str,
        sender: UnboundedSender<ServerMessage<R::Event>>,
    ) -> Result<(), JoinError> {
        if let Err(error) = self.validate_join(name) {
            warn!(client = %name, error = %error, "join rejected");
            let _ = sender.send(ServerMessage::Error(error.to_string()));
            return Err(error);
        }

        info!(client = %name, "client joined");

        self.connections.insert(name.to_string(), sender);
        self.state
            .add_client(name, ClientStateManager::new(name, &self.config));

        self.with_rules(|rules, ctx| rules.client_joined(ctx, name));

        self.send_message(
            None,
            ServerMessage::CommonEvent(CommonEvent::Join {
                client: name.to_string(),
            }),
        );

        Ok(())
    }

    /// Remove a client and notify everyone else. No-op for unknown names.
    pub fn remove_client(&mut self, name: &str) {
        self.state.delete_client(name);

        if self.connections.remove(name).is_none() {
            return;
        }

        info!(client = %name, "client disconnected");

        self.with_rules(|rules, ctx| rules.client_disconnected(ctx, name));

        self.send_message(
            None,
            ServerMessage::CommonEvent(CommonEvent::Quit {
                client: name.to_string(),
            }),
        );
    }

    /// Route one inbound client message. Unknown clients are no-ops.
    pub fn receive_message(&mut self, client: &str, message: ClientMessage<R::Command>) {
        match message {
            ClientMessage::Acknowledge(tick) => {
                if let Some(manager) = self.state.client_mut(client) {
                    manager.receive_acknowledge(tick);
                }
            }
            ClientMessage::Command(command) => {
                debug!(client = %client, "command received");
                self.with_rules(|rules, ctx| rules.command_received(ctx, client, command));
            }
            ClientMessage::Quit => {
                debug!(client = %client, "client quit");
                self.remove_client(client);
            }
        }
    }

    /// Acknowledge receipt of state up to `tick` for one client.
    pub fn receive_acknowledge(&mut self, client: &str, tick: TickId) {
        if let Some(manager) = self.state.client_mut(client) {
            manager.receive_acknowledge(tick);
        }
    }

    /// Run one server tick: advance entities, drain the change-set, and
    /// transmit every client's state message.
    pub fn tick(&mut self, dt: f64, tick: TickId) {
        for (client, message) in self.state.update(dt, tick) {
            if let Some(sender) = self.connections.get(&client) {
                let _ = sender.send(message.into());
            }
        }
    }

    /// Send an application event to one client, or broadcast with `None`.
    pub fn send_event(&self, client: Option<&str>, event: R::Event) {
        self.send_message(client, ServerMessage::Event(event));
    }

    /// Deliberate shutdown: broadcast the error to every client and fire
    /// the stop hook. The host tears the transports down around this.
    pub fn stop(&mut self, message: &str) {
        self.send_message(None, ServerMessage::Error(message.to_string()));
        self.with_rules(|rules, ctx| rules.server_stopped(ctx));
    }

    fn validate_join(&self, name: &str) -> Result<(), JoinError> {
        if name.chars().count() > self.config.max_client_name_len {
            return Err(JoinError::NameTooLong);
        }

        if self.connections.contains_key(name) {
            return Err(JoinError::NameInUse);
        }

        Ok(())
    }

    fn send_message(&self, client: Option<&str>, message: ServerMessage<R::Event>) {
        match client {
            None => {
                for sender in self.connections.values() {
                    let _ = sender.send(message.clone());
                }
            }
            Some(client) => {
                if let Some(sender) = self.connections.get(client) {
                    let _ = sender.send(message);
                }
            }
        }
    }

    /// Run a rules hook with a borrowed context, then flush any events
    /// it queued.
    fn with_rules(&mut self, hook: impl FnOnce(&mut R, &mut RulesContext<'_, R::Event>)) {
        let mut events = Vec::new();
        let mut ctx = RulesContext::new(&mut self.state, &mut events);
        hook(&mut self.rules, &mut ctx);

        for (client, event) in events {
            self.send_message(client.as_deref(), ServerMessage::Event(event));
        }
    }
}
