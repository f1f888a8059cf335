use crate::entity::ClientId;
use crate::state::EntityStore;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Application rule logic driven by the coordinator.
///
/// All hooks are optional. They receive a [`RulesContext`] giving access
/// to the entity store and outgoing application events; rule logic never
/// holds the server directly.
pub trait GameRules: Send + 'static {
    /// Client → server command payload.
    type Command: DeserializeOwned + Send + 'static;

    /// Server → client application event payload.
    type Event: Serialize + Clone + Send + 'static;

    fn server_started(&mut self, _ctx: &mut RulesContext<'_, Self::Event>) {}

    fn server_stopped(&mut self, _ctx: &mut RulesContext<'_, Self::Event>) {}

    fn client_joined(&mut self, _ctx: &mut RulesContext<'_, Self::Event>, _client: &str) {}

    fn client_disconnected(&mut self, _ctx: &mut RulesContext<'_, Self::Event>, _client: &str) {}

    fn command_received(
        &mut self,
        _ctx: &mut RulesContext<'_, Self::Event>,
        _client: &str,
        _command: Self::Command,
    ) {
    }
}

/// What rule logic may touch while a hook runs: the authoritative entity
/// store, plus an outbox for application events (delivered after the
/// hook returns).
pub struct RulesContext<'a, E> {
    pub state: &'a mut EntityStore,
    events: &'a mut Vec<(Option<ClientId>, E)>,
}

impl<'a, E> RulesContext<'a, E> {
    pub(crate) fn new(
        state: &'a mut EntityStore,
        events: &'a mut Vec<(Option<ClientId>, E)>,
    ) -> Self {
        Self { state, events }
    }

    /// Queue an application event for one client, or for everyone when
    /// `client` is `None`.
    pub fn send_event(&mut self, client: Option<&str>, event: E) {
        self.events.push((client.map(str::to_string), event));
    }
}
