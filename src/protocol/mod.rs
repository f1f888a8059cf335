use crate::entity::{ClientId, TickId};
use crate::patch::{ClientState, WorldPatch};
use serde::{Deserialize, Serialize};

/// Lifecycle event broadcast to every client when the connection roster
/// changes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum CommonEvent {
    Join { client: ClientId },
    Quit { client: ClientId },
}

/// Server → client messages. Tags match the compact single-character
/// encoding used on the wire.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ServerMessage<E> {
    /// Complete filtered snapshot, the client's new baseline.
    #[serde(rename = "s")]
    FullState(ClientState, TickId),
    /// Every still-unacknowledged patch, oldest first.
    #[serde(rename = "d")]
    DeltaState(Vec<WorldPatch>, TickId),
    /// Application-defined event.
    #[serde(rename = "c")]
    Event(E),
    #[serde(rename = "o")]
    CommonEvent(CommonEvent),
    /// Terminates the connection after delivery.
    #[serde(rename = "e")]
    Error(String),
}

/// Client → server messages.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ClientMessage<C> {
    #[serde(rename = "c")]
    Command(C),
    /// Confirms receipt of state up to the given tick.
    #[serde(rename = "a")]
    Acknowledge(TickId),
    #[serde(rename = "q")]
    Quit,
}

/// The state subset of [`ServerMessage`], produced by each client's
/// state manager once per tick.
#[derive(Clone, Debug, PartialEq)]
pub enum StateMessage {
    Full(ClientState, TickId),
    Delta(Vec<WorldPatch>, TickId),
}

impl StateMessage {
    /// Tick timestamp this message was produced at.
    pub fn tick(&self) -> TickId {
        match self {
            StateMessage::Full(_, tick) | StateMessage::Delta(_, tick) => *tick,
        }
    }
}

impl<E> From<StateMessage> for ServerMessage<E> {
    fn from(message: StateMessage) -> Self {
        match message {
            StateMessage::Full(state, tick) => ServerMessage::FullState(state, tick),
            StateMessage::Delta(patches, tick) => ServerMessage::DeltaState(patches, tick),
        }
    }
}
