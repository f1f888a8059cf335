use serde::Serialize;
use serde_json::{Map, Value};
use std::any::Any;

/// Integer handle identifying a live entity. Unique among live entities;
/// recycled from a free pool after deletion.
pub type EntityId = u32;

/// Name identifying a connected client, unique among current connections.
pub type ClientId = String;

/// Tick timestamp in milliseconds, used to correlate sent state with
/// client acknowledgements.
pub type TickId = u64;

/// Downcast support so rule logic can recover concrete entity types from
/// the store's trait objects.
pub trait AsAny: Any {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// A server-owned entity replicated to clients.
///
/// Entities expose their replicated fields as a schema-free JSON object
/// and may restrict which clients see them (`determine_visibility`) and
/// which fields those clients see (`determine_fields_to_send`).
pub trait ServerEntity: AsAny + Send {
    /// Mandatory type discriminator, always sent to clients even when an
    /// explicit field allowlist omits it.
    fn type_name(&self) -> &str;

    /// Current replicated fields. Most implementations derive `Serialize`
    /// and delegate to [`replicated_fields`].
    fn replicated_state(&self) -> Map<String, Value>;

    /// Whether this entity should be known to `client` at all.
    fn determine_visibility(&self, _client: &str) -> bool {
        true
    }

    /// Field allowlist for `client`. `None` means no restriction.
    ///
    /// Queried once when the entity becomes known to a client, and again
    /// only after the entity leaves and re-enters that client's view (or a
    /// recalculation is requested).
    fn determine_fields_to_send(&self, _client: &str) -> Option<Vec<String>> {
        None
    }

    /// Per-tick simulation hook; `dt` is elapsed seconds.
    fn update(&mut self, _dt: f64) {}
}

/// Converts a `Serialize` entity into its replicated field map.
///
/// Non-object serializations yield an empty map; fields excluded with
/// serde attributes are never replicated.
pub fn replicated_fields<T: Serialize>(entity: &T) -> Map<String, Value> {
    match serde_json::to_value(entity) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    }
}

/// Full JSON snapshot of an entity: its replicated fields plus the
/// mandatory `type` tag.
pub fn snapshot_entity(entity: &dyn ServerEntity) -> Value {
    let mut map = entity.replicated_state();
    map.insert(
        "type".to_string(),
        Value::String(entity.type_name().to_string()),
    );
    Value::Object(map)
}
