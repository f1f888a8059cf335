use super::*;
use crate::client::ClientStateManager;
use crate::config::ServerConfig;
use crate::entity::ServerEntity;
use crate::protocol::StateMessage;
use serde_json::{json, Map, Value};

/// Configurable test entity: arbitrary fields, optional owner-only
/// visibility, optional field allowlist.
struct Probe {
    fields: Map<String, Value>,
    visible_to: Option<String>,
    allowlist: Option<Vec<String>>,
}

impl Probe {
    fn new(fields: Value) -> Self {
        let Value::Object(fields) = fields else {
            panic!("probe fields must be an object");
        };
        Self {
            fields,
            visible_to: None,
            allowlist: None,
        }
    }

    fn visible_to(mut self, client: &str) -> Self {
        self.visible_to = Some(client.to_string());
        self
    }

    fn set(&mut self, key: &str, value: Value) {
        self.fields.insert(key.to_string(), value);
    }
}

impl ServerEntity for Probe {
    fn type_name(&self) -> &str {
        "test"
    }

    fn replicated_state(&self) -> Map<String, Value> {
        self.fields.clone()
    }

    fn determine_visibility(&self, client: &str) -> bool {
        self.visible_to.as_deref().map_or(true, |owner| owner == client)
    }

    fn determine_fields_to_send(&self, _client: &str) -> Option<Vec<String>> {
        self.allowlist.clone()
    }
}

fn store_with_client(client: &str) -> EntityStore {
    let mut store = EntityStore::new();
    store.add_client(
        client,
        ClientStateManager::new(client, &ServerConfig::default()),
    );
    store
}

fn message_for<'a>(
    outbox: &'a [(String, StateMessage)],
    client: &str,
) -> &'a StateMessage {
    &outbox
        .iter()
        .find(|(id, _)| id == client)
        .expect("no message for client")
        .1
}

#[test]
fn ids_are_assigned_sequentially_from_one() {
    let mut store = EntityStore::new();
    assert_eq!(store.add_entity(Box::new(Probe::new(json!({})))), 1);
    assert_eq!(store.add_entity(Box::new(Probe::new(json!({})))), 2);
    assert_eq!(store.add_entity(Box::new(Probe::new(json!({})))), 3);
}

#[test]
fn deleted_ids_are_recycled_smallest_first_after_the_tick() {
    let mut store = EntityStore::new();
    let a = store.add_entity(Box::new(Probe::new(json!({}))));
    let b = store.add_entity(Box::new(Probe::new(json!({}))));
    store.add_entity(Box::new(Probe::new(json!({}))));

    store.delete_entity(b);
    store.delete_entity(a);

    // Not freed until the tick boundary: a fresh add takes a new ID.
    assert_eq!(store.add_entity(Box::new(Probe::new(json!({})))), 4);

    store.update(0.0, 1);

    assert_eq!(store.add_entity(Box::new(Probe::new(json!({})))), a);
    assert_eq!(store.add_entity(Box::new(Probe::new(json!({})))), b);
}

#[test]
fn operations_on_unknown_ids_are_no_ops() {
    let mut store = store_with_client("ada");

    assert!(store.get_entity(99).is_none());
    store.delete_entity(99);
    store.recalculate_entity(99);

    let outbox = store.update(0.0, 1);
    match message_for(&outbox, "ada") {
        StateMessage::Full(state, 1) => assert!(state.is_empty()),
        other => panic!("expected empty full state, got {other:?}"),
    }
}

#[test]
fn typed_lookup_downcasts_to_the_concrete_entity() {
    let mut store = EntityStore::new();
    let id = store.add_entity(Box::new(Probe::new(json!({"score": 1}))));

    store.entity_mut::<Probe>(id).unwrap().set("score", json!(2));

    assert_eq!(
        store.entity::<Probe>(id).unwrap().fields.get("score"),
        Some(&json!(2))
    );
}

#[test]
fn first_update_sends_full_state_with_type_tags() {
    let mut store = store_with_client("ada");
    let id = store.add_entity(Box::new(Probe::new(json!({"name": "a"}))));

    let outbox = store.update(0.0, 1);

    match message_for(&outbox, "ada") {
        StateMessage::Full(state, 1) => {
            assert_eq!(state.get(&id), Some(&json!({"type": "test", "name": "a"})));
        }
        other => panic!("expected full state, got {other:?}"),
    }
}

#[test]
fn mutations_between_ticks_become_field_deltas() {
    let mut store = store_with_client("ada");
    let id = store.add_entity(Box::new(Probe::new(json!({"score": 5}))));

    let outbox = store.update(0.0, 1);
    let first_tick = message_for(&outbox, "ada").tick();
    store.client_mut("ada").unwrap().receive_acknowledge(first_tick);

    store.entity_mut::<Probe>(id).unwrap().set("score", json!(6));

    let outbox = store.update(0.0, 2);
    match message_for(&outbox, "ada") {
        StateMessage::Delta(patches, 2) => {
            assert_eq!(patches.len(), 1);
            let fields = patches[0].changed.get(&id).unwrap();
            assert_eq!(fields.set.get("score"), Some(&json!(6)));
            assert_eq!(fields.set.len(), 1);
        }
        other => panic!("expected delta, got {other:?}"),
    }
}

#[test]
fn deletion_reaches_clients_exactly_once() {
    let mut store = store_with_client("ada");
    let id = store.add_entity(Box::new(Probe::new(json!({}))));

    let outbox = store.update(0.0, 1);
    store
        .client_mut("ada")
        .unwrap()
        .receive_acknowledge(message_for(&outbox, "ada").tick());

    store.delete_entity(id);

    let outbox = store.update(0.0, 2);
    match message_for(&outbox, "ada") {
        StateMessage::Delta(patches, 2) => {
            assert_eq!(patches.len(), 1);
            assert_eq!(patches[0].removed, vec![id]);
        }
        other => panic!("expected delta, got {other:?}"),
    }

    store.client_mut("ada").unwrap().receive_acknowledge(2);

    // Nothing further about the deleted entity.
    let outbox = store.update(0.0, 3);
    match message_for(&outbox, "ada") {
        StateMessage::Delta(patches, 3) => assert!(patches.is_empty()),
        other => panic!("expected empty delta, got {other:?}"),
    }
}

#[test]
fn entities_invisible_to_a_client_never_reach_it() {
    let mut store = store_with_client("ada");
    store.add_client(
        "eve",
        ClientStateManager::new("eve", &ServerConfig::default()),
    );

    let mine = store.add_entity(Box::new(Probe::new(json!({"x": 1})).visible_to("ada")));
    let shared = store.add_entity(Box::new(Probe::new(json!({"x": 2}))));

    let outbox = store.update(0.0, 1);

    match message_for(&outbox, "ada") {
        StateMessage::Full(state, _) => {
            assert!(state.contains_key(&mine));
            assert!(state.contains_key(&shared));
        }
        other => panic!("expected full state, got {other:?}"),
    }

    match message_for(&outbox, "eve") {
        StateMessage::Full(state, _) => {
            assert!(!state.contains_key(&mine));
            assert!(state.contains_key(&shared));
        }
        other => panic!("expected full state, got {other:?}"),
    }
}

#[test]
fn recalculate_client_forces_a_full_resend() {
    let mut store = store_with_client("ada");
    store.add_entity(Box::new(Probe::new(json!({"x": 1}))));

    let outbox = store.update(0.0, 1);
    store
        .client_mut("ada")
        .unwrap()
        .receive_acknowledge(message_for(&outbox, "ada").tick());

    store.recalculate_client("ada");

    let outbox = store.update(0.0, 2);
    assert!(matches!(
        message_for(&outbox, "ada"),
        StateMessage::Full(_, 2)
    ));
}

#[test]
fn recalculate_entity_resends_it_in_full() {
    let mut store = store_with_client("ada");
    let id = store.add_entity(Box::new(Probe::new(json!({"x": 1}))));

    let outbox = store.update(0.0, 1);
    store
        .client_mut("ada")
        .unwrap()
        .receive_acknowledge(message_for(&outbox, "ada").tick());

    store.recalculate_entity(id);

    let outbox = store.update(0.0, 2);
    match message_for(&outbox, "ada") {
        StateMessage::Delta(patches, 2) => {
            assert_eq!(patches.len(), 1);
            let (set_id, body) = &patches[0].set[0];
            assert_eq!(*set_id, id);
            assert_eq!(body, &json!({"type": "test", "x": 1}));
        }
        other => panic!("expected delta resend, got {other:?}"),
    }
}

#[test]
fn update_hooks_run_before_the_change_drain() {
    struct Ticker {
        count: u32,
    }

    impl ServerEntity for Ticker {
        fn type_name(&self) -> &str {
            "ticker"
        }

        fn replicated_state(&self) -> Map<String, Value> {
            let mut map = Map::new();
            map.insert("count".to_string(), json!(self.count));
            map
        }

        fn update(&mut self, _dt: f64) {
            self.count += 1;
        }
    }

    let mut store = store_with_client("ada");
    let id = store.add_entity(Box::new(Ticker { count: 0 }));

    let outbox = store.update(0.0, 1);
    match message_for(&outbox, "ada") {
        StateMessage::Full(state, _) => {
            // The hook ran before the snapshot was taken.
            assert_eq!(state.get(&id).unwrap()["count"], json!(1));
        }
        other => panic!("expected full state, got {other:?}"),
    }
}
