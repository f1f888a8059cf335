use crate::entity::EntityId;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};


/// Complete filtered snapshot of the entities a client can see, keyed by
/// entity ID. Used as the resynchronization baseline.
pub type ClientState = BTreeMap<EntityId, Value>;

/// Field-level changes within a single entity.
///
/// `set` holds replaced leaf values (or whole subtrees when a value
/// changed type), `nested` recurses into changed child objects so only
/// changed leaves travel, and `removed` lists deleted field names.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldPatch {
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub set: Map<String, Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub nested: BTreeMap<String, FieldPatch>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub removed: Vec<String>,
}

impl FieldPatch {
    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.nested.is_empty() && self.removed.is_empty()
    }

    /// Restricts the patch to the allowed top-level field names.
    pub fn retain_fields(&self, allowed: &HashSet<String>) -> FieldPatch {
        FieldPatch {
            set: self
                .set
                .iter()
                .filter(|(key, _)| allowed.contains(key.as_str()))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
            nested: self
                .nested
                .iter()
                .filter(|(key, _)| allowed.contains(key.as_str()))
                .map(|(key, child)| (key.clone(), child.clone()))
                .collect(),
            removed: self
                .removed
                .iter()
                .filter(|key| allowed.contains(key.as_str()))
                .cloned()
                .collect(),
        }
    }
}

/// Structural changes to the entity collection over one tick.
///
/// `set` carries full entity bodies (insertions or resends), `changed`
/// carries field-level patches for entities the recipient already knows,
/// and `removed` lists deleted entity IDs.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct WorldPatch {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub set: Vec<(EntityId, Value)>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub changed: BTreeMap<EntityId, FieldPatch>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub removed: Vec<EntityId>,
}

impl WorldPatch {
    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.changed.is_empty() && self.removed.is_empty()
    }
}

/// Minimal structural diff between two JSON objects.
///
/// Object-valued fields are recursed into so only changed leaves appear;
/// every other change replaces the value wholesale. Returns `None` when
/// the objects are equal.
pub fn diff_object(old: &Map<String, Value>, new: &Map<String, Value>) -> Option<FieldPatch> {
    let mut patch = FieldPatch::default();

    for (key, new_value) in new {
        match old.get(key) {
            Some(old_value) if old_value == new_value => {}
            Some(Value::Object(old_child)) => {
                if let Value::Object(new_child) = new_value {
                    if let Some(child) = diff_object(old_child, new_child) {
                        patch.nested.insert(key.clone(), child);
                    }
                } else {
                    patch.set.insert(key.clone(), new_value.clone());
                }
            }
            _ => {
                patch.set.insert(key.clone(), new_value.clone());
            }
        }
    }

    for key in old.keys() {
        if !new.contains_key(key) {
            patch.removed.push(key.clone());
        }
    }

    if patch.is_empty() {
        None
    } else {
        Some(patch)
    }
}

/// Copies an entity body down to the allowed top-level fields.
/// `None` means no restriction.
pub fn project_fields(body: &Value, fields: Option<&HashSet<String>>) -> Value {
    match (body, fields) {
        (Value::Object(map), Some(allowed)) => Value::Object(
            map.iter()
                .filter(|(key, _)| allowed.contains(key.as_str()))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
        ),
        _ => body.clone(),
    }
}

/// Applies a field patch to an entity body in place.
pub fn apply_entity_patch(target: &mut Value, patch: &FieldPatch) {
    let Value::Object(map) = target else {
        return;
    };

    for (key, value) in &patch.set {
        map.insert(key.clone(), value.clone());
    }

    for (key, child) in &patch.nested {
        match map.get_mut(key) {
            Some(value) => apply_entity_patch(value, child),
            None => {
                let mut value = Value::Object(Map::new());
                apply_entity_patch(&mut value, child);
                map.insert(key.clone(), value);
            }
        }
    }

    for key in &patch.removed {
        map.remove(key);
    }
}

/// Applies a world patch to a client-side entity map in place.
pub fn apply_world_patch(state: &mut ClientState, patch: &WorldPatch) {
    for (id, body) in &patch.set {
        state.insert(*id, body.clone());
    }

    for (id, fields) in &patch.changed {
        if let Some(body) = state.get_mut(id) {
            apply_entity_patch(body, fields);
        }
    }

    for id in &patch.removed {
        state.remove(id);
    }
}
