use crate::client::ClientStateManager;
use crate::entity::{snapshot_entity, ClientId, EntityId, ServerEntity, TickId};
use crate::patch::{diff_object, WorldPatch};
use crate::protocol::StateMessage;
use serde_json::Value;
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap, HashMap};
use tracing::debug;

/// Live entities keyed by ID. BTreeMap so iteration (and therefore patch
/// construction) is deterministic.
pub type EntityMap = BTreeMap<EntityId, Box<dyn ServerEntity>>;

/// Authoritative, mutable collection of entities plus the per-client
/// state managers it drives each tick.
///
/// Change tracking is structural: the store keeps the previous tick's
/// JSON snapshot of every entity and diffs it against the current one
/// when `update` drains the change-set. Rule logic mutates entities
/// freely in between; nothing needs to be declared.
pub struct EntityStore {
    entities: EntityMap,

    /// Snapshot of each live entity as of the last drain.
    snapshots: BTreeMap<EntityId, Value>,

    next_id: EntityId,

    /// Recycled IDs, smallest first.
    freed_ids: BinaryHeap<Reverse<EntityId>>,

    /// Deleted this tick; IDs return to the free pool only after every
    /// client has processed the deletion.
    pending_deleted: BTreeSet<EntityId>,

    /// Entities whose visibility/field policy may have changed; clients
    /// forget them next tick and re-learn them if still visible.
    pending_recalculate_entities: BTreeSet<EntityId>,

    /// Clients whose entire known state should be rebuilt next tick.
    pending_recalculate_clients: BTreeSet<ClientId>,

    clients: HashMap<ClientId, ClientStateManager>,
}

impl EntityStore {
    pub fn new() -> Self {
        Self {
            entities: EntityMap::new(),
            snapshots: BTreeMap::new(),
            next_id: 1,
            freed_ids: BinaryHeap::new(),
            pending_deleted: BTreeSet::new(),
            pending_recalculate_entities: BTreeSet::new(),
            pending_recalculate_clients: BTreeSet::new(),
            clients: HashMap::new(),
        }
    }

    /// Add an entity, assigning the smallest freed ID or the next unused
    /// one.
    pub fn add_entity(&mut self, entity: Box<dyn ServerEntity>) -> EntityId {
        let id = match self.freed_ids.pop() {
            Some(Reverse(id)) => id,
            None => {
                let id = self.next_id;
                self.next_id += 1;
                id
            }
        };

        self.entities.insert(id, entity);
        id
    }

    pub fn get_entity(&self, id: EntityId) -> Option<&dyn ServerEntity> {
        self.entities.get(&id).map(|entity| entity.as_ref())
    }

    /// Typed lookup for rule logic.
    pub fn entity<T: ServerEntity>(&self, id: EntityId) -> Option<&T> {
        self.entities
            .get(&id)
            .and_then(|entity| entity.as_any().downcast_ref::<T>())
    }

    /// Typed mutable lookup for rule logic. Mutations made through this
    /// are picked up by the next tick's change drain.
    pub fn entity_mut<T: ServerEntity>(&mut self, id: EntityId) -> Option<&mut T> {
        self.entities
            .get_mut(&id)
            .and_then(|entity| entity.as_any_mut().downcast_mut::<T>())
    }

    pub fn entities(&self) -> &EntityMap {
        &self.entities
    }

    /// Remove an entity immediately; no-op for unknown IDs. Clients are
    /// told on the next tick, and the ID is recycled after that.
    pub fn delete_entity(&mut self, id: EntityId) {
        if self.entities.remove(&id).is_none() {
            return;
        }

        self.pending_deleted.insert(id);
        debug!(entity = id, "entity deleted");
    }

    /// Flag that this entity's visibility/field policy may have changed
    /// independent of its data. No-op for unknown IDs.
    pub fn recalculate_entity(&mut self, id: EntityId) {
        if !self.entities.contains_key(&id) {
            return;
        }

        self.pending_recalculate_entities.insert(id);
    }

    /// Flag that this client's entire view should be discarded and
    /// rebuilt fresh next tick.
    pub fn recalculate_client(&mut self, client_id: impl Into<ClientId>) {
        self.pending_recalculate_clients.insert(client_id.into());
    }

    pub fn add_client(&mut self, client_id: impl Into<ClientId>, manager: ClientStateManager) {
        let client_id = client_id.into();
        if self.clients.contains_key(&client_id) {
            return;
        }

        self.clients.insert(client_id, manager);
    }

    pub fn client(&self, client_id: &str) -> Option<&ClientStateManager> {
        self.clients.get(client_id)
    }

    pub fn client_mut(&mut self, client_id: &str) -> Option<&mut ClientStateManager> {
        self.clients.get_mut(client_id)
    }

    pub fn delete_client(&mut self, client_id: &str) -> bool {
        self.clients.remove(client_id).is_some()
    }

    pub fn clients(&self) -> impl Iterator<Item = (&ClientId, &ClientStateManager)> {
        self.clients.iter()
    }

    /// Single per-tick entry point: run entity update hooks, drain the
    /// net change-set since the previous call, and drive every client's
    /// projector and accumulator with it.
    ///
    /// Returns the message to transmit to each client. The store does no
    /// I/O itself.
    pub fn update(&mut self, dt: f64, tick: TickId) -> Vec<(ClientId, StateMessage)> {
        for entity in self.entities.values_mut() {
            entity.update(dt);
        }

        let world_patch = self.drain_changes();
        let world_patch = if world_patch.is_empty() {
            None
        } else {
            Some(world_patch)
        };

        for client_id in std::mem::take(&mut self.pending_recalculate_clients) {
            if let Some(manager) = self.clients.get_mut(&client_id) {
                manager.forget_all();
                manager.force_full_update();
            }
        }

        let recalculate = std::mem::take(&mut self.pending_recalculate_entities);

        let mut outbox = Vec::with_capacity(self.clients.len());
        for (client_id, manager) in &mut self.clients {
            for &id in &recalculate {
                manager.forget_entity(id);
            }

            let message = manager.update(tick, world_patch.as_ref(), &self.entities);
            outbox.push((client_id.clone(), message));
        }

        // Deleted IDs become reusable only now that every client has
        // seen the deletion.
        for id in std::mem::take(&mut self.pending_deleted) {
            self.freed_ids.push(Reverse(id));
        }

        outbox
    }

    /// Net structural change since the previous drain: additions with
    /// full bodies, minimal field diffs for mutated entities, and
    /// deletions. Refreshes the snapshot map.
    fn drain_changes(&mut self) -> WorldPatch {
        let mut patch = WorldPatch::default();

        for (&id, entity) in &self.entities {
            let snapshot = snapshot_entity(entity.as_ref());

            match self.snapshots.get(&id) {
                None => patch.set.push((id, snapshot.clone())),
                Some(Value::Object(previous)) => {
                    if let Value::Object(current) = &snapshot {
                        if let Some(fields) = diff_object(previous, current) {
                            patch.changed.insert(id, fields);
                        }
                    }
                }
                Some(_) => patch.set.push((id, snapshot.clone())),
            }

            self.snapshots.insert(id, snapshot);
        }

        for &id in &self.pending_deleted {
            self.snapshots.remove(&id);
            patch.removed.push(id);
        }

        patch
    }
}

impl Default for EntityStore {
    fn default() -> Self {
        Self::new()
    }
}
