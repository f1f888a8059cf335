use crate::config::ServerConfig;
use crate::entity::{snapshot_entity, ClientId, EntityId, ServerEntity, TickId};
use crate::patch::{project_fields, ClientState, WorldPatch};
use crate::protocol::StateMessage;
use crate::state::EntityMap;
use std::collections::{BTreeMap, HashMap, HashSet};

/// Ticks a client may go unacknowledged before the next send falls back
/// to a full state.
pub const MAX_UNACKNOWLEDGED_TICKS: u64 = 8;

/// Per-client replication state: which entities and fields the client
/// currently knows, plus the unacknowledged delta history that decides
/// between full and incremental sends.
///
/// Everything here is derived state, rebuildable at any time from the
/// entity store and the entities' visibility/field rules.
pub struct ClientStateManager {
    client_id: ClientId,

    /// An entry exists iff the client currently believes the entity
    /// exists. `None` means every field is known.
    known_fields: HashMap<EntityId, Option<HashSet<String>>>,

    /// Patches sent but not yet confirmed, in tick order. Their in-order
    /// combination atop the last acknowledged baseline reconstructs the
    /// current filtered state.
    unacknowledged_deltas: BTreeMap<TickId, WorldPatch>,

    last_acknowledged: Option<TickId>,

    staleness_limit_ms: u64,

    force_full_state: bool,
}

impl ClientStateManager {
    pub fn new(client_id: impl Into<ClientId>, config: &ServerConfig) -> Self {
        Self {
            client_id: client_id.into(),
            known_fields: HashMap::new(),
            unacknowledged_deltas: BTreeMap::new(),
            last_acknowledged: None,
            staleness_limit_ms: config.tick_interval_ms * MAX_UNACKNOWLEDGED_TICKS,
            force_full_state: true,
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Discard everything the client is believed to know and send a full
    /// state on the next tick.
    pub fn force_full_update(&mut self) {
        self.force_full_state = true;
    }

    /// Forget a single entity; the next tick re-learns it from scratch
    /// (fresh visibility and field allowlist) if it is still visible.
    pub fn forget_entity(&mut self, id: EntityId) {
        self.known_fields.remove(&id);
    }

    pub fn forget_all(&mut self) {
        self.known_fields.clear();
    }

    pub fn knows_entity(&self, id: EntityId) -> bool {
        self.known_fields.contains_key(&id)
    }

    pub fn last_acknowledged(&self) -> Option<TickId> {
        self.last_acknowledged
    }

    pub fn pending_delta_count(&self) -> usize {
        self.unacknowledged_deltas.len()
    }

    /// Produce this tick's outgoing state message: a full snapshot if the
    /// client has no confirmed baseline (or one is forced, or acks have
    /// gone stale), otherwise the cumulative unacknowledged delta.
    pub fn update(
        &mut self,
        tick: TickId,
        world_patch: Option<&WorldPatch>,
        entities: &EntityMap,
    ) -> StateMessage {
        if self.should_send_full_state(tick) {
            self.force_full_state = false;

            // The full state is the new baseline; pending history is
            // superseded and will never be needed again.
            self.unacknowledged_deltas.clear();

            StateMessage::Full(self.filter_state(entities), tick)
        } else {
            let patch = self.filter_patch(world_patch, entities);

            // Empty patches are recorded too, keeping the timestamp
            // accounting aligned with what was sent; they are skipped
            // when the wire list is built.
            self.unacknowledged_deltas.insert(tick, patch);

            StateMessage::Delta(self.combine_unacknowledged(), tick)
        }
    }

    /// Advance the acknowledgement cursor and discard confirmed history.
    /// Stale or duplicate acknowledgements are ignored; the cursor never
    /// regresses.
    pub fn receive_acknowledge(&mut self, tick: TickId) {
        if self.last_acknowledged.is_some_and(|acked| tick <= acked) {
            return;
        }

        self.last_acknowledged = Some(tick);
        self.unacknowledged_deltas.retain(|&sent, _| sent > tick);
    }

    fn should_send_full_state(&self, tick: TickId) -> bool {
        if self.force_full_state {
            return true;
        }

        // Until the first acknowledgement arrives, keep sending full
        // states; afterwards, fall back to full once acks go stale.
        match self.last_acknowledged {
            None => true,
            Some(acked) => tick.saturating_sub(acked) >= self.staleness_limit_ms,
        }
    }

    /// Field allowlist for one entity, with the mandatory `type` tag
    /// folded in. `None` means no restriction.
    fn fields_to_send(&self, entity: &dyn ServerEntity) -> Option<HashSet<String>> {
        let fields = entity.determine_fields_to_send(&self.client_id)?;

        let mut set: HashSet<String> = fields.into_iter().collect();
        set.insert("type".to_string());
        Some(set)
    }

    /// Record the entity as known and return the allowlist computed for
    /// it. The allowlist stays fixed while the entity remains known.
    fn learn_entity(
        &mut self,
        id: EntityId,
        entity: &dyn ServerEntity,
    ) -> Option<HashSet<String>> {
        let fields = self.fields_to_send(entity);
        self.known_fields.insert(id, fields.clone());
        fields
    }

    /// Complete filtered snapshot of every visible entity. Resets the
    /// known set, so allowlists are recomputed from scratch.
    fn filter_state(&mut self, entities: &EntityMap) -> ClientState {
        self.known_fields.clear();

        let mut state = ClientState::new();

        for (&id, entity) in entities {
            if !entity.determine_visibility(&self.client_id) {
                continue;
            }

            let fields = self.learn_entity(id, entity.as_ref());
            state.insert(
                id,
                project_fields(&snapshot_entity(entity.as_ref()), fields.as_ref()),
            );
        }

        state
    }

    /// Filter the store's global change-set down to the entities this
    /// client may see and the fields it may see of them, maintaining the
    /// known set along the way.
    fn filter_patch(
        &mut self,
        world_patch: Option<&WorldPatch>,
        entities: &EntityMap,
    ) -> WorldPatch {
        let mut out = WorldPatch::default();
        let mut touched: HashSet<EntityId> = HashSet::new();

        if let Some(world_patch) = world_patch {
            for (&id, entity_patch) in &world_patch.changed {
                let Some(entity) = entities.get(&id) else {
                    continue;
                };

                if entity.determine_visibility(&self.client_id) {
                    touched.insert(id);

                    if let Some(fields) = self.known_fields.get(&id) {
                        let filtered = match fields {
                            None => entity_patch.clone(),
                            Some(allowed) => entity_patch.retain_fields(allowed),
                        };

                        if !filtered.is_empty() {
                            out.changed.insert(id, filtered);
                        }
                    } else {
                        // Newly visible: send the whole filtered body at
                        // current values rather than a partial diff.
                        let fields = self.learn_entity(id, entity.as_ref());
                        out.set.push((
                            id,
                            project_fields(&snapshot_entity(entity.as_ref()), fields.as_ref()),
                        ));
                    }
                } else if self.known_fields.remove(&id).is_some() {
                    // Formerly visible, now hidden.
                    out.removed.push(id);
                }
            }

            for (id, body) in &world_patch.set {
                let Some(entity) = entities.get(id) else {
                    continue;
                };

                if entity.determine_visibility(&self.client_id) {
                    touched.insert(*id);

                    let fields = self.learn_entity(*id, entity.as_ref());
                    out.set.push((*id, project_fields(body, fields.as_ref())));
                }
            }

            for &id in &world_patch.removed {
                if self.known_fields.remove(&id).is_some() {
                    out.removed.push(id);
                }
            }
        }

        // Visibility can change for reasons unrelated to the entity's own
        // data (e.g. the client's character moving), so every live entity
        // is checked once per tick regardless of the change-set.
        for (&id, entity) in entities {
            if self.known_fields.contains_key(&id) {
                if !touched.contains(&id) && !entity.determine_visibility(&self.client_id) {
                    self.known_fields.remove(&id);
                    out.removed.push(id);
                }
            } else if entity.determine_visibility(&self.client_id) {
                let fields = self.learn_entity(id, entity.as_ref());
                out.set.push((
                    id,
                    project_fields(&snapshot_entity(entity.as_ref()), fields.as_ref()),
                ));
            }
        }

        out
    }

    /// Every still-unacknowledged patch, oldest first. Empty entries are
    /// bookkeeping only and stay off the wire.
    fn combine_unacknowledged(&self) -> Vec<WorldPatch> {
        self.unacknowledged_deltas
            .values()
            .filter(|patch| !patch.is_empty())
            .cloned()
            .collect()
    }
}
