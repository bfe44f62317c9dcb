//! Viewer and world lifecycle transitions.
//!
//! Each (object, viewer) pair moves `Untracked -> Pending -> Tracked ->
//! Untracked`. The pending state is a scheduled settle-delay task; stopping
//! before it fires cancels it. The tracking table is the only writer of
//! per-viewer tracking state.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use decor_proto::types::ChunkPos;
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::dispatcher::{Audience, Family};
use crate::engine::{Engine, Teardown};
use crate::error::PlacementError;
use crate::geometry::Transform;
use crate::object::{ObjectId, PersistedObject, PlacedObject, ViewerId, WorldId};
use crate::scheduler::{Scheduler, TaskHandle};

/// Tracking state of one (object, viewer) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewState {
    Pending,
    Tracked,
}

#[derive(Debug, Clone, Copy)]
enum Slot {
    Pending {
        generation: u64,
        handle: Option<TaskHandle>,
    },
    Tracked,
}

impl Slot {
    fn state(&self) -> ViewState {
        match self {
            Slot::Pending { .. } => ViewState::Pending,
            Slot::Tracked => ViewState::Tracked,
        }
    }
}

#[derive(Default)]
pub struct TrackingTable {
    pairs: Mutex<HashMap<(Uuid, ViewerId), Slot>>,
    generation: AtomicU64,
}

impl TrackingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self, uuid: &Uuid, viewer: ViewerId) -> Option<ViewState> {
        self.pairs.lock().get(&(*uuid, viewer)).map(Slot::state)
    }

    /// Viewers that completed the settle delay for an object.
    pub fn tracked_viewers(&self, uuid: &Uuid) -> Vec<ViewerId> {
        let mut out: Vec<ViewerId> = self
            .pairs
            .lock()
            .iter()
            .filter(|((u, _), slot)| u == uuid && matches!(slot, Slot::Tracked))
            .map(|((_, v), _)| *v)
            .collect();
        out.sort();
        out
    }

    pub fn len(&self) -> usize {
        self.pairs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Enter `Pending` unless the pair is already pending or tracked.
    fn begin(&self, uuid: Uuid, viewer: ViewerId) -> Option<u64> {
        let mut pairs = self.pairs.lock();
        if pairs.contains_key(&(uuid, viewer)) {
            return None;
        }
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        pairs.insert(
            (uuid, viewer),
            Slot::Pending {
                generation,
                handle: None,
            },
        );
        Some(generation)
    }

    fn attach(&self, uuid: Uuid, viewer: ViewerId, generation: u64, handle: TaskHandle) {
        if let Some(Slot::Pending {
            generation: g,
            handle: h,
        }) = self.pairs.lock().get_mut(&(uuid, viewer))
        {
            if *g == generation {
                *h = Some(handle);
            }
        }
    }

    /// Move `Pending -> Tracked` if the pending generation still matches.
    fn promote(&self, uuid: Uuid, viewer: ViewerId, generation: u64) -> bool {
        let mut pairs = self.pairs.lock();
        let due = matches!(
            pairs.get(&(uuid, viewer)),
            Some(Slot::Pending { generation: g, .. }) if *g == generation
        );
        if due {
            pairs.insert((uuid, viewer), Slot::Tracked);
        }
        due
    }

    fn end(&self, uuid: &Uuid, viewer: ViewerId, scheduler: &dyn Scheduler) -> Option<ViewState> {
        let slot = self.pairs.lock().remove(&(*uuid, viewer))?;
        cancel_slot(&slot, scheduler);
        Some(slot.state())
    }

    pub(crate) fn forget_object(&self, uuid: &Uuid, scheduler: &dyn Scheduler) {
        let removed: Vec<Slot> = {
            let mut pairs = self.pairs.lock();
            let keys: Vec<(Uuid, ViewerId)> =
                pairs.keys().filter(|(u, _)| u == uuid).copied().collect();
            keys.iter().filter_map(|k| pairs.remove(k)).collect()
        };
        for slot in &removed {
            cancel_slot(slot, scheduler);
        }
    }

    fn forget_viewer(&self, viewer: ViewerId, scheduler: &dyn Scheduler) {
        let removed: Vec<Slot> = {
            let mut pairs = self.pairs.lock();
            let keys: Vec<(Uuid, ViewerId)> =
                pairs.keys().filter(|(_, v)| *v == viewer).copied().collect();
            keys.iter().filter_map(|k| pairs.remove(k)).collect()
        };
        for slot in &removed {
            cancel_slot(slot, scheduler);
        }
    }
}

fn cancel_slot(slot: &Slot, scheduler: &dyn Scheduler) {
    if let Slot::Pending {
        handle: Some(handle),
        ..
    } = slot
    {
        scheduler.cancel(*handle);
    }
}

impl Engine {
    /// A viewer started tracking the proxy with runtime id `numeric`.
    ///
    /// The illusion is sent after the settle delay so the proxy's own spawn
    /// reaches the viewer first.
    pub fn viewer_started_tracking(&self, numeric: i64, viewer: ViewerId) {
        let Some(object) = self.registry.get_by_numeric(numeric) else {
            return;
        };
        let uuid = object.id.uuid;
        let Some(generation) = self.tracking.begin(uuid, viewer) else {
            return;
        };
        let handle = self.scheduler.schedule(
            self.settings.settle_delay_ticks,
            Box::new(move |engine: &Engine| engine.settle_elapsed(uuid, viewer, generation)),
        );
        self.tracking.attach(uuid, viewer, generation, handle);
        debug!("{} began tracking {}", viewer, object.id);
    }

    /// A viewer stopped tracking the proxy. Retraction is immediate.
    ///
    /// The viewer may hold the illusion from a broadcast even while its own
    /// sync is still pending, so the ledger decides what is retracted.
    pub fn viewer_stopped_tracking(&self, numeric: i64, viewer: ViewerId) {
        let Some(object) = self.registry.get_by_numeric(numeric) else {
            return;
        };
        self.tracking.end(&object.id.uuid, viewer, self.scheduler.as_ref());
        self.dispatcher
            .retract(&object, &Family::ALL, Audience::Viewer(viewer));
    }

    /// A viewer disconnected: forget its state without sending anything.
    pub fn viewer_disconnected(&self, viewer: ViewerId) {
        self.tracking.forget_viewer(viewer, self.scheduler.as_ref());
        self.dispatcher.forget_viewer(viewer);
    }

    pub fn view_state(&self, uuid: &Uuid, viewer: ViewerId) -> Option<ViewState> {
        self.tracking.state(uuid, viewer)
    }

    fn settle_elapsed(&self, uuid: Uuid, viewer: ViewerId, generation: u64) {
        if !self.tracking.promote(uuid, viewer, generation) {
            return;
        }
        let Some(object) = self.registry.get(&uuid) else {
            self.tracking.end(&uuid, viewer, self.scheduler.as_ref());
            return;
        };
        if !self.world.proxy_alive(&object.id) {
            self.implicit_removal(&object, "proxy dead at settle");
            return;
        }
        self.emit(&object, &Family::ALL, Audience::Viewer(viewer));
    }

    /// Run the removal path for an object whose proxy disappeared.
    pub(crate) fn implicit_removal(&self, object: &PlacedObject, why: &str) {
        warn!("Stale proxy {} ({}); removing implicitly", object.id, why);
        self.teardown(object, Teardown::Stale);
    }

    // -----------------------------------------------------------------------
    // World and proxy lifecycle
    // -----------------------------------------------------------------------

    /// A world region unloaded. Viewers lost the objects with it, so the
    /// objects are only dropped from memory.
    pub fn region_unloaded(&self, world: WorldId, chunk: ChunkPos) -> usize {
        let objects = self.objects_in_chunk(world, chunk);
        for object in &objects {
            self.evict(object);
        }
        if !objects.is_empty() {
            debug!("Evicted {} object(s) from {} chunk {}", objects.len(), world, chunk);
        }
        objects.len()
    }

    pub fn world_unloaded(&self, world: WorldId) -> usize {
        let objects = self.registry.in_world(world);
        for object in &objects {
            self.evict(object);
        }
        let stragglers = self.index.clear_world(world);
        if !stragglers.is_empty() {
            warn!("Cleared {} index owner(s) with no registry record in {}", stragglers.len(), world);
        }
        info!("{} unloaded; dropped {} object(s)", world, objects.len());
        objects.len()
    }

    /// The host loaded a proxy carrying persisted placed-object attributes.
    ///
    /// A record with the same uuid but another numeric id is stale and is
    /// purged first.
    pub fn restore(
        &self,
        world: WorldId,
        numeric: i64,
        persisted: PersistedObject,
    ) -> Result<Arc<PlacedObject>, PlacementError> {
        let id = ObjectId::new(persisted.uuid, numeric);
        if let Some(existing) = self.registry.get(&id.uuid) {
            if existing.id.numeric == numeric {
                return Ok(existing);
            }
            debug!("Purging stale record {} before restoring {}", existing.id, id);
            self.dispatcher
                .retract(&existing, &Family::ALL, Audience::Broadcast);
            self.evict(&existing);
        }

        let Some(mechanic) = self.catalog.get(&persisted.type_id) else {
            warn!("Cannot restore {}: unknown mechanic '{}'", id, persisted.type_id);
            return Err(PlacementError::InvalidMechanic(persisted.type_id));
        };

        let object = PlacedObject {
            id,
            type_id: persisted.type_id,
            world,
            transform: persisted.transform,
            facing: persisted.facing,
            dye: persisted.dye,
            light_on: persisted.light_on,
            dependents: Default::default(),
        };

        let records = self.build_records(id.uuid, &mechanic, &object.transform);
        self.registry.register(object.clone())?;
        if let Err(conflict) = self.index.insert(id.uuid, world, records) {
            error!("Restoring {} hit an index conflict: {}", id, conflict);
            self.registry.unregister(&id);
            return Err(conflict.into());
        }

        let dependents = self.spawn_dependents(&object, &mechanic);
        let Some(record) = self
            .registry
            .update(&id.uuid, |o| o.dependents = dependents.clone())
        else {
            self.abandon(&object, dependents);
            return Err(PlacementError::NotFound(id.uuid));
        };

        let uuid = id.uuid;
        self.scheduler.schedule(
            self.settings.load_settle_delay_ticks,
            Box::new(move |engine: &Engine| {
                if let Some(object) = engine.registry.get(&uuid) {
                    if object.id.numeric == numeric {
                        engine.emit(&object, &Family::ALL, Audience::Broadcast);
                    }
                }
            }),
        );
        Ok(record)
    }

    /// The proxy was unloaded with its persisted state intact.
    pub fn proxy_unloaded(&self, numeric: i64) -> bool {
        let Some(object) = self.registry.get_by_numeric(numeric) else {
            return false;
        };
        self.dispatcher
            .retract(&object, &Family::ALL, Audience::Broadcast);
        self.evict(&object);
        true
    }

    /// The proxy was destroyed by something other than this engine.
    pub fn proxy_removed(&self, numeric: i64) -> bool {
        let Some(object) = self.registry.get_by_numeric(numeric) else {
            return false;
        };
        self.implicit_removal(&object, "proxy destroyed externally");
        true
    }

    /// The proxy teleported. Hitboxes follow; conflicting cells are skipped.
    pub fn object_moved(&self, numeric: i64, transform: Transform) -> bool {
        let Some(object) = self.registry.get_by_numeric(numeric) else {
            return false;
        };
        if !self.world.proxy_alive(&object.id) {
            self.implicit_removal(&object, "proxy dead on move");
            return false;
        }
        let Some(mechanic) = self.catalog.get(&object.type_id) else {
            warn!("Moved {} has unknown mechanic '{}'", object.id, object.type_id);
            return false;
        };

        let mut viewers = self.dispatcher.viewers_of(&object.id.uuid);
        for v in self.tracking.tracked_viewers(&object.id.uuid) {
            if !viewers.contains(&v) {
                viewers.push(v);
            }
        }

        for viewer in &viewers {
            self.dispatcher
                .retract(&object, &Family::SPATIAL, Audience::Viewer(*viewer));
        }

        let records = self.build_records(object.id.uuid, &mechanic, &transform);
        let (_, skipped) = self.index.replace_lenient(object.id.uuid, object.world, records);
        for conflict in skipped {
            error!("Teleport of {} skipped a claim: {}", object.id, conflict);
        }

        let Some(moved) = self.registry.update(&object.id.uuid, |o| o.transform = transform) else {
            self.index.clear(&object.id.uuid);
            return false;
        };
        self.reposition_seats(&moved, &mechanic);

        for viewer in viewers {
            self.emit(&moved, &Family::SPATIAL, Audience::Viewer(viewer));
        }
        true
    }

    // -----------------------------------------------------------------------
    // Seats
    // -----------------------------------------------------------------------

    /// A rider mounted one of an object's seats: hide barriers from them so
    /// they do not collide with their own seat.
    pub fn seat_mounted(&self, seat: Uuid, rider: ViewerId) -> bool {
        let Some(object) = self.owner_of_seat(&seat) else {
            return false;
        };
        let uuid = object.id.uuid;
        self.scheduler.schedule(
            self.settings.settle_delay_ticks,
            Box::new(move |engine: &Engine| {
                if let Some(object) = engine.registry.get(&uuid) {
                    if object.dependents.seats.contains(&seat) {
                        engine
                            .dispatcher
                            .retract(&object, &[Family::Barrier], Audience::Viewer(rider));
                    }
                }
            }),
        );
        true
    }

    pub fn seat_dismounted(&self, seat: Uuid, rider: ViewerId) -> bool {
        let Some(object) = self.owner_of_seat(&seat) else {
            return false;
        };
        self.emit(&object, &[Family::Barrier], Audience::Viewer(rider));
        true
    }

    fn owner_of_seat(&self, seat: &Uuid) -> Option<Arc<PlacedObject>> {
        self.registry
            .all()
            .into_iter()
            .find(|o| o.dependents.seats.contains(seat))
    }
}
