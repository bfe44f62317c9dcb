//! The engine context: owns every piece of placed-object state.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use decor_proto::types::ChunkPos;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::dispatcher::{Audience, Family, Illusion, PacketDispatcher};
use crate::geometry::Transform;
use crate::host::{DropHandler, PacketSink, ViewerDirectory, WorldHost};
use crate::index::{HitboxIndex, HitboxRecord};
use crate::lifecycle::TrackingTable;
use crate::mechanic::{Mechanic, MechanicCatalog};
use crate::object::{PlacedObject, WorldId};
use crate::registry::ObjectRegistry;
use crate::scheduler::{Scheduler, TickScheduler};
use crate::settings::EngineSettings;

/// Monotonic allocator for synthetic interaction entity ids.
pub struct SyntheticIdAllocator {
    next: AtomicI64,
}

impl SyntheticIdAllocator {
    pub fn new(start: i64) -> Self {
        Self {
            next: AtomicI64::new(start),
        }
    }

    /// Allocate the next id. Ids are never handed out twice.
    pub fn allocate(&self) -> i64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    /// Next id that will be allocated.
    pub fn current(&self) -> i64 {
        self.next.load(Ordering::Relaxed)
    }
}

/// Host-side implementations the engine calls out to.
pub struct Collaborators {
    pub world: Arc<dyn WorldHost>,
    pub viewers: Arc<dyn ViewerDirectory>,
    pub sink: Arc<dyn PacketSink>,
    pub drops: Arc<dyn DropHandler>,
}

/// Why an object is being torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Teardown {
    /// Explicit removal; the proxy is destroyed.
    Remove { drops: bool },
    /// The proxy vanished on its own; dependents still need destroying.
    Stale,
}

pub struct Engine {
    pub(crate) settings: Arc<EngineSettings>,
    pub(crate) catalog: MechanicCatalog,
    pub(crate) registry: ObjectRegistry,
    pub(crate) index: Arc<HitboxIndex>,
    pub(crate) dispatcher: PacketDispatcher,
    pub(crate) tracking: TrackingTable,
    pub(crate) scheduler: Arc<dyn Scheduler>,
    pub(crate) ids: SyntheticIdAllocator,
    pub(crate) world: Arc<dyn WorldHost>,
    pub(crate) drops: Arc<dyn DropHandler>,
}

impl Engine {
    pub fn new(settings: EngineSettings, catalog: MechanicCatalog, hosts: Collaborators) -> Self {
        Self::with_scheduler(settings, catalog, hosts, Arc::new(TickScheduler::new()))
    }

    /// Build an engine whose deferred tasks go through `scheduler`.
    pub fn with_scheduler(
        settings: EngineSettings,
        catalog: MechanicCatalog,
        hosts: Collaborators,
        scheduler: Arc<dyn Scheduler>,
    ) -> Self {
        let settings = Arc::new(settings);
        let index = Arc::new(HitboxIndex::new());
        let dispatcher = PacketDispatcher::new(
            Arc::clone(&settings),
            Arc::clone(&index),
            Arc::clone(&hosts.world),
            hosts.viewers,
            hosts.sink,
        );
        Self {
            ids: SyntheticIdAllocator::new(settings.synthetic_id_start),
            settings,
            catalog,
            registry: ObjectRegistry::new(),
            index,
            dispatcher,
            tracking: TrackingTable::new(),
            scheduler,
            world: hosts.world,
            drops: hosts.drops,
        }
    }

    /// Run every deferred task that has come due. Call once per world tick.
    pub fn tick(&self) -> usize {
        let due = self.scheduler.advance();
        let count = due.len();
        for task in due {
            task(self);
        }
        count
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn catalog(&self) -> &MechanicCatalog {
        &self.catalog
    }

    pub fn registry(&self) -> &ObjectRegistry {
        &self.registry
    }

    pub fn index(&self) -> &HitboxIndex {
        &self.index
    }

    pub fn dispatcher(&self) -> &PacketDispatcher {
        &self.dispatcher
    }

    pub fn scheduler(&self) -> &dyn Scheduler {
        self.scheduler.as_ref()
    }

    // -----------------------------------------------------------------------
    // Shared helpers
    // -----------------------------------------------------------------------

    /// Compute the hitbox records an object would own at `transform`.
    ///
    /// Interaction hitboxes get fresh synthetic ids on every call. Light
    /// cells are indexed whether or not the light is on, so switching it on
    /// never collides with a neighbour.
    pub(crate) fn build_records(
        &self,
        owner: Uuid,
        mechanic: &Mechanic,
        transform: &Transform,
    ) -> Vec<HitboxRecord> {
        let mut records: Vec<HitboxRecord> = mechanic
            .hitbox
            .barrier_cells(transform)
            .into_iter()
            .map(|cell| HitboxRecord::barrier(owner, cell))
            .collect();
        if mechanic.claims_footprint(transform) {
            records.push(HitboxRecord::footprint(owner, transform.anchor_cell()));
        }
        for hitbox in &mechanic.hitbox.interactions {
            let bounds = hitbox.bounding_box(hitbox.center(transform));
            records.push(HitboxRecord::interaction(
                owner,
                self.ids.allocate(),
                hitbox.width,
                hitbox.height,
                bounds,
            ));
        }
        for (cell, level) in mechanic.light_cells(transform) {
            if !records.iter().any(|r| r.cell() == Some(cell)) {
                records.push(HitboxRecord::light(owner, cell, level));
            }
        }
        records
    }

    /// Send `families` for a registered object, reading current index state.
    pub(crate) fn emit(&self, object: &PlacedObject, families: &[Family], audience: Audience) -> usize {
        if !self.catalog.contains(&object.type_id) {
            warn!(
                "Mechanic '{}' of {} is no longer in the catalog; not sending",
                object.type_id, object.id
            );
            return 0;
        }
        let records = self.index.records_of(&object.id.uuid);
        let illusion = Illusion {
            object,
            records: &records,
        };
        self.dispatcher.send(&illusion, families, audience)
    }

    /// Tear down one object in the fixed order: unregister, retract, clear
    /// the index, cancel pending syncs, destroy the proxy, destroy dependents.
    ///
    /// Returns `false` if the object was already gone.
    pub(crate) fn teardown(&self, object: &PlacedObject, reason: Teardown) -> bool {
        let Some(record) = self.registry.unregister(&object.id) else {
            return false;
        };
        let uuid = record.id.uuid;

        self.dispatcher.retract(&record, &Family::ALL, Audience::Broadcast);
        self.index.clear(&uuid);
        self.tracking.forget_object(&uuid, self.scheduler.as_ref());

        if let Teardown::Remove { .. } = reason {
            if let Err(e) = self.world.destroy_proxy(&record.id) {
                warn!("Proxy of {} already gone during removal: {}", record.id, e);
            }
        }
        self.destroy_dependents(&record);
        self.dispatcher.forget(&uuid);

        if let Teardown::Remove { drops: true } = reason {
            let amount = self
                .catalog
                .get(&record.type_id)
                .and_then(|m| m.breakable.drop_amount);
            self.drops.object_removed(&record, amount);
        }
        debug!("Tore down {} ({:?})", record.id, reason);
        true
    }

    pub(crate) fn destroy_dependents(&self, object: &PlacedObject) {
        for seat in &object.dependents.seats {
            if let Err(e) = self.world.destroy_seat(*seat) {
                warn!("Seat {} of {} already gone: {}", seat, object.id, e);
            }
        }
        if let Some(model) = object.dependents.model {
            if let Err(e) = self.world.destroy_model(model) {
                warn!("Model {} of {} already gone: {}", model, object.id, e);
            }
        }
    }

    /// Drop an object from memory without touching viewers or the proxy.
    ///
    /// Used when viewers have already lost the object, e.g. on unload.
    pub(crate) fn evict(&self, object: &PlacedObject) {
        self.registry.purge(&object.id.uuid);
        self.index.clear(&object.id.uuid);
        self.tracking.forget_object(&object.id.uuid, self.scheduler.as_ref());
        self.destroy_dependents(object);
        self.dispatcher.forget(&object.id.uuid);
    }

    pub(crate) fn objects_in_chunk(&self, world: WorldId, chunk: ChunkPos) -> Vec<Arc<PlacedObject>> {
        self.registry
            .in_world(world)
            .into_iter()
            .filter(|o| o.transform.anchor_cell().chunk_pos() == chunk)
            .collect()
    }
}
