//! Placement, removal, rotation and the read-only queries.

use std::sync::Arc;

use decor_proto::types::{BlockPos, Vec3};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::dispatcher::{Audience, Family};
use crate::engine::{Engine, Teardown};
use crate::error::PlacementError;
use crate::geometry::{Aabb, BlockFace, Transform};
use crate::host::ProxySpawn;
use crate::mechanic::{Mechanic, MechanicMap};
use crate::object::{Dependents, PersistedObject, PlacedObject, ViewerId, WorldId};

/// Offset that keeps a roof object just below the block above it.
const ROOF_OFFSET: f32 = 0.49;

/// Wall objects are pulled this far (times their height scale) toward the
/// wall so their back sits flush against it.
const WALL_OFFSET: f32 = 0.49;

impl Engine {
    /// Compute the spawn transform for an object placed in `cell` against
    /// `facing`.
    pub fn corrected_transform(
        &self,
        mechanic: &Mechanic,
        world: WorldId,
        cell: BlockPos,
        yaw: f32,
        facing: BlockFace,
    ) -> Transform {
        let fixed = mechanic.properties.is_fixed();
        let (is_floor, is_wall, is_roof) =
            (mechanic.is_floor(), mechanic.is_wall(), mechanic.is_roof());
        let solid_below = self.world.is_solid(world, cell.offset(0, -1, 0));

        let on_ground = facing == BlockFace::Up
            || (facing.is_horizontal() && solid_below && !is_wall);
        let mut position = if fixed && on_ground {
            Vec3::new(cell.x as f32 + 0.5, cell.y as f32, cell.z as f32 + 0.5)
        } else {
            cell.center()
        };

        if is_roof && facing == BlockFace::Down {
            position.y += ROOF_OFFSET;
        }

        if fixed && is_wall && facing.is_horizontal() && !solid_below {
            let shift = WALL_OFFSET * mechanic.properties.scale.y;
            position.x -= facing.mod_x() as f32 * shift;
            position.z -= facing.mod_z() as f32 * shift;
        }

        let yaw = if fixed && is_wall && facing.is_horizontal() {
            facing.wall_yaw()
        } else {
            mechanic.rotation.snap(yaw)
        };

        let pitch = if fixed && is_floor && (facing == BlockFace::Up || (facing.is_horizontal() && !is_wall)) {
            -90.0
        } else if fixed && is_roof && facing == BlockFace::Down {
            90.0
        } else {
            0.0
        };

        Transform {
            position,
            yaw,
            pitch,
            scale: mechanic.properties.scale,
        }
    }

    /// Place a new object. Nothing is left behind on failure.
    pub fn place(
        &self,
        world: WorldId,
        type_id: &str,
        cell: BlockPos,
        yaw: f32,
        facing: BlockFace,
    ) -> Result<Arc<PlacedObject>, PlacementError> {
        if !self.world.is_world_loaded(world) {
            return Err(PlacementError::WorldNotLoaded(world));
        }
        let Some(mechanic) = self.catalog.get(type_id) else {
            warn!("Cannot place unknown mechanic '{}'", type_id);
            return Err(PlacementError::InvalidMechanic(type_id.to_string()));
        };
        if !mechanic.allows_face(facing) {
            return Err(PlacementError::Restricted {
                type_id: type_id.to_string(),
                face: facing,
            });
        }

        let transform = self.corrected_transform(&mechanic, world, cell, yaw, facing);
        for claim in mechanic.claimed_cells(&transform) {
            if self.index.owner_at(world, claim).is_some() || !self.world.is_replaceable(world, claim) {
                return Err(PlacementError::Obstructed(claim));
            }
        }

        let persisted = PersistedObject {
            uuid: Uuid::new_v4(),
            type_id: type_id.to_string(),
            transform,
            facing,
            dye: None,
            light_on: true,
        };
        let spawn = ProxySpawn {
            type_id: type_id.to_string(),
            transform,
            persisted,
        };
        let id = self.world.spawn_proxy(world, &spawn)?;

        let object = PlacedObject {
            id,
            type_id: type_id.to_string(),
            world,
            transform,
            facing,
            dye: None,
            light_on: true,
            dependents: Dependents::default(),
        };
        if let Err(e) = self.registry.register(object.clone()) {
            error!("Registering new proxy {} failed: {}", id, e);
            self.discard_proxy(&object);
            return Err(e.into());
        }

        let records = self.build_records(id.uuid, &mechanic, &transform);
        if let Err(conflict) = self.index.insert(id.uuid, world, records) {
            error!("Index conflict placing '{}' at {}: {}", type_id, cell, conflict);
            self.registry.unregister(&id);
            self.discard_proxy(&object);
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

        self.emit(&record, &Family::ALL, Audience::Broadcast);
        debug!("Placed '{}' as {} at {}", type_id, id, transform.position);
        Ok(record)
    }

    /// Remove an object. Returns `false` if it was already gone.
    pub fn remove(&self, uuid: &Uuid) -> bool {
        self.remove_inner(uuid, false)
    }

    /// Remove an object and hand it to the drop handler afterwards.
    pub fn remove_with_drops(&self, uuid: &Uuid) -> bool {
        self.remove_inner(uuid, true)
    }

    fn remove_inner(&self, uuid: &Uuid, drops: bool) -> bool {
        let Some(object) = self.registry.get(uuid) else {
            return false;
        };
        self.teardown(&object, Teardown::Remove { drops })
    }

    /// Rotate by `delta` degrees. On rejection nothing changes.
    pub fn rotate(&self, uuid: &Uuid, delta: f32) -> Result<Arc<PlacedObject>, PlacementError> {
        let object = self
            .registry
            .get(uuid)
            .ok_or(PlacementError::NotFound(*uuid))?;
        let mechanic = self
            .catalog
            .get(&object.type_id)
            .ok_or_else(|| PlacementError::InvalidMechanic(object.type_id.clone()))?;
        if !mechanic.rotation.rotatable() {
            return Err(PlacementError::NotRotatable(object.type_id.clone()));
        }

        let transform = object
            .transform
            .with_yaw(mechanic.rotation.snap(object.transform.yaw + delta));
        for claim in mechanic.claimed_cells(&transform) {
            match self.index.owner_at(object.world, claim) {
                Some(owner) if owner == *uuid => {}
                Some(_) => return Err(PlacementError::Obstructed(claim)),
                None if !self.world.is_replaceable(object.world, claim) => {
                    return Err(PlacementError::Obstructed(claim))
                }
                None => {}
            }
        }

        let records = self.build_records(*uuid, &mechanic, &transform);
        let previous = match self.index.replace(*uuid, object.world, records) {
            Ok(previous) => previous,
            Err(conflict) => {
                error!("Index conflict rotating {}: {}", object.id, conflict);
                return Err(conflict.into());
            }
        };

        let mut persisted = object.to_persisted();
        persisted.transform = transform;
        if let Err(e) = self.world.update_proxy(&object.id, &persisted) {
            if self.registry.contains(uuid) {
                let (_, skipped) = self.index.replace_lenient(*uuid, object.world, previous);
                for conflict in skipped {
                    error!("Restoring hitboxes of {} skipped a claim: {}", object.id, conflict);
                }
            } else {
                self.index.clear(uuid);
            }
            return Err(e.into());
        }

        let Some(rotated) = self.registry.update(uuid, |o| o.transform = transform) else {
            // Removed while rotating; its teardown may have cleared the index
            // before the new records went in.
            self.index.clear(uuid);
            return Err(PlacementError::NotFound(*uuid));
        };
        self.reposition_seats(&rotated, &mechanic);

        let viewers = self.dispatcher.viewers_of(uuid);
        for viewer in viewers {
            self.dispatcher
                .retract(&object, &Family::SPATIAL, Audience::Viewer(viewer));
            self.emit(&rotated, &Family::ALL, Audience::Viewer(viewer));
        }
        Ok(rotated)
    }

    /// Rotate by the mechanic's configured step.
    pub fn rotate_step(&self, uuid: &Uuid) -> Result<Arc<PlacedObject>, PlacementError> {
        let object = self
            .registry
            .get(uuid)
            .ok_or(PlacementError::NotFound(*uuid))?;
        let step = self
            .catalog
            .get(&object.type_id)
            .ok_or_else(|| PlacementError::InvalidMechanic(object.type_id.clone()))?
            .rotation
            .step()
            .ok_or_else(|| PlacementError::NotRotatable(object.type_id.clone()))?;
        self.rotate(uuid, step)
    }

    /// Retract and resend the whole illusion to one viewer.
    pub fn refresh_for_viewer(&self, uuid: &Uuid, viewer: ViewerId) -> bool {
        let Some(object) = self.registry.get(uuid) else {
            return false;
        };
        self.dispatcher
            .retract(&object, &Family::ALL, Audience::Viewer(viewer));
        self.emit(&object, &Family::ALL, Audience::Viewer(viewer));
        true
    }

    /// Retract and resend the whole illusion to every viewer.
    pub fn refresh_for_world(&self, uuid: &Uuid) -> bool {
        let Some(object) = self.registry.get(uuid) else {
            return false;
        };
        let holders = self.dispatcher.viewers_of(uuid);
        self.dispatcher
            .retract(&object, &Family::ALL, Audience::Broadcast);
        for viewer in holders {
            self.emit(&object, &Family::ALL, Audience::Viewer(viewer));
        }
        self.emit(&object, &Family::ALL, Audience::Broadcast);
        true
    }

    pub fn set_dye(&self, uuid: &Uuid, color: Option<u32>) -> bool {
        let Some(object) = self.registry.update(uuid, |o| o.dye = color) else {
            return false;
        };
        self.persist(&object);
        self.refresh_for_world(uuid)
    }

    /// Switch an object's lights. `None` flips the current state.
    ///
    /// Returns the resulting state; objects whose mechanic does not allow
    /// toggling keep theirs.
    pub fn toggle_light(&self, uuid: &Uuid, on: Option<bool>) -> Result<bool, PlacementError> {
        let object = self
            .registry
            .get(uuid)
            .ok_or(PlacementError::NotFound(*uuid))?;
        let mechanic = self
            .catalog
            .get(&object.type_id)
            .ok_or_else(|| PlacementError::InvalidMechanic(object.type_id.clone()))?;
        if !mechanic.light_toggleable {
            return Ok(object.light_on);
        }
        let next = on.unwrap_or(!object.light_on);
        if next == object.light_on {
            return Ok(next);
        }
        let updated = self
            .registry
            .update(uuid, |o| o.light_on = next)
            .ok_or(PlacementError::NotFound(*uuid))?;
        self.persist(&updated);
        if next {
            self.emit(&updated, &[Family::Light], Audience::Broadcast);
        } else {
            self.dispatcher
                .retract(&updated, &[Family::Light], Audience::Broadcast);
        }
        Ok(next)
    }

    /// Swap the mechanic catalog and rebuild every object against it.
    pub fn reload_catalog(&self, mechanics: MechanicMap) -> usize {
        self.catalog.replace(mechanics);
        let mut refreshed = 0;
        for object in self.registry.all() {
            self.dispatcher
                .retract(&object, &Family::ALL, Audience::Broadcast);
            let Some(mechanic) = self.catalog.get(&object.type_id) else {
                warn!("Mechanic '{}' of {} vanished on reload", object.type_id, object.id);
                continue;
            };
            let records = self.build_records(object.id.uuid, &mechanic, &object.transform);
            let (_, skipped) = self.index.replace_lenient(object.id.uuid, object.world, records);
            for conflict in skipped {
                error!("Reload of {} skipped a claim: {}", object.id, conflict);
            }
            self.emit(&object, &Family::ALL, Audience::Broadcast);
            refreshed += 1;
        }
        info!("Reloaded {} mechanic(s); refreshed {} object(s)", self.catalog.len(), refreshed);
        refreshed
    }

    /// Retract every family from every viewer, e.g. before shutdown.
    pub fn retract_all(&self) -> usize {
        let mut packets = 0;
        for object in self.registry.all() {
            packets += self
                .dispatcher
                .retract(&object, &Family::ALL, Audience::Broadcast);
        }
        packets
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn get(&self, uuid: &Uuid) -> Option<Arc<PlacedObject>> {
        self.registry.get(uuid)
    }

    pub fn get_by_numeric(&self, numeric: i64) -> Option<Arc<PlacedObject>> {
        self.registry.get_by_numeric(numeric)
    }

    pub fn owner_at(&self, world: WorldId, cell: BlockPos) -> Option<Uuid> {
        self.index.owner_at(world, cell)
    }

    pub fn owner_of(&self, entity_id: i64) -> Option<Uuid> {
        self.index.owner_of(entity_id)
    }

    pub fn overlapping(&self, world: WorldId, bounds: &Aabb) -> Vec<Uuid> {
        self.index.overlapping(world, bounds)
    }

    pub fn hitbox_center(&self, entity_id: i64) -> Option<Vec3> {
        self.index.hitbox_center(entity_id)
    }

    pub fn is_hitbox(&self, world: WorldId, cell: BlockPos, exclude: Option<Uuid>) -> bool {
        self.index.is_hitbox(world, cell, exclude)
    }

    pub fn near_barrier(&self, world: WorldId, pos: Vec3, radius: i32) -> bool {
        self.index.near_barrier(world, pos, radius)
    }

    // -----------------------------------------------------------------------
    // Dependents
    // -----------------------------------------------------------------------

    pub(crate) fn spawn_dependents(&self, object: &PlacedObject, mechanic: &Mechanic) -> Dependents {
        let mut dependents = Dependents::default();
        for seat in &mechanic.seats {
            match self
                .world
                .spawn_seat(object.world, seat.position(&object.transform), object.transform.yaw)
            {
                Ok(id) => dependents.seats.push(id),
                Err(e) => warn!("Failed to spawn seat for {}: {}", object.id, e),
            }
        }
        if let Some(model_id) = &mechanic.model_engine_id {
            match self.world.spawn_model(&object.id, model_id) {
                Ok(id) => dependents.model = Some(id),
                Err(e) => warn!("Failed to spawn model '{}' for {}: {}", model_id, object.id, e),
            }
        }
        dependents
    }

    pub(crate) fn reposition_seats(&self, object: &PlacedObject, mechanic: &Mechanic) {
        for (seat, offset) in object.dependents.seats.iter().zip(&mechanic.seats) {
            let position = offset.position(&object.transform);
            if let Err(e) = self.world.move_seat(*seat, position, object.transform.yaw) {
                warn!("Failed to move seat {} of {}: {}", seat, object.id, e);
            }
        }
    }

    /// Clean up after an object that was removed while it was being built.
    pub(crate) fn abandon(&self, object: &PlacedObject, dependents: Dependents) {
        warn!("{} was removed while being set up; discarding its hitboxes", object.id);
        self.index.clear(&object.id.uuid);
        let orphan = PlacedObject {
            dependents,
            ..object.clone()
        };
        self.destroy_dependents(&orphan);
    }

    fn persist(&self, object: &PlacedObject) {
        if let Err(e) = self.world.update_proxy(&object.id, &object.to_persisted()) {
            warn!("Failed to persist {}: {}", object.id, e);
        }
    }

    fn discard_proxy(&self, object: &PlacedObject) {
        if let Err(e) = self.world.destroy_proxy(&object.id) {
            warn!("Failed to discard proxy {}: {}", object.id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{OnceLock, Weak};

    use super::*;
    use crate::engine::Collaborators;
    use crate::error::HostError;
    use crate::hitbox::{BarrierHitbox, InteractionHitbox, LightBlock, SeatOffset};
    use crate::host::WorldHost;
    use crate::index::HitboxKind;
    use crate::mechanic::{DisplayTransform, LimitedPlacing, MechanicCatalog, RotationPolicy};
    use crate::memory::MemoryHost;
    use crate::object::ObjectId;
    use crate::settings::EngineSettings;
    use decor_proto::packets::ClientboundPacket;
    use parking_lot::Mutex;

    const W: WorldId = WorldId(0);

    fn mechanics() -> Vec<Mechanic> {
        let mut block = Mechanic::new("block");
        block.hitbox.barriers.push(BarrierHitbox::new(0, 0, 0));

        let mut bench = Mechanic::new("bench");
        bench.hitbox.barriers.push(BarrierHitbox::new(0, 0, 0));
        bench.hitbox.barriers.push(BarrierHitbox::new(1, 0, 0));

        let mut button = Mechanic::new("button");
        button
            .hitbox
            .interactions
            .push(InteractionHitbox::new(Vec3::new(0.5, 0.0, 0.0), 1.0, 1.0));

        let mut chair = Mechanic::new("chair");
        chair.hitbox.barriers.push(BarrierHitbox::new(0, 0, 0));
        chair.seats.push(SeatOffset(Vec3::new(0.0, 0.4, 0.0)));
        chair.model_engine_id = Some("chair_model".into());
        chair.breakable.drop_amount = Some(3);

        let mut statue = Mechanic::new("statue");
        statue.hitbox.barriers.push(BarrierHitbox::new(0, 0, 0));
        statue.rotation = RotationPolicy::None;

        let mut lamp = Mechanic::new("lamp");
        lamp.hitbox.barriers.push(BarrierHitbox::new(0, 0, 0));
        lamp.lights.push(LightBlock {
            offset: BlockPos::new(0, 1, 0),
            level: 12,
        });
        lamp.light_toggleable = true;

        let mut frame = Mechanic::new("frame");
        frame.limited_placing = Some(LimitedPlacing {
            floor: false,
            wall: true,
            roof: false,
        });

        let mut chandelier = Mechanic::new("chandelier");
        chandelier.limited_placing = Some(LimitedPlacing {
            floor: false,
            wall: false,
            roof: true,
        });

        let mut rug = Mechanic::new("rug");
        rug.limited_placing = Some(LimitedPlacing::default());

        let mut plant = Mechanic::new("plant");
        plant.properties.transform = DisplayTransform::None;

        let mut sofa = Mechanic::new("sofa");
        sofa.hitbox.barriers.push(BarrierHitbox::new(0, 0, 0));
        sofa.seats.push(SeatOffset(Vec3::new(0.5, 0.4, 0.0)));

        let empty = Mechanic::new("empty");

        vec![
            block, bench, button, chair, statue, lamp, frame, chandelier, rug, plant, sofa, empty,
        ]
    }

    fn setup() -> (Arc<MemoryHost>, Engine) {
        let host = Arc::new(MemoryHost::new());
        let engine = Engine::new(
            EngineSettings::default(),
            MechanicCatalog::from_mechanics(mechanics()),
            Collaborators {
                world: host.clone(),
                viewers: host.clone(),
                sink: host.clone(),
                drops: host.clone(),
            },
        );
        (host, engine)
    }

    fn place(engine: &Engine, type_id: &str, cell: BlockPos) -> Result<Arc<PlacedObject>, PlacementError> {
        engine.place(W, type_id, cell, 0.0, BlockFace::Up)
    }

    /// Registry and index agree on the set of owners, with no orphans.
    fn assert_consistent(engine: &Engine) {
        let registered: HashSet<Uuid> = engine
            .registry()
            .all()
            .iter()
            .map(|o| o.id.uuid)
            .collect();
        let indexed: HashSet<Uuid> = engine.index().owners().into_iter().collect();
        assert_eq!(registered, indexed);
        for owner in engine.index().referenced_owners() {
            assert!(registered.contains(&owner), "orphan index entry for {owner}");
        }
    }

    fn barrier_cells(engine: &Engine, uuid: &Uuid) -> HashSet<BlockPos> {
        engine
            .index()
            .records_of(uuid)
            .iter()
            .filter_map(|r| match r.kind {
                HitboxKind::Barrier { cell } => Some(cell),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn second_placement_on_claimed_cell_is_obstructed() {
        let (_host, engine) = setup();
        let cell = BlockPos::new(10, 64, 10);
        place(&engine, "block", cell).unwrap();
        assert_eq!(
            place(&engine, "block", cell).unwrap_err(),
            PlacementError::Obstructed(cell)
        );
        assert_eq!(engine.registry().len(), 1);
        assert_consistent(&engine);
    }

    #[test]
    fn overlapping_finds_interaction_hitbox() {
        let (_host, engine) = setup();
        let obj = place(&engine, "button", BlockPos::new(10, 64, 10)).unwrap();
        let center = obj.transform.position + crate::geometry::rotate_offset(Vec3::new(0.5, 0.0, 0.0), 0.0);
        let query = Aabb::around(center, Vec3::new(0.05, 0.05, 0.05));
        assert_eq!(engine.overlapping(W, &query), vec![obj.id.uuid]);

        let entity_id = engine.index().records_of(&obj.id.uuid)[0].entity_id().unwrap();
        assert_eq!(engine.owner_of(entity_id), Some(obj.id.uuid));
        assert_eq!(engine.hitbox_center(entity_id), Some(center));
    }

    #[test]
    fn removal_destroys_dependents_even_if_seat_already_gone() {
        let (host, engine) = setup();
        let obj = place(&engine, "chair", BlockPos::new(0, 64, 0)).unwrap();
        assert_eq!(obj.dependents.seats.len(), 1);
        let seat = obj.dependents.seats[0];
        let model = obj.dependents.model.unwrap();
        host.kill_seat(seat);

        assert!(engine.remove(&obj.id.uuid));
        assert!(!host.seat_alive(seat));
        assert!(!host.model_alive(model));
        assert!(!host.proxy_alive(&obj.id));
        assert!(engine.get(&obj.id.uuid).is_none());
        assert!(engine.index().records_of(&obj.id.uuid).is_empty());
        assert_eq!(engine.owner_at(W, BlockPos::new(0, 64, 0)), None);
        assert_consistent(&engine);
    }

    #[test]
    fn remove_twice_is_true_then_false_without_double_retraction() {
        let (host, engine) = setup();
        let viewer = host.add_viewer(W, Vec3::new(0.0, 64.0, 0.0));
        let obj = place(&engine, "lamp", BlockPos::new(0, 64, 0)).unwrap();
        host.clear_packets();

        assert!(engine.remove(&obj.id.uuid));
        let after_first = host.packets_for(viewer).len();
        // metadata + barrier + light
        assert_eq!(after_first, 3);
        assert!(!engine.remove(&obj.id.uuid));
        assert_eq!(host.packets_for(viewer).len(), after_first);
    }

    #[test]
    fn remove_with_drops_reports_amount() {
        let (host, engine) = setup();
        let obj = place(&engine, "chair", BlockPos::new(0, 64, 0)).unwrap();
        assert!(engine.remove_with_drops(&obj.id.uuid));
        assert_eq!(host.drops(), vec![(obj.id.uuid, Some(3))]);
        assert!(!engine.remove_with_drops(&obj.id.uuid));
        assert_eq!(host.drops().len(), 1);
    }

    #[test]
    fn placements_never_share_barrier_cells() {
        let (_host, engine) = setup();
        let mut placed = Vec::new();
        for i in 0..40 {
            let cell = BlockPos::new((i * 7) % 9, 64, (i * 5) % 4);
            let kind = if i % 2 == 0 { "bench" } else { "block" };
            if let Ok(obj) = place(&engine, kind, cell) {
                placed.push(obj.id.uuid);
            }
        }
        assert!(placed.len() > 1);
        for (i, a) in placed.iter().enumerate() {
            for b in &placed[i + 1..] {
                assert!(barrier_cells(&engine, a).is_disjoint(&barrier_cells(&engine, b)));
            }
        }
        assert_consistent(&engine);
    }

    #[test]
    fn rotation_applies_fully_or_not_at_all() {
        let (_host, engine) = setup();
        let bench = place(&engine, "bench", BlockPos::new(0, 64, 0)).unwrap();
        place(&engine, "block", BlockPos::new(0, 64, 1)).unwrap();
        let before = barrier_cells(&engine, &bench.id.uuid);

        assert_eq!(
            engine.rotate(&bench.id.uuid, 90.0).unwrap_err(),
            PlacementError::Obstructed(BlockPos::new(0, 64, 1))
        );
        assert_eq!(engine.get(&bench.id.uuid).unwrap().transform.yaw, 0.0);
        assert_eq!(barrier_cells(&engine, &bench.id.uuid), before);

        let rotated = engine.rotate(&bench.id.uuid, 180.0).unwrap();
        assert_eq!(rotated.transform.yaw, 180.0);
        let expected: HashSet<BlockPos> = [BlockPos::new(0, 64, 0), BlockPos::new(-1, 64, 0)].into();
        assert_eq!(barrier_cells(&engine, &bench.id.uuid), expected);
        assert_eq!(engine.owner_at(W, BlockPos::new(1, 64, 0)), None);
        assert_consistent(&engine);
    }

    #[test]
    fn rotation_into_unreplaceable_block_is_rejected() {
        let (host, engine) = setup();
        let bench = place(&engine, "bench", BlockPos::new(0, 64, 0)).unwrap();
        host.set_solid(W, BlockPos::new(0, 64, 1));
        assert!(matches!(
            engine.rotate(&bench.id.uuid, 90.0),
            Err(PlacementError::Obstructed(_))
        ));
    }

    #[test]
    fn rotation_gives_interaction_hitboxes_fresh_ids() {
        let (host, engine) = setup();
        let viewer = host.add_viewer(W, Vec3::new(0.0, 64.0, 0.0));
        let obj = place(&engine, "button", BlockPos::new(0, 64, 0)).unwrap();
        let old_id = engine.index().records_of(&obj.id.uuid)[0].entity_id().unwrap();
        host.clear_packets();

        engine.rotate(&obj.id.uuid, 90.0).unwrap();
        let new_id = engine.index().records_of(&obj.id.uuid)[0].entity_id().unwrap();
        assert_ne!(old_id, new_id);
        assert_eq!(engine.owner_of(old_id), None);
        assert_eq!(engine.owner_of(new_id), Some(obj.id.uuid));

        let packets = host.packets_for(viewer);
        assert!(packets
            .iter()
            .any(|p| matches!(p, ClientboundPacket::RemoveEntity(r) if r.entity_unique_id == old_id)));
        assert!(packets
            .iter()
            .any(|p| matches!(p, ClientboundPacket::AddActor(a) if a.entity_unique_id == new_id)));
    }

    #[test]
    fn rotation_carries_seats_along() {
        let (host, engine) = setup();
        let sofa = place(&engine, "sofa", BlockPos::new(0, 64, 0)).unwrap();
        let seat = sofa.dependents.seats[0];
        let (before, _) = host.seat(seat).unwrap();
        assert!((before.x - 1.0).abs() < 1e-5);

        engine.rotate(&sofa.id.uuid, 180.0).unwrap();
        let (after, yaw) = host.seat(seat).unwrap();
        assert!(after.x.abs() < 1e-5);
        assert!((after.y - 64.4).abs() < 1e-5);
        assert_eq!(yaw, 180.0);
        assert_eq!(host.persisted(&sofa.id).unwrap().transform.yaw, 180.0);
    }

    #[test]
    fn rotate_step_follows_policy() {
        let (_host, engine) = setup();
        let block = place(&engine, "block", BlockPos::new(0, 64, 0)).unwrap();
        assert_eq!(engine.rotate_step(&block.id.uuid).unwrap().transform.yaw, 22.5);

        let statue = place(&engine, "statue", BlockPos::new(5, 64, 0)).unwrap();
        assert_eq!(
            engine.rotate_step(&statue.id.uuid).unwrap_err(),
            PlacementError::NotRotatable("statue".into())
        );
        assert!(matches!(
            engine.rotate(&Uuid::new_v4(), 90.0),
            Err(PlacementError::NotFound(_))
        ));
    }

    #[test]
    fn consistency_holds_across_mixed_operations() {
        let (_host, engine) = setup();
        let mut live: Vec<Uuid> = Vec::new();
        for i in 0..30 {
            let cell = BlockPos::new(i % 6, 64, i / 6);
            match i % 3 {
                0 | 1 => {
                    if let Ok(obj) = place(&engine, if i % 2 == 0 { "bench" } else { "button" }, cell) {
                        live.push(obj.id.uuid);
                    }
                }
                _ => {
                    if let Some(uuid) = live.first().copied() {
                        let _ = engine.rotate(&uuid, 90.0);
                    }
                    if live.len() > 3 {
                        let uuid = live.remove(1);
                        assert!(engine.remove(&uuid));
                    }
                }
            }
            assert_consistent(&engine);
        }
    }

    #[test]
    fn unconfigured_objects_claim_their_anchor() {
        let (host, engine) = setup();
        let viewer = host.add_viewer(W, Vec3::new(0.0, 64.0, 0.0));
        let cell = BlockPos::new(3, 64, 3);
        let obj = place(&engine, "empty", cell).unwrap();
        assert_eq!(engine.owner_at(W, cell), Some(obj.id.uuid));
        assert_eq!(
            place(&engine, "empty", cell).unwrap_err(),
            PlacementError::Obstructed(cell)
        );
        // Only proxy metadata is drawn.
        assert_eq!(host.packets_for(viewer).len(), 1);
    }

    #[test]
    fn placement_errors() {
        let (host, engine) = setup();
        assert_eq!(
            place(&engine, "nope", BlockPos::new(0, 64, 0)).unwrap_err(),
            PlacementError::InvalidMechanic("nope".into())
        );
        assert_eq!(
            engine
                .place(WorldId(7), "block", BlockPos::new(0, 64, 0), 0.0, BlockFace::Up)
                .unwrap_err(),
            PlacementError::WorldNotLoaded(WorldId(7))
        );
        assert!(matches!(
            place(&engine, "frame", BlockPos::new(0, 64, 0)),
            Err(PlacementError::Restricted { .. })
        ));
        host.set_solid(W, BlockPos::new(9, 64, 9));
        assert_eq!(
            place(&engine, "block", BlockPos::new(9, 64, 9)).unwrap_err(),
            PlacementError::Obstructed(BlockPos::new(9, 64, 9))
        );
        assert!(engine.registry().is_empty());
        assert_eq!(host.live_proxies(), 0);
    }

    #[test]
    fn floor_placement_sits_on_block() {
        let (_host, engine) = setup();
        let mechanic = engine.catalog().get("block").unwrap();
        let t = engine.corrected_transform(&mechanic, W, BlockPos::new(10, 64, 10), 30.0, BlockFace::Up);
        assert_eq!(t.position, Vec3::new(10.5, 64.0, 10.5));
        assert_eq!(t.yaw, 22.5);
        assert_eq!(t.pitch, 0.0);
    }

    #[test]
    fn flat_floor_object_lies_down() {
        let (_host, engine) = setup();
        let rug = engine.catalog().get("rug").unwrap();
        let t = engine.corrected_transform(&rug, W, BlockPos::new(0, 64, 0), 0.0, BlockFace::Up);
        assert_eq!(t.pitch, -90.0);
    }

    #[test]
    fn wall_placement_faces_out_and_hugs_wall() {
        let (_host, engine) = setup();
        let frame = engine.catalog().get("frame").unwrap();
        // Clicked the south face of a block at z = 4; the object is at z = 5.
        let t = engine.corrected_transform(&frame, W, BlockPos::new(0, 70, 5), 123.0, BlockFace::South);
        assert_eq!(t.yaw, 0.0);
        assert_eq!(t.pitch, 0.0);
        assert!((t.position.z - (5.5 - 0.49)).abs() < 1e-5);
        assert_eq!(t.position.x, 0.5);
        assert_eq!(t.anchor_cell(), BlockPos::new(0, 70, 5));
    }

    #[test]
    fn roof_placement_flips_and_rises() {
        let (_host, engine) = setup();
        let chandelier = engine.catalog().get("chandelier").unwrap();
        let t = engine.corrected_transform(&chandelier, W, BlockPos::new(0, 70, 0), 0.0, BlockFace::Down);
        assert_eq!(t.pitch, 90.0);
        assert!((t.position.y - 70.99).abs() < 1e-4);
        assert_eq!(t.anchor_cell(), BlockPos::new(0, 70, 0));
    }

    #[test]
    fn non_fixed_transform_uses_block_center() {
        let (_host, engine) = setup();
        let plant = engine.catalog().get("plant").unwrap();
        let t = engine.corrected_transform(&plant, W, BlockPos::new(1, 64, 1), 0.0, BlockFace::Up);
        assert_eq!(t.position, Vec3::new(1.5, 64.5, 1.5));
        assert_eq!(t.pitch, 0.0);
    }

    #[test]
    fn dye_change_resends_metadata() {
        let (host, engine) = setup();
        let viewer = host.add_viewer(W, Vec3::new(0.0, 64.0, 0.0));
        let obj = place(&engine, "block", BlockPos::new(0, 64, 0)).unwrap();
        host.clear_packets();

        assert!(engine.set_dye(&obj.id.uuid, Some(0x336699)));
        assert_eq!(engine.get(&obj.id.uuid).unwrap().dye, Some(0x336699));
        assert!(host
            .packets_for(viewer)
            .iter()
            .any(|p| matches!(p, ClientboundPacket::SetActorData(d) if d.metadata.len() == 3)));
        assert_eq!(host.persisted(&obj.id).unwrap().dye, Some(0x336699));
        assert!(!engine.set_dye(&Uuid::new_v4(), None));
    }

    #[test]
    fn light_toggle_retracts_and_resends_lights() {
        let (host, engine) = setup();
        let viewer = host.add_viewer(W, Vec3::new(0.0, 64.0, 0.0));
        let obj = place(&engine, "lamp", BlockPos::new(0, 64, 0)).unwrap();
        assert!(engine.dispatcher().has_sent(&obj.id.uuid, viewer, Family::Light));

        assert_eq!(engine.toggle_light(&obj.id.uuid, None), Ok(false));
        assert!(!engine.dispatcher().has_sent(&obj.id.uuid, viewer, Family::Light));
        assert_eq!(engine.toggle_light(&obj.id.uuid, Some(false)), Ok(false));
        assert_eq!(engine.toggle_light(&obj.id.uuid, Some(true)), Ok(true));
        assert!(engine.dispatcher().has_sent(&obj.id.uuid, viewer, Family::Light));

        let block = place(&engine, "block", BlockPos::new(5, 64, 0)).unwrap();
        assert_eq!(engine.toggle_light(&block.id.uuid, None), Ok(true));
    }

    #[test]
    fn refresh_for_viewer_resends_once() {
        let (host, engine) = setup();
        let viewer = host.add_viewer(W, Vec3::new(0.0, 64.0, 0.0));
        let obj = place(&engine, "lamp", BlockPos::new(0, 64, 0)).unwrap();
        host.clear_packets();
        assert!(engine.refresh_for_viewer(&obj.id.uuid, viewer));
        // three retractions, three sends
        assert_eq!(host.packets_for(viewer).len(), 6);
    }

    #[test]
    fn reload_rebuilds_hitboxes_from_new_mechanics() {
        let (_host, engine) = setup();
        let obj = place(&engine, "block", BlockPos::new(0, 64, 0)).unwrap();

        let mut grown = Mechanic::new("block");
        grown.hitbox.barriers.push(BarrierHitbox::new(0, 0, 0));
        grown.hitbox.barriers.push(BarrierHitbox::new(0, 1, 0));
        let map = [(grown.type_id.clone(), Arc::new(grown))].into_iter().collect();

        assert_eq!(engine.reload_catalog(map), 1);
        assert_eq!(engine.owner_at(W, BlockPos::new(0, 65, 0)), Some(obj.id.uuid));
        assert!(engine.catalog().get("bench").is_none());
    }

    #[test]
    fn retract_all_clears_every_viewer() {
        let (host, engine) = setup();
        let viewer = host.add_viewer(W, Vec3::new(0.0, 64.0, 0.0));
        place(&engine, "lamp", BlockPos::new(0, 64, 0)).unwrap();
        place(&engine, "block", BlockPos::new(3, 64, 0)).unwrap();
        host.clear_packets();
        assert_eq!(engine.retract_all(), 5);
        assert_eq!(host.packets_for(viewer).len(), 5);
        assert!(engine.dispatcher().objects_on_ledger().is_empty());
    }

    #[test]
    fn block_placement_into_hitbox_is_detected() {
        let (_host, engine) = setup();
        let obj = place(&engine, "block", BlockPos::new(0, 64, 0)).unwrap();
        assert!(engine.is_hitbox(W, BlockPos::new(0, 64, 0), None));
        assert!(!engine.is_hitbox(W, BlockPos::new(0, 64, 0), Some(obj.id.uuid)));
        assert!(engine.near_barrier(W, Vec3::new(0.5, 65.0, 0.5), 3));
    }

    #[test]
    fn light_cells_are_claimed_like_barriers() {
        let (host, engine) = setup();
        host.add_viewer(W, Vec3::new(0.0, 64.0, 0.0));
        let lamp = place(&engine, "lamp", BlockPos::new(0, 64, 0)).unwrap();
        let light_cell = BlockPos::new(0, 65, 0);

        assert_eq!(engine.owner_at(W, light_cell), Some(lamp.id.uuid));
        assert_eq!(
            place(&engine, "block", light_cell).unwrap_err(),
            PlacementError::Obstructed(light_cell)
        );
        assert!(!engine.is_hitbox(W, light_cell, None));

        // The claim outlives the light being switched off.
        assert_eq!(engine.toggle_light(&lamp.id.uuid, Some(false)), Ok(false));
        assert_eq!(engine.owner_at(W, light_cell), Some(lamp.id.uuid));
        assert!(place(&engine, "block", light_cell).is_err());

        assert!(engine.remove(&lamp.id.uuid));
        assert_eq!(engine.owner_at(W, light_cell), None);
        assert!(place(&engine, "block", light_cell).is_ok());
        assert_consistent(&engine);
    }

    #[test]
    fn rotation_into_light_cell_is_rejected() {
        let (_host, engine) = setup();
        let bench = place(&engine, "bench", BlockPos::new(0, 64, 0)).unwrap();
        // The lamp's light sits at (0, 64, 1), where a quarter turn would put
        // the bench's second barrier.
        let lamp = place(&engine, "lamp", BlockPos::new(0, 63, 1)).unwrap();
        assert_eq!(engine.owner_at(W, BlockPos::new(0, 64, 1)), Some(lamp.id.uuid));

        assert_eq!(
            engine.rotate(&bench.id.uuid, 90.0).unwrap_err(),
            PlacementError::Obstructed(BlockPos::new(0, 64, 1))
        );
        assert_eq!(engine.get(&bench.id.uuid).unwrap().transform.yaw, 0.0);
    }

    #[test]
    fn concurrent_queries_during_mutation_stay_consistent() {
        let (_host, engine) = setup();
        let engine = &engine;
        let done = AtomicBool::new(false);
        let done = &done;

        std::thread::scope(|s| {
            for _ in 0..3 {
                s.spawn(move || {
                    let area = Aabb::new(Vec3::new(-4.0, 60.0, -4.0), Vec3::new(12.0, 70.0, 12.0));
                    while !done.load(Ordering::Acquire) {
                        for x in -1..8 {
                            for z in -1..4 {
                                let _ = engine.owner_at(W, BlockPos::new(x, 64, z));
                            }
                        }
                        for owner in engine.overlapping(W, &area) {
                            for record in engine.index().records_of(&owner) {
                                if let Some(id) = record.entity_id() {
                                    let _ = engine.owner_of(id);
                                    let _ = engine.hitbox_center(id);
                                }
                            }
                        }
                        let _ = engine.is_hitbox(W, BlockPos::new(2, 64, 1), None);
                    }
                });
            }

            s.spawn(move || {
                let kinds = ["bench", "button", "lamp", "block"];
                let mut live: Vec<Uuid> = Vec::new();
                for i in 0..300 {
                    let cell = BlockPos::new(i % 7, 64, (i / 7) % 3);
                    match i % 4 {
                        0 | 1 => {
                            if let Ok(obj) = place(engine, kinds[(i as usize / 2) % kinds.len()], cell) {
                                live.push(obj.id.uuid);
                            }
                        }
                        2 => {
                            if let Some(uuid) = live.last().copied() {
                                let _ = engine.rotate(&uuid, 90.0);
                            }
                        }
                        _ => {
                            if live.len() > 4 {
                                let uuid = live.remove(0);
                                assert!(engine.remove(&uuid));
                            }
                        }
                    }
                    assert_consistent(engine);
                }
                done.store(true, Ordering::Release);
            });
        });

        assert_consistent(engine);
    }

    // -----------------------------------------------------------------------
    // Removal racing a mutation
    // -----------------------------------------------------------------------

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Hook {
        Replaceable,
        Alive,
        Seat,
    }

    /// World host that removes every registered object the first time the
    /// armed call comes in, as a concurrent removal would.
    #[derive(Default)]
    struct RacingHost {
        inner: Arc<MemoryHost>,
        engine: OnceLock<Weak<Engine>>,
        armed: Mutex<Option<Hook>>,
        seats: Mutex<Vec<Uuid>>,
    }

    impl RacingHost {
        fn arm(&self, hook: Hook) {
            *self.armed.lock() = Some(hook);
        }

        fn race(&self, hook: Hook) -> bool {
            let fire = {
                let mut armed = self.armed.lock();
                if *armed == Some(hook) {
                    *armed = None;
                    true
                } else {
                    false
                }
            };
            if !fire {
                return false;
            }
            if let Some(engine) = self.engine.get().and_then(Weak::upgrade) {
                for object in engine.registry().all() {
                    engine.remove(&object.id.uuid);
                }
            }
            true
        }
    }

    impl WorldHost for RacingHost {
        fn is_world_loaded(&self, world: WorldId) -> bool {
            self.inner.is_world_loaded(world)
        }

        fn is_replaceable(&self, world: WorldId, cell: BlockPos) -> bool {
            self.race(Hook::Replaceable);
            self.inner.is_replaceable(world, cell)
        }

        fn is_solid(&self, world: WorldId, cell: BlockPos) -> bool {
            self.inner.is_solid(world, cell)
        }

        fn block_runtime_id(&self, world: WorldId, cell: BlockPos) -> u32 {
            self.inner.block_runtime_id(world, cell)
        }

        fn spawn_proxy(&self, world: WorldId, spawn: &ProxySpawn) -> Result<ObjectId, HostError> {
            self.inner.spawn_proxy(world, spawn)
        }

        fn proxy_alive(&self, id: &ObjectId) -> bool {
            self.race(Hook::Alive) || self.inner.proxy_alive(id)
        }

        fn destroy_proxy(&self, id: &ObjectId) -> Result<(), HostError> {
            self.inner.destroy_proxy(id)
        }

        fn update_proxy(&self, id: &ObjectId, persisted: &PersistedObject) -> Result<(), HostError> {
            // Accepts updates for proxies that were destroyed mid-call.
            let _ = self.inner.update_proxy(id, persisted);
            Ok(())
        }

        fn spawn_seat(&self, world: WorldId, position: Vec3, yaw: f32) -> Result<Uuid, HostError> {
            self.race(Hook::Seat);
            let seat = self.inner.spawn_seat(world, position, yaw)?;
            self.seats.lock().push(seat);
            Ok(seat)
        }

        fn move_seat(&self, seat: Uuid, position: Vec3, yaw: f32) -> Result<(), HostError> {
            self.inner.move_seat(seat, position, yaw)
        }

        fn destroy_seat(&self, seat: Uuid) -> Result<(), HostError> {
            self.inner.destroy_seat(seat)
        }

        fn spawn_model(&self, proxy: &ObjectId, model_id: &str) -> Result<Uuid, HostError> {
            self.inner.spawn_model(proxy, model_id)
        }

        fn destroy_model(&self, model: Uuid) -> Result<(), HostError> {
            self.inner.destroy_model(model)
        }
    }

    fn racing_setup() -> (Arc<RacingHost>, Arc<Engine>) {
        let host = Arc::new(RacingHost::default());
        let engine = Arc::new(Engine::new(
            EngineSettings::default(),
            MechanicCatalog::from_mechanics(mechanics()),
            Collaborators {
                world: host.clone(),
                viewers: host.inner.clone(),
                sink: host.inner.clone(),
                drops: host.inner.clone(),
            },
        ));
        assert!(host.engine.set(Arc::downgrade(&engine)).is_ok());
        (host, engine)
    }

    #[test]
    fn rotation_racing_removal_leaves_no_hitboxes() {
        let (host, engine) = racing_setup();
        let bench = place(&engine, "bench", BlockPos::new(0, 64, 0)).unwrap();
        host.arm(Hook::Replaceable);

        assert_eq!(
            engine.rotate(&bench.id.uuid, 90.0).unwrap_err(),
            PlacementError::NotFound(bench.id.uuid)
        );
        assert!(!engine.index().contains_owner(&bench.id.uuid));
        assert_eq!(engine.owner_at(W, BlockPos::new(0, 64, 1)), None);
        assert_consistent(&engine);
    }

    #[test]
    fn teleport_racing_removal_leaves_no_hitboxes() {
        let (host, engine) = racing_setup();
        let block = place(&engine, "block", BlockPos::new(0, 64, 0)).unwrap();
        host.arm(Hook::Alive);

        let to = Transform::new(Vec3::new(3.5, 64.0, 0.5), 0.0);
        assert!(!engine.object_moved(block.id.numeric, to));
        assert!(!engine.index().contains_owner(&block.id.uuid));
        assert_eq!(engine.owner_at(W, BlockPos::new(3, 64, 0)), None);
        assert_consistent(&engine);
    }

    #[test]
    fn placement_racing_removal_discards_hitboxes_and_seats() {
        let (host, engine) = racing_setup();
        host.arm(Hook::Seat);

        assert!(matches!(
            place(&engine, "chair", BlockPos::new(0, 64, 0)),
            Err(PlacementError::NotFound(_))
        ));
        assert_eq!(engine.owner_at(W, BlockPos::new(0, 64, 0)), None);
        assert_eq!(engine.index().counts().owners, 0);
        let seats = host.seats.lock().clone();
        assert_eq!(seats.len(), 1);
        assert!(!host.inner.seat_alive(seats[0]));
        assert_consistent(&engine);
    }
}
