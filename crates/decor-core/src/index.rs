//! Spatial and reverse indices over live synthetic hitboxes.
//!
//! Three views are kept consistent under one lock:
//!
//! - owner uuid -> every record of that owner (bulk teardown)
//! - (world, cell) -> owner (barrier point lookups)
//! - synthetic entity id -> owner (interaction click lookups)
//!
//! A fourth, chunk-bucketed view narrows `overlapping` scans to owners whose
//! records sit near the query box.

use std::collections::{HashMap, HashSet};

use decor_proto::types::{BlockPos, ChunkPos, Vec3};
use parking_lot::RwLock;
use uuid::Uuid;

use crate::error::IndexConflict;
use crate::geometry::Aabb;
use crate::object::WorldId;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HitboxKind {
    /// Fake solid block sent to viewers.
    Barrier { cell: BlockPos },
    /// Synthetic interaction entity.
    Interaction { entity_id: i64, width: f32, height: f32 },
    /// Anchor cell of an object without configured hitboxes. Never drawn.
    Footprint { cell: BlockPos },
    /// Fake light block. Claims its cell but is not a hitbox.
    Light { cell: BlockPos, level: u8 },
}

/// One live hitbox bound to a placed object.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HitboxRecord {
    pub owner: Uuid,
    pub kind: HitboxKind,
    pub bounds: Aabb,
}

impl HitboxRecord {
    pub fn barrier(owner: Uuid, cell: BlockPos) -> Self {
        Self {
            owner,
            kind: HitboxKind::Barrier { cell },
            bounds: Aabb::of_block(cell),
        }
    }

    pub fn footprint(owner: Uuid, cell: BlockPos) -> Self {
        Self {
            owner,
            kind: HitboxKind::Footprint { cell },
            bounds: Aabb::of_block(cell),
        }
    }

    pub fn light(owner: Uuid, cell: BlockPos, level: u8) -> Self {
        Self {
            owner,
            kind: HitboxKind::Light { cell, level },
            bounds: Aabb::of_block(cell),
        }
    }

    pub fn interaction(owner: Uuid, entity_id: i64, width: f32, height: f32, bounds: Aabb) -> Self {
        Self {
            owner,
            kind: HitboxKind::Interaction {
                entity_id,
                width,
                height,
            },
            bounds,
        }
    }

    /// Cell claimed exclusively by this record, if any.
    pub fn cell(&self) -> Option<BlockPos> {
        match self.kind {
            HitboxKind::Barrier { cell }
            | HitboxKind::Footprint { cell }
            | HitboxKind::Light { cell, .. } => Some(cell),
            HitboxKind::Interaction { .. } => None,
        }
    }

    pub fn entity_id(&self) -> Option<i64> {
        match self.kind {
            HitboxKind::Interaction { entity_id, .. } => Some(entity_id),
            _ => None,
        }
    }

    pub fn is_barrier(&self) -> bool {
        matches!(self.kind, HitboxKind::Barrier { .. })
    }

    pub fn is_light(&self) -> bool {
        matches!(self.kind, HitboxKind::Light { .. })
    }

    fn chunk(&self) -> ChunkPos {
        match self.cell() {
            Some(cell) => cell.chunk_pos(),
            None => ChunkPos::from_vec3(&self.bounds.center()),
        }
    }
}

/// Entry counts, mostly for diagnostics and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IndexCounts {
    pub owners: usize,
    pub cells: usize,
    pub entity_ids: usize,
}

struct OwnerEntry {
    world: WorldId,
    records: Vec<HitboxRecord>,
}

#[derive(Default)]
struct Inner {
    by_owner: HashMap<Uuid, OwnerEntry>,
    by_cell: HashMap<(WorldId, BlockPos), Uuid>,
    by_id: HashMap<i64, Uuid>,
    by_chunk: HashMap<(WorldId, ChunkPos), HashSet<Uuid>>,
}

impl Inner {
    /// First claim in `records` that collides with another owner.
    fn find_conflict(
        &self,
        owner: Uuid,
        world: WorldId,
        records: &[HitboxRecord],
    ) -> Option<IndexConflict> {
        for record in records {
            if let Some(cell) = record.cell() {
                if let Some(existing) = self.by_cell.get(&(world, cell)) {
                    if *existing != owner {
                        return Some(IndexConflict::Cell {
                            world,
                            cell,
                            existing: *existing,
                            claimant: owner,
                        });
                    }
                }
            }
            if let Some(entity_id) = record.entity_id() {
                if let Some(existing) = self.by_id.get(&entity_id) {
                    if *existing != owner {
                        return Some(IndexConflict::EntityId {
                            entity_id,
                            existing: *existing,
                            claimant: owner,
                        });
                    }
                }
            }
        }
        None
    }

    fn link(&mut self, owner: Uuid, world: WorldId, records: Vec<HitboxRecord>) {
        for record in &records {
            if let Some(cell) = record.cell() {
                self.by_cell.insert((world, cell), owner);
            }
            if let Some(entity_id) = record.entity_id() {
                self.by_id.insert(entity_id, owner);
            }
            self.by_chunk
                .entry((world, record.chunk()))
                .or_default()
                .insert(owner);
        }
        self.by_owner.insert(owner, OwnerEntry { world, records });
    }

    fn unlink(&mut self, owner: &Uuid) -> Vec<HitboxRecord> {
        let Some(entry) = self.by_owner.remove(owner) else {
            return Vec::new();
        };
        for record in &entry.records {
            if let Some(cell) = record.cell() {
                if self.by_cell.get(&(entry.world, cell)) == Some(owner) {
                    self.by_cell.remove(&(entry.world, cell));
                }
            }
            if let Some(entity_id) = record.entity_id() {
                if self.by_id.get(&entity_id) == Some(owner) {
                    self.by_id.remove(&entity_id);
                }
            }
            let key = (entry.world, record.chunk());
            if let Some(bucket) = self.by_chunk.get_mut(&key) {
                bucket.remove(owner);
                if bucket.is_empty() {
                    self.by_chunk.remove(&key);
                }
            }
        }
        entry.records
    }
}

/// Concurrent hitbox index shared by the tick loop and inbound handlers.
#[derive(Default)]
pub struct HitboxIndex {
    inner: RwLock<Inner>,
}

impl HitboxIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index every record of a new owner, or nothing at all.
    pub fn insert(
        &self,
        owner: Uuid,
        world: WorldId,
        records: Vec<HitboxRecord>,
    ) -> Result<(), IndexConflict> {
        let mut inner = self.inner.write();
        if inner.by_owner.contains_key(&owner) {
            return Err(IndexConflict::DuplicateOwner(owner));
        }
        if let Some(conflict) = inner.find_conflict(owner, world, &records) {
            return Err(conflict);
        }
        inner.link(owner, world, records);
        Ok(())
    }

    /// Swap an owner's records atomically. On conflict nothing changes.
    ///
    /// Returns the previous records.
    pub fn replace(
        &self,
        owner: Uuid,
        world: WorldId,
        records: Vec<HitboxRecord>,
    ) -> Result<Vec<HitboxRecord>, IndexConflict> {
        let mut inner = self.inner.write();
        if let Some(conflict) = inner.find_conflict(owner, world, &records) {
            return Err(conflict);
        }
        let old = inner.unlink(&owner);
        inner.link(owner, world, records);
        Ok(old)
    }

    /// Swap an owner's records, skipping any record that collides with
    /// another owner. Returns the previous records and the skipped claims.
    pub fn replace_lenient(
        &self,
        owner: Uuid,
        world: WorldId,
        records: Vec<HitboxRecord>,
    ) -> (Vec<HitboxRecord>, Vec<IndexConflict>) {
        let mut inner = self.inner.write();
        let old = inner.unlink(&owner);
        let mut kept = Vec::with_capacity(records.len());
        let mut skipped = Vec::new();
        for record in records {
            match inner.find_conflict(owner, world, std::slice::from_ref(&record)) {
                Some(conflict) => skipped.push(conflict),
                None => kept.push(record),
            }
        }
        inner.link(owner, world, kept);
        (old, skipped)
    }

    /// Drop every entry of `owner`. A second call is a no-op.
    pub fn clear(&self, owner: &Uuid) -> Vec<HitboxRecord> {
        self.inner.write().unlink(owner)
    }

    /// Drop every owner indexed in `world`. Returns the cleared owners.
    pub fn clear_world(&self, world: WorldId) -> Vec<Uuid> {
        let mut inner = self.inner.write();
        let owners: Vec<Uuid> = inner
            .by_owner
            .iter()
            .filter(|(_, e)| e.world == world)
            .map(|(owner, _)| *owner)
            .collect();
        for owner in &owners {
            inner.unlink(owner);
        }
        owners
    }

    pub fn owner_at(&self, world: WorldId, cell: BlockPos) -> Option<Uuid> {
        self.inner.read().by_cell.get(&(world, cell)).copied()
    }

    pub fn owner_of(&self, entity_id: i64) -> Option<Uuid> {
        self.inner.read().by_id.get(&entity_id).copied()
    }

    pub fn record_of_id(&self, entity_id: i64) -> Option<HitboxRecord> {
        let inner = self.inner.read();
        let owner = inner.by_id.get(&entity_id)?;
        inner
            .by_owner
            .get(owner)?
            .records
            .iter()
            .find(|r| r.entity_id() == Some(entity_id))
            .copied()
    }

    /// World position of a synthetic interaction entity.
    pub fn hitbox_center(&self, entity_id: i64) -> Option<Vec3> {
        self.record_of_id(entity_id).map(|r| r.bounds.center())
    }

    pub fn records_of(&self, owner: &Uuid) -> Vec<HitboxRecord> {
        self.inner
            .read()
            .by_owner
            .get(owner)
            .map(|e| e.records.clone())
            .unwrap_or_default()
    }

    pub fn contains_owner(&self, owner: &Uuid) -> bool {
        self.inner.read().by_owner.contains_key(owner)
    }

    /// Owners with a hitbox intersecting `bounds`, sorted and deduplicated.
    /// Light cells are not hitboxes and never match.
    pub fn overlapping(&self, world: WorldId, bounds: &Aabb) -> Vec<Uuid> {
        let inner = self.inner.read();
        let lo = ChunkPos::from_vec3(&bounds.min);
        let hi = ChunkPos::from_vec3(&bounds.max);
        let (min_x, max_x) = (lo.x.saturating_sub(1), hi.x.saturating_add(1));
        let (min_z, max_z) = (lo.z.saturating_sub(1), hi.z.saturating_add(1));

        let mut candidates: HashSet<Uuid> = HashSet::new();
        let span = (i64::from(max_x) - i64::from(min_x) + 1) * (i64::from(max_z) - i64::from(min_z) + 1);
        if span > inner.by_chunk.len() as i64 {
            // Wide boxes walk the occupied buckets instead of every chunk.
            for ((w, chunk), bucket) in &inner.by_chunk {
                let in_range = (min_x..=max_x).contains(&chunk.x) && (min_z..=max_z).contains(&chunk.z);
                if *w == world && in_range {
                    candidates.extend(bucket.iter().copied());
                }
            }
        } else {
            for cx in min_x..=max_x {
                for cz in min_z..=max_z {
                    if let Some(bucket) = inner.by_chunk.get(&(world, ChunkPos::new(cx, cz))) {
                        candidates.extend(bucket.iter().copied());
                    }
                }
            }
        }

        let mut hits: Vec<Uuid> = candidates
            .into_iter()
            .filter(|owner| {
                inner.by_owner.get(owner).is_some_and(|e| {
                    e.records
                        .iter()
                        .any(|r| !r.is_light() && r.bounds.intersects(bounds))
                })
            })
            .collect();
        hits.sort();
        hits
    }

    /// True if `cell` is a barrier cell or intersects an interaction box.
    ///
    /// Used to cancel real block placement into a hitbox.
    pub fn is_hitbox(&self, world: WorldId, cell: BlockPos, exclude: Option<Uuid>) -> bool {
        let block = Aabb::of_block(cell);
        let inner = self.inner.read();
        if let Some(owner) = inner.by_cell.get(&(world, cell)) {
            if Some(*owner) != exclude {
                let is_barrier = inner
                    .by_owner
                    .get(owner)
                    .is_some_and(|e| e.records.iter().any(|r| r.kind == HitboxKind::Barrier { cell }));
                if is_barrier {
                    return true;
                }
            }
        }
        let chunk = cell.chunk_pos();
        for cx in (chunk.x - 1)..=(chunk.x + 1) {
            for cz in (chunk.z - 1)..=(chunk.z + 1) {
                let Some(bucket) = inner.by_chunk.get(&(world, ChunkPos::new(cx, cz))) else {
                    continue;
                };
                for owner in bucket {
                    if Some(*owner) == exclude {
                        continue;
                    }
                    let hit = inner.by_owner.get(owner).is_some_and(|e| {
                        e.records.iter().any(|r| {
                            matches!(r.kind, HitboxKind::Interaction { .. })
                                && r.bounds.intersects(&block)
                        })
                    });
                    if hit {
                        return true;
                    }
                }
            }
        }
        false
    }

    /// True if any barrier cell lies within `radius` blocks of `pos`.
    pub fn near_barrier(&self, world: WorldId, pos: Vec3, radius: i32) -> bool {
        let center = BlockPos::from_vec3(&pos);
        let inner = self.inner.read();
        for dx in -radius..=radius {
            for dy in -radius..=radius {
                for dz in -radius..=radius {
                    let cell = center.offset(dx, dy, dz);
                    let Some(owner) = inner.by_cell.get(&(world, cell)) else {
                        continue;
                    };
                    let barrier = inner
                        .by_owner
                        .get(owner)
                        .is_some_and(|e| e.records.iter().any(|r| r.kind == HitboxKind::Barrier { cell }));
                    if barrier {
                        return true;
                    }
                }
            }
        }
        false
    }

    pub fn owners(&self) -> Vec<Uuid> {
        self.inner.read().by_owner.keys().copied().collect()
    }

    /// Owners referenced from the cell and id views.
    pub fn referenced_owners(&self) -> HashSet<Uuid> {
        let inner = self.inner.read();
        inner
            .by_cell
            .values()
            .chain(inner.by_id.values())
            .copied()
            .collect()
    }

    pub fn counts(&self) -> IndexCounts {
        let inner = self.inner.read();
        IndexCounts {
            owners: inner.by_owner.len(),
            cells: inner.by_cell.len(),
            entity_ids: inner.by_id.len(),
        }
    }
}
