//! Per-viewer emission and retraction of the placed-object illusion.
//!
//! The dispatcher keeps a ledger of what each viewer has been sent for each
//! object. Sends skip families already on the ledger and retractions only
//! undo what the ledger holds, so both directions are idempotent. The ledger
//! lock is never held while a packet is handed to the sink.
//!
//! A retracted barrier or light cell is restored to the real block, unless
//! another object now claims that cell in the index.

use std::collections::HashMap;
use std::sync::Arc;

use decor_proto::packets::metadata::{flag, key};
use decor_proto::packets::{
    AddActor, ClientboundPacket, EntityMetadataEntry, MetadataValue, RemoveEntity, SetActorData,
    UpdateBlock,
};
use decor_proto::types::{BlockPos, Vec3};
use parking_lot::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::host::{PacketSink, ViewerDirectory, WorldHost};
use crate::index::{HitboxIndex, HitboxKind, HitboxRecord};
use crate::object::{PlacedObject, ViewerId};
use crate::settings::EngineSettings;

/// Independently emittable message families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
    Metadata,
    Interaction,
    Barrier,
    Light,
}

impl Family {
    pub const ALL: [Family; 4] = [
        Family::Metadata,
        Family::Interaction,
        Family::Barrier,
        Family::Light,
    ];

    /// Families that depend on the object's position and yaw.
    pub const SPATIAL: [Family; 3] = [Family::Interaction, Family::Barrier, Family::Light];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    /// Every viewer in range when sending; every viewer on the ledger when
    /// retracting.
    Broadcast,
    Viewer(ViewerId),
}

/// Everything needed to draw one object, copied out of the shared state.
pub struct Illusion<'a> {
    pub object: &'a PlacedObject,
    pub records: &'a [HitboxRecord],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Item {
    Metadata,
    Entity(i64),
    Barrier(BlockPos),
    Light(BlockPos),
}

impl Item {
    fn family(&self) -> Family {
        match self {
            Item::Metadata => Family::Metadata,
            Item::Entity(_) => Family::Interaction,
            Item::Barrier(_) => Family::Barrier,
            Item::Light(_) => Family::Light,
        }
    }
}

/// What one viewer currently holds for one object.
#[derive(Debug, Default)]
struct Sent {
    metadata: bool,
    entities: Vec<i64>,
    barriers: Vec<BlockPos>,
    lights: Vec<BlockPos>,
}

impl Sent {
    fn has(&self, family: Family) -> bool {
        match family {
            Family::Metadata => self.metadata,
            Family::Interaction => !self.entities.is_empty(),
            Family::Barrier => !self.barriers.is_empty(),
            Family::Light => !self.lights.is_empty(),
        }
    }

    fn mark(&mut self, item: Item) {
        match item {
            Item::Metadata => self.metadata = true,
            Item::Entity(id) => self.entities.push(id),
            Item::Barrier(cell) => self.barriers.push(cell),
            Item::Light(cell) => self.lights.push(cell),
        }
    }

    fn unmark(&mut self, item: Item) {
        match item {
            Item::Metadata => self.metadata = false,
            Item::Entity(id) => self.entities.retain(|e| *e != id),
            Item::Barrier(cell) => self.barriers.retain(|c| *c != cell),
            Item::Light(cell) => self.lights.retain(|c| *c != cell),
        }
    }

    fn take(&mut self, family: Family) -> Vec<Item> {
        match family {
            Family::Metadata => {
                if std::mem::take(&mut self.metadata) {
                    vec![Item::Metadata]
                } else {
                    Vec::new()
                }
            }
            Family::Interaction => std::mem::take(&mut self.entities)
                .into_iter()
                .map(Item::Entity)
                .collect(),
            Family::Barrier => std::mem::take(&mut self.barriers)
                .into_iter()
                .map(Item::Barrier)
                .collect(),
            Family::Light => std::mem::take(&mut self.lights)
                .into_iter()
                .map(Item::Light)
                .collect(),
        }
    }

    fn is_empty(&self) -> bool {
        !self.metadata && self.entities.is_empty() && self.barriers.is_empty() && self.lights.is_empty()
    }
}

type Ledger = HashMap<Uuid, HashMap<ViewerId, Sent>>;

pub struct PacketDispatcher {
    settings: Arc<EngineSettings>,
    index: Arc<HitboxIndex>,
    world: Arc<dyn WorldHost>,
    viewers: Arc<dyn ViewerDirectory>,
    sink: Arc<dyn PacketSink>,
    ledger: Mutex<Ledger>,
}

impl PacketDispatcher {
    pub fn new(
        settings: Arc<EngineSettings>,
        index: Arc<HitboxIndex>,
        world: Arc<dyn WorldHost>,
        viewers: Arc<dyn ViewerDirectory>,
        sink: Arc<dyn PacketSink>,
    ) -> Self {
        Self {
            settings,
            index,
            world,
            viewers,
            sink,
            ledger: Mutex::new(HashMap::new()),
        }
    }

    /// Emit `families` for one object. Returns the number of packets delivered.
    pub fn send(&self, illusion: &Illusion<'_>, families: &[Family], audience: Audience) -> usize {
        match audience {
            Audience::Viewer(viewer) => self.send_to(illusion, viewer, families),
            Audience::Broadcast => {
                let object = illusion.object;
                self.viewers
                    .viewers_near(object.world, object.transform.position, self.settings.view_radius)
                    .into_iter()
                    .map(|viewer| self.send_to(illusion, viewer, families))
                    .sum()
            }
        }
    }

    /// Undo `families` for one object. Only what was sent is retracted.
    pub fn retract(&self, object: &PlacedObject, families: &[Family], audience: Audience) -> usize {
        match audience {
            Audience::Viewer(viewer) => self.retract_from(object, viewer, families),
            Audience::Broadcast => self
                .viewers_of(&object.id.uuid)
                .into_iter()
                .map(|viewer| self.retract_from(object, viewer, families))
                .sum(),
        }
    }

    /// Drop every ledger entry for an object without sending anything.
    pub fn forget(&self, uuid: &Uuid) {
        self.ledger.lock().remove(uuid);
    }

    /// Drop every ledger entry of a disconnected viewer.
    pub fn forget_viewer(&self, viewer: ViewerId) {
        let mut ledger = self.ledger.lock();
        for viewers in ledger.values_mut() {
            viewers.remove(&viewer);
        }
        ledger.retain(|_, viewers| !viewers.is_empty());
    }

    /// Viewers currently holding any part of an object's illusion.
    pub fn viewers_of(&self, uuid: &Uuid) -> Vec<ViewerId> {
        let mut out: Vec<ViewerId> = self
            .ledger
            .lock()
            .get(uuid)
            .map(|viewers| viewers.keys().copied().collect())
            .unwrap_or_default();
        out.sort();
        out
    }

    pub fn has_sent(&self, uuid: &Uuid, viewer: ViewerId, family: Family) -> bool {
        self.ledger
            .lock()
            .get(uuid)
            .and_then(|viewers| viewers.get(&viewer))
            .is_some_and(|sent| sent.has(family))
    }

    pub fn objects_on_ledger(&self) -> Vec<Uuid> {
        self.ledger.lock().keys().copied().collect()
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn send_to(&self, illusion: &Illusion<'_>, viewer: ViewerId, families: &[Family]) -> usize {
        let uuid = illusion.object.id.uuid;
        let mut batch: Vec<(Item, ClientboundPacket)> = Vec::new();
        {
            let mut ledger = self.ledger.lock();
            let sent = ledger.entry(uuid).or_default().entry(viewer).or_default();
            for family in families {
                if sent.has(*family) {
                    continue;
                }
                for (item, packet) in self.build(illusion, *family) {
                    sent.mark(item);
                    batch.push((item, packet));
                }
            }
            if sent.is_empty() {
                if let Some(viewers) = ledger.get_mut(&uuid) {
                    viewers.remove(&viewer);
                    if viewers.is_empty() {
                        ledger.remove(&uuid);
                    }
                }
            }
        }

        let mut delivered = 0;
        let mut failed = Vec::new();
        for (item, packet) in batch {
            match self.sink.send(viewer, packet) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!("Failed to send {:?} of {} to {}: {}", item.family(), uuid, viewer, e);
                    failed.push(item);
                }
            }
        }

        if !failed.is_empty() {
            let mut ledger = self.ledger.lock();
            if let Some(viewers) = ledger.get_mut(&uuid) {
                if let Some(sent) = viewers.get_mut(&viewer) {
                    for item in failed {
                        sent.unmark(item);
                    }
                    if sent.is_empty() {
                        viewers.remove(&viewer);
                    }
                }
                if viewers.is_empty() {
                    ledger.remove(&uuid);
                }
            }
        }

        if delivered > 0 {
            debug!("Sent {} packet(s) of {} to {}", delivered, uuid, viewer);
        }
        delivered
    }

    fn retract_from(&self, object: &PlacedObject, viewer: ViewerId, families: &[Family]) -> usize {
        let uuid = object.id.uuid;
        let items: Vec<Item> = {
            let mut ledger = self.ledger.lock();
            let Some(viewers) = ledger.get_mut(&uuid) else {
                return 0;
            };
            let Some(sent) = viewers.get_mut(&viewer) else {
                return 0;
            };
            let items = families.iter().flat_map(|f| sent.take(*f)).collect();
            if sent.is_empty() {
                viewers.remove(&viewer);
                if viewers.is_empty() {
                    ledger.remove(&uuid);
                }
            }
            items
        };

        let mut delivered = 0;
        for item in items {
            let Some(packet) = self.inverse(object, item) else {
                debug!("Not restoring {:?} of {} for {}: cell is claimed", item, uuid, viewer);
                continue;
            };
            match self.sink.send(viewer, packet) {
                Ok(()) => delivered += 1,
                Err(e) => warn!(
                    "Failed to retract {:?} of {} from {}: {}",
                    item.family(),
                    uuid,
                    viewer,
                    e
                ),
            }
        }
        delivered
    }

    fn build(&self, illusion: &Illusion<'_>, family: Family) -> Vec<(Item, ClientboundPacket)> {
        let object = illusion.object;
        match family {
            Family::Metadata => vec![(Item::Metadata, self.metadata_packet(object))],
            Family::Interaction => illusion
                .records
                .iter()
                .filter_map(|r| match r.kind {
                    HitboxKind::Interaction {
                        entity_id,
                        width,
                        height,
                    } => Some((
                        Item::Entity(entity_id),
                        self.interaction_packet(object, r, entity_id, width, height),
                    )),
                    _ => None,
                })
                .collect(),
            Family::Barrier => illusion
                .records
                .iter()
                .filter_map(|r| match r.kind {
                    HitboxKind::Barrier { cell } => Some((
                        Item::Barrier(cell),
                        ClientboundPacket::UpdateBlock(UpdateBlock::new(
                            cell,
                            self.settings.barrier_runtime_id,
                        )),
                    )),
                    _ => None,
                })
                .collect(),
            Family::Light => {
                if !object.light_on {
                    return Vec::new();
                }
                illusion
                    .records
                    .iter()
                    .filter_map(|r| match r.kind {
                        HitboxKind::Light { cell, level } => Some((
                            Item::Light(cell),
                            ClientboundPacket::UpdateBlock(UpdateBlock::new(
                                cell,
                                self.settings.light_runtime_id(level),
                            )),
                        )),
                        _ => None,
                    })
                    .collect()
            }
        }
    }

    /// Packet that undoes `item`, or `None` if the cell now belongs to
    /// another object whose own block must stay on the client.
    fn inverse(&self, object: &PlacedObject, item: Item) -> Option<ClientboundPacket> {
        let packet = match item {
            Item::Metadata => ClientboundPacket::SetActorData(SetActorData {
                entity_runtime_id: object.id.numeric as u64,
                metadata: vec![EntityMetadataEntry::new(
                    key::FLAGS,
                    MetadataValue::Long(flag::NO_AI | flag::INVISIBLE),
                )],
                tick: 0,
            }),
            Item::Entity(entity_id) => ClientboundPacket::RemoveEntity(RemoveEntity {
                entity_unique_id: entity_id,
            }),
            Item::Barrier(cell) | Item::Light(cell) => {
                match self.index.owner_at(object.world, cell) {
                    Some(owner) if owner != object.id.uuid => return None,
                    _ => {}
                }
                ClientboundPacket::UpdateBlock(UpdateBlock::new(
                    cell,
                    self.world.block_runtime_id(object.world, cell),
                ))
            }
        };
        Some(packet)
    }

    fn metadata_packet(&self, object: &PlacedObject) -> ClientboundPacket {
        let mut metadata = vec![
            EntityMetadataEntry::new(key::FLAGS, MetadataValue::Long(flag::NO_AI)),
            EntityMetadataEntry::new(
                key::SCALE,
                MetadataValue::Float(object.transform.scale.y),
            ),
        ];
        if let Some(color) = object.dye {
            metadata.push(EntityMetadataEntry::new(
                key::COLOR,
                MetadataValue::Int(color as i32),
            ));
        }
        ClientboundPacket::SetActorData(SetActorData {
            entity_runtime_id: object.id.numeric as u64,
            metadata,
            tick: 0,
        })
    }

    fn interaction_packet(
        &self,
        object: &PlacedObject,
        record: &HitboxRecord,
        entity_id: i64,
        width: f32,
        height: f32,
    ) -> ClientboundPacket {
        let center = record.bounds.center();
        ClientboundPacket::AddActor(AddActor {
            entity_unique_id: entity_id,
            entity_runtime_id: entity_id as u64,
            entity_type: self.settings.interaction_entity.clone(),
            position: Vec3::new(center.x, record.bounds.min.y, center.z),
            pitch: 0.0,
            yaw: object.transform.yaw,
            metadata: vec![
                EntityMetadataEntry::new(key::FLAGS, MetadataValue::Long(flag::NO_AI)),
                EntityMetadataEntry::new(key::BOUNDING_BOX_WIDTH, MetadataValue::Float(width)),
                EntityMetadataEntry::new(key::BOUNDING_BOX_HEIGHT, MetadataValue::Float(height)),
            ],
        })
    }
}
