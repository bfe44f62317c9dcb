//! In-memory host: a voxel world, viewer directory, packet sink and drop
//! handler backed by plain maps. Used by the console server and by tests.

use std::collections::{HashMap, HashSet};

use decor_proto::packets::ClientboundPacket;
use decor_proto::types::{BlockPos, Vec3};
use parking_lot::Mutex;
use uuid::Uuid;

use crate::error::{HostError, SendError};
use crate::host::{DropHandler, PacketSink, ProxySpawn, ViewerDirectory, WorldHost};
use crate::object::{ObjectId, PersistedObject, PlacedObject, ViewerId, WorldId};

/// Runtime id reported for solid blocks.
pub const STONE_RUNTIME_ID: u32 = 1;

#[derive(Debug, Clone)]
struct Proxy {
    world: WorldId,
    persisted: PersistedObject,
}

#[derive(Debug, Clone, Copy)]
struct Seat {
    position: Vec3,
    yaw: f32,
}

#[derive(Debug, Clone, Copy)]
struct Viewer {
    world: WorldId,
    position: Vec3,
}

#[derive(Default)]
struct State {
    loaded: HashSet<WorldId>,
    solid: HashSet<(WorldId, BlockPos)>,
    next_numeric: i64,
    proxies: HashMap<ObjectId, Proxy>,
    seats: HashMap<Uuid, Seat>,
    models: HashMap<Uuid, ObjectId>,
    next_viewer: u64,
    viewers: HashMap<ViewerId, Viewer>,
    failing: HashSet<ViewerId>,
    outbox: Vec<(ViewerId, ClientboundPacket)>,
    drops: Vec<(Uuid, Option<u32>)>,
}

pub struct MemoryHost {
    state: Mutex<State>,
}

impl MemoryHost {
    /// A host with world 0 loaded and empty.
    pub fn new() -> Self {
        let mut state = State {
            next_numeric: 1,
            next_viewer: 1,
            ..State::default()
        };
        state.loaded.insert(WorldId(0));
        Self {
            state: Mutex::new(state),
        }
    }

    pub fn load_world(&self, world: WorldId) {
        self.state.lock().loaded.insert(world);
    }

    pub fn unload_world(&self, world: WorldId) {
        self.state.lock().loaded.remove(&world);
    }

    pub fn set_solid(&self, world: WorldId, cell: BlockPos) {
        self.state.lock().solid.insert((world, cell));
    }

    pub fn clear_block(&self, world: WorldId, cell: BlockPos) {
        self.state.lock().solid.remove(&(world, cell));
    }

    // -----------------------------------------------------------------------
    // Viewers and packets
    // -----------------------------------------------------------------------

    pub fn add_viewer(&self, world: WorldId, position: Vec3) -> ViewerId {
        let mut state = self.state.lock();
        let id = ViewerId(state.next_viewer);
        state.next_viewer += 1;
        state.viewers.insert(id, Viewer { world, position });
        id
    }

    pub fn move_viewer(&self, viewer: ViewerId, position: Vec3) -> bool {
        match self.state.lock().viewers.get_mut(&viewer) {
            Some(v) => {
                v.position = position;
                true
            }
            None => false,
        }
    }

    pub fn remove_viewer(&self, viewer: ViewerId) -> bool {
        let mut state = self.state.lock();
        state.failing.remove(&viewer);
        state.viewers.remove(&viewer).is_some()
    }

    pub fn viewers(&self) -> Vec<ViewerId> {
        let mut out: Vec<ViewerId> = self.state.lock().viewers.keys().copied().collect();
        out.sort();
        out
    }

    /// Make every later send to `viewer` fail with backpressure.
    pub fn fail_sends_to(&self, viewer: ViewerId) {
        self.state.lock().failing.insert(viewer);
    }

    /// Packets delivered to `viewer` since the last clear, in order.
    pub fn packets_for(&self, viewer: ViewerId) -> Vec<ClientboundPacket> {
        self.state
            .lock()
            .outbox
            .iter()
            .filter(|(v, _)| *v == viewer)
            .map(|(_, p)| p.clone())
            .collect()
    }

    pub fn clear_packets(&self) {
        self.state.lock().outbox.clear();
    }

    /// Drain every delivered packet.
    pub fn take_packets(&self) -> Vec<(ViewerId, ClientboundPacket)> {
        std::mem::take(&mut self.state.lock().outbox)
    }

    // -----------------------------------------------------------------------
    // Entities
    // -----------------------------------------------------------------------

    /// Destroy a proxy behind the engine's back.
    pub fn kill_proxy(&self, id: &ObjectId) -> bool {
        self.state.lock().proxies.remove(id).is_some()
    }

    pub fn kill_seat(&self, seat: Uuid) -> bool {
        self.state.lock().seats.remove(&seat).is_some()
    }

    pub fn seat_alive(&self, seat: Uuid) -> bool {
        self.state.lock().seats.contains_key(&seat)
    }

    /// Position and yaw of a live seat.
    pub fn seat(&self, seat: Uuid) -> Option<(Vec3, f32)> {
        self.state.lock().seats.get(&seat).map(|s| (s.position, s.yaw))
    }

    pub fn model_alive(&self, model: Uuid) -> bool {
        self.state.lock().models.contains_key(&model)
    }

    pub fn live_proxies(&self) -> usize {
        self.state.lock().proxies.len()
    }

    /// Persisted attributes currently stored on a proxy.
    pub fn persisted(&self, id: &ObjectId) -> Option<PersistedObject> {
        self.state.lock().proxies.get(id).map(|p| p.persisted.clone())
    }

    /// Every live proxy of a world with its persisted attributes.
    pub fn proxies_in(&self, world: WorldId) -> Vec<(i64, PersistedObject)> {
        let mut out: Vec<(i64, PersistedObject)> = self
            .state
            .lock()
            .proxies
            .iter()
            .filter(|(_, p)| p.world == world)
            .map(|(id, p)| (id.numeric, p.persisted.clone()))
            .collect();
        out.sort_by_key(|(numeric, _)| *numeric);
        out
    }

    /// Removals handed to the drop handler, as (uuid, amount).
    pub fn drops(&self) -> Vec<(Uuid, Option<u32>)> {
        self.state.lock().drops.clone()
    }
}

impl Default for MemoryHost {
    fn default() -> Self {
        Self::new()
    }
}

impl WorldHost for MemoryHost {
    fn is_world_loaded(&self, world: WorldId) -> bool {
        self.state.lock().loaded.contains(&world)
    }

    fn is_replaceable(&self, world: WorldId, cell: BlockPos) -> bool {
        !self.state.lock().solid.contains(&(world, cell))
    }

    fn is_solid(&self, world: WorldId, cell: BlockPos) -> bool {
        self.state.lock().solid.contains(&(world, cell))
    }

    fn block_runtime_id(&self, world: WorldId, cell: BlockPos) -> u32 {
        if self.is_solid(world, cell) {
            STONE_RUNTIME_ID
        } else {
            0
        }
    }

    fn spawn_proxy(&self, world: WorldId, spawn: &ProxySpawn) -> Result<ObjectId, HostError> {
        let mut state = self.state.lock();
        if !state.loaded.contains(&world) {
            return Err(HostError::WorldNotLoaded(world));
        }
        let id = ObjectId::new(spawn.persisted.uuid, state.next_numeric);
        state.next_numeric += 1;
        state.proxies.insert(
            id,
            Proxy {
                world,
                persisted: spawn.persisted.clone(),
            },
        );
        Ok(id)
    }

    fn proxy_alive(&self, id: &ObjectId) -> bool {
        self.state.lock().proxies.contains_key(id)
    }

    fn destroy_proxy(&self, id: &ObjectId) -> Result<(), HostError> {
        let mut state = self.state.lock();
        let models: Vec<Uuid> = state
            .models
            .iter()
            .filter(|(_, owner)| *owner == id)
            .map(|(model, _)| *model)
            .collect();
        for model in models {
            state.models.remove(&model);
        }
        state
            .proxies
            .remove(id)
            .map(|_| ())
            .ok_or(HostError::MissingEntity(id.uuid))
    }

    fn update_proxy(&self, id: &ObjectId, persisted: &PersistedObject) -> Result<(), HostError> {
        match self.state.lock().proxies.get_mut(id) {
            Some(proxy) => {
                proxy.persisted = persisted.clone();
                Ok(())
            }
            None => Err(HostError::MissingEntity(id.uuid)),
        }
    }

    fn spawn_seat(&self, world: WorldId, position: Vec3, yaw: f32) -> Result<Uuid, HostError> {
        let mut state = self.state.lock();
        if !state.loaded.contains(&world) {
            return Err(HostError::WorldNotLoaded(world));
        }
        let seat = Uuid::new_v4();
        state.seats.insert(seat, Seat { position, yaw });
        Ok(seat)
    }

    fn move_seat(&self, seat: Uuid, position: Vec3, yaw: f32) -> Result<(), HostError> {
        match self.state.lock().seats.get_mut(&seat) {
            Some(s) => {
                s.position = position;
                s.yaw = yaw;
                Ok(())
            }
            None => Err(HostError::MissingEntity(seat)),
        }
    }

    fn destroy_seat(&self, seat: Uuid) -> Result<(), HostError> {
        self.state
            .lock()
            .seats
            .remove(&seat)
            .map(|_| ())
            .ok_or(HostError::MissingEntity(seat))
    }

    fn spawn_model(&self, proxy: &ObjectId, _model_id: &str) -> Result<Uuid, HostError> {
        let mut state = self.state.lock();
        if !state.proxies.contains_key(proxy) {
            return Err(HostError::MissingEntity(proxy.uuid));
        }
        let model = Uuid::new_v4();
        state.models.insert(model, *proxy);
        Ok(model)
    }

    fn destroy_model(&self, model: Uuid) -> Result<(), HostError> {
        self.state
            .lock()
            .models
            .remove(&model)
            .map(|_| ())
            .ok_or(HostError::MissingEntity(model))
    }
}

impl ViewerDirectory for MemoryHost {
    fn viewers_near(&self, world: WorldId, position: Vec3, radius: f32) -> Vec<ViewerId> {
        let mut out: Vec<ViewerId> = self
            .state
            .lock()
            .viewers
            .iter()
            .filter(|(_, v)| v.world == world && v.position.distance(&position) <= radius)
            .map(|(id, _)| *id)
            .collect();
        out.sort();
        out
    }
}

impl PacketSink for MemoryHost {
    fn send(&self, viewer: ViewerId, packet: ClientboundPacket) -> Result<(), SendError> {
        let mut state = self.state.lock();
        if !state.viewers.contains_key(&viewer) {
            return Err(SendError::Disconnected(viewer.0));
        }
        if state.failing.contains(&viewer) {
            return Err(SendError::Backpressure(viewer.0));
        }
        state.outbox.push((viewer, packet));
        Ok(())
    }
}

impl DropHandler for MemoryHost {
    fn object_removed(&self, object: &PlacedObject, amount: Option<u32>) {
        self.state.lock().drops.push((object.id.uuid, amount));
    }
}
