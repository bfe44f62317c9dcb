//! Collaborator seams implemented by the embedding server.

use decor_proto::packets::ClientboundPacket;
use decor_proto::types::{BlockPos, Vec3};
use uuid::Uuid;

use crate::error::{HostError, SendError};
use crate::geometry::Transform;
use crate::object::{ObjectId, PersistedObject, PlacedObject, ViewerId, WorldId};

/// What the host needs to spawn the renderable proxy.
#[derive(Debug, Clone, PartialEq)]
pub struct ProxySpawn {
    pub type_id: String,
    pub transform: Transform,
    pub persisted: PersistedObject,
}

/// Authoritative voxel world state.
pub trait WorldHost: Send + Sync {
    fn is_world_loaded(&self, world: WorldId) -> bool;

    /// Whether a real block at `cell` may be replaced by a placed object.
    fn is_replaceable(&self, world: WorldId, cell: BlockPos) -> bool;

    fn is_solid(&self, world: WorldId, cell: BlockPos) -> bool;

    /// Runtime id of the real block at `cell`, used to restore it on viewers.
    fn block_runtime_id(&self, world: WorldId, cell: BlockPos) -> u32;

    /// Spawn the proxy entity and store `spawn.persisted` on it.
    fn spawn_proxy(&self, world: WorldId, spawn: &ProxySpawn) -> Result<ObjectId, HostError>;

    fn proxy_alive(&self, id: &ObjectId) -> bool;

    fn destroy_proxy(&self, id: &ObjectId) -> Result<(), HostError>;

    /// Move or rotate a live proxy and rewrite its persisted attributes.
    fn update_proxy(&self, id: &ObjectId, persisted: &PersistedObject) -> Result<(), HostError>;

    fn spawn_seat(&self, world: WorldId, position: Vec3, yaw: f32) -> Result<Uuid, HostError>;

    fn move_seat(&self, seat: Uuid, position: Vec3, yaw: f32) -> Result<(), HostError>;

    fn destroy_seat(&self, seat: Uuid) -> Result<(), HostError>;

    fn spawn_model(&self, proxy: &ObjectId, model_id: &str) -> Result<Uuid, HostError>;

    fn destroy_model(&self, model: Uuid) -> Result<(), HostError>;
}

/// Connected viewer sessions.
pub trait ViewerDirectory: Send + Sync {
    /// Viewers able to observe `position` within `radius` blocks.
    fn viewers_near(&self, world: WorldId, position: Vec3, radius: f32) -> Vec<ViewerId>;
}

/// Outbound packet path to one viewer. Must not block.
pub trait PacketSink: Send + Sync {
    fn send(&self, viewer: ViewerId, packet: ClientboundPacket) -> Result<(), SendError>;
}

/// Called after a removal has fully cleaned up.
pub trait DropHandler: Send + Sync {
    fn object_removed(&self, object: &PlacedObject, amount: Option<u32>);
}
