//! Error types for placement, indexing, and the host seams.

use decor_proto::types::BlockPos;
use thiserror::Error;
use uuid::Uuid;

use crate::object::WorldId;

/// Failure to parse a hitbox, light, or seat descriptor string.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum HitboxParseError {
    #[error("expected three comma-separated coordinates, got '{0}'")]
    BadVector(String),

    #[error("invalid number '{0}'")]
    BadNumber(String),

    #[error("invalid size '{0}' (expected 'width,height')")]
    BadSize(String),
}

/// Two owners claimed the same cell or synthetic id.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IndexConflict {
    #[error("cell {cell} in world {world} already claimed by {existing}, rejected claim by {claimant}")]
    Cell {
        world: WorldId,
        cell: BlockPos,
        existing: Uuid,
        claimant: Uuid,
    },

    #[error("synthetic id {entity_id} already owned by {existing}, rejected claim by {claimant}")]
    EntityId {
        entity_id: i64,
        existing: Uuid,
        claimant: Uuid,
    },

    #[error("owner {0} is already indexed")]
    DuplicateOwner(Uuid),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("object {uuid} is registered with numeric id {existing}, refusing {incoming}")]
    Conflict {
        uuid: Uuid,
        existing: i64,
        incoming: i64,
    },

    #[error("numeric id {numeric} already belongs to {existing}")]
    NumericTaken { numeric: i64, existing: Uuid },
}

/// Failure reported by the voxel world host.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostError {
    #[error("world {0} is not loaded")]
    WorldNotLoaded(WorldId),

    #[error("entity {0} does not exist")]
    MissingEntity(Uuid),

    #[error("host rejected the operation: {0}")]
    Rejected(String),
}

/// Failure to deliver a packet to a viewer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    #[error("viewer {0} is not connected")]
    Disconnected(u64),

    #[error("send buffer full for viewer {0}")]
    Backpressure(u64),
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read mechanics file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse mechanics file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("mechanic '{type_id}' has an invalid hitbox: {reason}")]
    InvalidHitbox { type_id: String, reason: String },
}

/// Why a place or rotate request was refused.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PlacementError {
    #[error("cell {0} is obstructed")]
    Obstructed(BlockPos),

    #[error("unknown mechanic '{0}'")]
    InvalidMechanic(String),

    #[error(transparent)]
    IndexConflict(#[from] IndexConflict),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("mechanic '{type_id}' cannot be placed against a {face:?} face")]
    Restricted {
        type_id: String,
        face: crate::geometry::BlockFace,
    },

    #[error("world {0} is not loaded")]
    WorldNotLoaded(WorldId),

    #[error("object {0} is not placed")]
    NotFound(Uuid),

    #[error("mechanic '{0}' does not rotate")]
    NotRotatable(String),

    #[error(transparent)]
    Host(#[from] HostError),
}
