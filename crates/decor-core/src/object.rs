//! Placed object identity and state.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geometry::{BlockFace, Transform};

/// Host-assigned world identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorldId(pub u32);

impl fmt::Display for WorldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "world#{}", self.0)
    }
}

/// A connected client session, opaque to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ViewerId(pub u64);

impl fmt::Display for ViewerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "viewer#{}", self.0)
    }
}

/// Identity of a placed object.
///
/// `uuid` is stable across restarts; `numeric` is the proxy's runtime id and
/// changes every time the proxy is loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectId {
    pub uuid: Uuid,
    pub numeric: i64,
}

impl ObjectId {
    pub fn new(uuid: Uuid, numeric: i64) -> Self {
        Self { uuid, numeric }
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.uuid, self.numeric)
    }
}

/// Entities spawned alongside the proxy and owned by it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dependents {
    pub seats: Vec<Uuid>,
    pub model: Option<Uuid>,
}

impl Dependents {
    pub fn is_empty(&self) -> bool {
        self.seats.is_empty() && self.model.is_none()
    }
}

/// Snapshot of one placed object.
///
/// Records are immutable once published to the registry; updates publish a
/// modified clone.
#[derive(Debug, Clone, PartialEq)]
pub struct PlacedObject {
    pub id: ObjectId,
    pub type_id: String,
    pub world: WorldId,
    pub transform: Transform,
    pub facing: BlockFace,
    pub dye: Option<u32>,
    pub light_on: bool,
    pub dependents: Dependents,
}

impl PlacedObject {
    pub fn uuid(&self) -> Uuid {
        self.id.uuid
    }

    pub fn to_persisted(&self) -> PersistedObject {
        PersistedObject {
            uuid: self.id.uuid,
            type_id: self.type_id.clone(),
            transform: self.transform,
            facing: self.facing,
            dye: self.dye,
            light_on: self.light_on,
        }
    }
}

/// Attributes the host stores on the proxy entity itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedObject {
    pub uuid: Uuid,
    pub type_id: String,
    pub transform: Transform,
    pub facing: BlockFace,
    #[serde(default)]
    pub dye: Option<u32>,
    #[serde(default = "default_light_on")]
    pub light_on: bool,
}

fn default_light_on() -> bool {
    true
}
