//! Placed-object engine for a voxel server.
//!
//! Tracks decorative objects anchored to proxy entities, owns a spatial
//! index of their hitboxes and keeps every viewer's client-side illusion
//! (barrier blocks, light blocks, interaction actors, proxy metadata) in
//! step with authoritative state.

pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod geometry;
pub mod hitbox;
pub mod host;
pub mod index;
pub mod lifecycle;
pub mod mechanic;
pub mod memory;
pub mod object;
pub mod placement;
pub mod registry;
pub mod scheduler;
pub mod settings;

pub use dispatcher::{Audience, Family, PacketDispatcher};
pub use engine::{Collaborators, Engine};
pub use error::{CatalogError, HostError, IndexConflict, PlacementError, RegistryError, SendError};
pub use geometry::{Aabb, BlockFace, Transform};
pub use host::{DropHandler, PacketSink, ProxySpawn, ViewerDirectory, WorldHost};
pub use lifecycle::ViewState;
pub use mechanic::{load_mechanics, parse_mechanics, Mechanic, MechanicCatalog, MechanicMap};
pub use memory::MemoryHost;
pub use object::{ObjectId, PersistedObject, PlacedObject, ViewerId, WorldId};
pub use scheduler::{Scheduler, TaskHandle, TickScheduler};
pub use settings::EngineSettings;
