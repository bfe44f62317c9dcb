//! Clientbound packets emitted for placed objects.

pub mod add_actor;
pub mod metadata;
pub mod remove_entity;
pub mod set_actor_data;
pub mod update_block;

use bytes::Bytes;

use crate::codec::ProtoEncode;

pub use add_actor::AddActor;
pub use metadata::{EntityMetadataEntry, MetadataValue};
pub use remove_entity::RemoveEntity;
pub use set_actor_data::SetActorData;
pub use update_block::UpdateBlock;

/// Game packet IDs.
pub mod id {
    pub const ADD_ACTOR: u32 = 0x0D;
    pub const REMOVE_ENTITY: u32 = 0x0E;
    pub const UPDATE_BLOCK: u32 = 0x15;
    pub const SET_ACTOR_DATA: u32 = 0x27;
}

/// Any packet the placed-object engine can hand to a viewer.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientboundPacket {
    AddActor(AddActor),
    RemoveEntity(RemoveEntity),
    UpdateBlock(UpdateBlock),
    SetActorData(SetActorData),
}

impl ClientboundPacket {
    pub fn id(&self) -> u32 {
        match self {
            ClientboundPacket::AddActor(_) => id::ADD_ACTOR,
            ClientboundPacket::RemoveEntity(_) => id::REMOVE_ENTITY,
            ClientboundPacket::UpdateBlock(_) => id::UPDATE_BLOCK,
            ClientboundPacket::SetActorData(_) => id::SET_ACTOR_DATA,
        }
    }

    /// Encode the packet body (without the game packet header).
    pub fn encode(&self) -> Bytes {
        match self {
            ClientboundPacket::AddActor(p) => p.to_bytes(),
            ClientboundPacket::RemoveEntity(p) => p.to_bytes(),
            ClientboundPacket::UpdateBlock(p) => p.to_bytes(),
            ClientboundPacket::SetActorData(p) => p.to_bytes(),
        }
    }
}
