//! Actor metadata entries shared by AddActor and SetActorData.

use bytes::BufMut;

use crate::codec::{write_string, ProtoEncode};
use crate::types::{VarInt, VarLong, VarUInt32};

/// Metadata keys used for proxies and synthetic hitbox actors.
pub mod key {
    pub const FLAGS: u32 = 0;
    pub const COLOR: u32 = 3;
    pub const NAMETAG: u32 = 4;
    pub const SCALE: u32 = 23;
    pub const BOUNDING_BOX_WIDTH: u32 = 53;
    pub const BOUNDING_BOX_HEIGHT: u32 = 54;
}

/// Bits of the FLAGS entry.
pub mod flag {
    pub const INVISIBLE: i64 = 1 << 5;
    pub const NO_AI: i64 = 1 << 16;
    pub const HAS_COLLISION: i64 = 1 << 47;
}

#[derive(Debug, Clone, PartialEq)]
pub enum MetadataValue {
    Byte(u8),
    Short(i16),
    Int(i32),
    Float(f32),
    String(String),
    Long(i64),
}

impl MetadataValue {
    /// Wire data type id (0=byte, 1=short, 2=int, 3=float, 4=string, 7=long).
    pub fn data_type(&self) -> u32 {
        match self {
            MetadataValue::Byte(_) => 0,
            MetadataValue::Short(_) => 1,
            MetadataValue::Int(_) => 2,
            MetadataValue::Float(_) => 3,
            MetadataValue::String(_) => 4,
            MetadataValue::Long(_) => 7,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EntityMetadataEntry {
    pub key: u32,
    pub value: MetadataValue,
}

impl EntityMetadataEntry {
    pub fn new(key: u32, value: MetadataValue) -> Self {
        Self { key, value }
    }
}

pub(crate) fn encode_entity_metadata(buf: &mut impl BufMut, entries: &[EntityMetadataEntry]) {
    VarUInt32(entries.len() as u32).proto_encode(buf);
    for entry in entries {
        VarUInt32(entry.key).proto_encode(buf);
        VarUInt32(entry.value.data_type()).proto_encode(buf);
        match &entry.value {
            MetadataValue::Byte(v) => buf.put_u8(*v),
            MetadataValue::Short(v) => buf.put_i16_le(*v),
            MetadataValue::Int(v) => VarInt(*v).proto_encode(buf),
            MetadataValue::Float(v) => buf.put_f32_le(*v),
            MetadataValue::String(v) => write_string(buf, v),
            MetadataValue::Long(v) => VarLong(*v).proto_encode(buf),
        }
    }
}
