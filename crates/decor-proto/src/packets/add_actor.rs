//! AddActor (0x0D): Server → Client.
//!
//! Spawns the synthetic, client-only actor backing an interaction hitbox.

use bytes::BufMut;

use crate::codec::{write_string, ProtoEncode};
use crate::packets::metadata::{encode_entity_metadata, EntityMetadataEntry};
use crate::types::{VarLong, VarUInt32, VarUInt64, Vec3};

#[derive(Debug, Clone, PartialEq)]
pub struct AddActor {
    pub entity_unique_id: i64,
    pub entity_runtime_id: u64,
    pub entity_type: String,
    pub position: Vec3,
    pub pitch: f32,
    pub yaw: f32,
    pub metadata: Vec<EntityMetadataEntry>,
}

impl ProtoEncode for AddActor {
    fn proto_encode(&self, buf: &mut impl BufMut) {
        VarLong(self.entity_unique_id).proto_encode(buf);
        VarUInt64(self.entity_runtime_id).proto_encode(buf);
        write_string(buf, &self.entity_type);
        self.position.proto_encode(buf);
        // Velocity
        Vec3::ZERO.proto_encode(buf);
        buf.put_f32_le(self.pitch);
        buf.put_f32_le(self.yaw);
        // Head yaw + body yaw follow the actor yaw
        buf.put_f32_le(self.yaw);
        buf.put_f32_le(self.yaw);
        // Attributes
        VarUInt32(0).proto_encode(buf);
        encode_entity_metadata(buf, &self.metadata);
        // Entity sync properties (int count + float count)
        VarUInt32(0).proto_encode(buf);
        VarUInt32(0).proto_encode(buf);
        // Entity links
        VarUInt32(0).proto_encode(buf);
    }
}
