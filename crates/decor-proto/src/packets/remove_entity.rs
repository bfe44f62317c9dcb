//! RemoveEntity (0x0E): Server → Client.
//!
//! Despawns a synthetic hitbox actor from the client's world.

use bytes::BufMut;

use crate::codec::ProtoEncode;
use crate::types::VarLong;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoveEntity {
    pub entity_unique_id: i64,
}

impl ProtoEncode for RemoveEntity {
    fn proto_encode(&self, buf: &mut impl BufMut) {
        VarLong(self.entity_unique_id).proto_encode(buf);
    }
}
