//! SetActorData (0x27): Server → Client.
//!
//! Rewrites the metadata of an actor the client already knows about. This is
//! how the proxy's appearance (dye, scale, visibility) is pushed per viewer.

use bytes::BufMut;

use crate::codec::ProtoEncode;
use crate::packets::metadata::{encode_entity_metadata, EntityMetadataEntry};
use crate::types::{VarUInt32, VarUInt64};

#[derive(Debug, Clone, PartialEq)]
pub struct SetActorData {
    pub entity_runtime_id: u64,
    pub metadata: Vec<EntityMetadataEntry>,
    pub tick: u64,
}

impl ProtoEncode for SetActorData {
    fn proto_encode(&self, buf: &mut impl BufMut) {
        VarUInt64(self.entity_runtime_id).proto_encode(buf);
        encode_entity_metadata(buf, &self.metadata);
        // Entity sync properties (int count + float count)
        VarUInt32(0).proto_encode(buf);
        VarUInt32(0).proto_encode(buf);
        VarUInt64(self.tick).proto_encode(buf);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packets::metadata::{key, MetadataValue};

    #[test]
    fn encode_empty_metadata() {
        let bytes = SetActorData {
            entity_runtime_id: 3,
            metadata: vec![],
            tick: 0,
        }
        .to_bytes();
        assert_eq!(&bytes[..], &[3, 0, 0, 0, 0]);
    }

    #[test]
    fn encode_with_flags() {
        let bytes = SetActorData {
            entity_runtime_id: 3,
            metadata: vec![EntityMetadataEntry::new(key::FLAGS, MetadataValue::Long(0))],
            tick: 20,
        }
        .to_bytes();
        assert_eq!(bytes[1], 1); // one entry
        assert_eq!(*bytes.last().unwrap(), 20);
    }
}
