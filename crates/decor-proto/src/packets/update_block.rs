//! UpdateBlock (0x15): Server → Client.
//!
//! Overrides a single cell on one client. Used for barrier and light cells
//! that never exist in the authoritative world, and to restore the real
//! block when they are retracted.

use bytes::BufMut;

use crate::codec::ProtoEncode;
use crate::types::{BlockPos, VarUInt32};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateBlock {
    pub position: BlockPos,
    pub runtime_id: u32,
    pub flags: u32,
    pub layer: u32,
}

/// Flags: Neighbours (0x01) + Network (0x02).
pub const UPDATE_BLOCK_FLAGS_DEFAULT: u32 = 0x03;

impl UpdateBlock {
    /// Default layer with standard flags.
    pub fn new(position: BlockPos, runtime_id: u32) -> Self {
        Self {
            position,
            runtime_id,
            flags: UPDATE_BLOCK_FLAGS_DEFAULT,
            layer: 0,
        }
    }
}

impl ProtoEncode for UpdateBlock {
    fn proto_encode(&self, buf: &mut impl BufMut) {
        self.position.proto_encode(buf);
        VarUInt32(self.runtime_id).proto_encode(buf);
        VarUInt32(self.flags).proto_encode(buf);
        VarUInt32(self.layer).proto_encode(buf);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_update_block() {
        let bytes = UpdateBlock::new(BlockPos::new(10, 64, -5), 42).to_bytes();
        // pos (3 bytes) + runtime id + flags + layer
        assert_eq!(&bytes[..], &[20, 64, 9, 42, 0x03, 0]);
    }
}
