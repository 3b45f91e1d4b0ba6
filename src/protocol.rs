//! Fixed-size wire headers exchanged on engine↔gateway connections
//! (`GatewayMessage`) and storage/engine/sequencer connections
//! (`SharedLogMessage`). Both are plain structs with a manual big-endian
//! encode/decode, matching the source's packed-struct wire layout; there is
//! no protobuf framing at this layer, only for the payloads the headers
//! describe (metalog batches).

use bytes::{Buf, BufMut, Bytes, BytesMut};

pub const GATEWAY_MESSAGE_SIZE: usize = 64;
pub const SHARED_LOG_MESSAGE_SIZE: usize = 52;

/// `message_type` values for [`GatewayMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum GatewayMessageType {
    EngineHandshake = 0,
    FuncCall = 1,
    FuncCallComplete = 2,
    FuncCallFailed = 3,
}

impl GatewayMessageType {
    fn from_u16(v: u16) -> Option<Self> {
        match v {
            0 => Some(Self::EngineHandshake),
            1 => Some(Self::FuncCall),
            2 => Some(Self::FuncCallComplete),
            3 => Some(Self::FuncCallFailed),
            _ => None,
        }
    }
}

/// Fixed-size header on engine↔gateway connections. `payload_size` bytes
/// follow the header on the wire; they are not part of this struct.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GatewayMessage {
    pub message_type: u16,
    pub func_id: u16,
    pub method_id: u16,
    pub client_id: u16,
    pub call_id: u32,
    pub payload_size: u32,
    pub processing_time_us: u32,
    pub dispatch_delay_us: u32,
}

impl GatewayMessage {
    pub fn message_type(&self) -> Option<GatewayMessageType> {
        GatewayMessageType::from_u16(self.message_type)
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(GATEWAY_MESSAGE_SIZE);
        buf.put_u16(self.message_type);
        buf.put_u16(self.func_id);
        buf.put_u16(self.method_id);
        buf.put_u16(self.client_id);
        buf.put_u32(self.call_id);
        buf.put_u32(self.payload_size);
        buf.put_u32(self.processing_time_us);
        buf.put_u32(self.dispatch_delay_us);
        // reserved padding to 64 bytes
        buf.resize(GATEWAY_MESSAGE_SIZE, 0);
        buf.freeze()
    }

    pub fn decode(mut buf: impl Buf) -> Option<Self> {
        if buf.remaining() < GATEWAY_MESSAGE_SIZE {
            return None;
        }
        let message_type = buf.get_u16();
        let func_id = buf.get_u16();
        let method_id = buf.get_u16();
        let client_id = buf.get_u16();
        let call_id = buf.get_u32();
        let payload_size = buf.get_u32();
        let processing_time_us = buf.get_u32();
        let dispatch_delay_us = buf.get_u32();
        buf.advance(GATEWAY_MESSAGE_SIZE - 24);
        Some(GatewayMessage {
            message_type,
            func_id,
            method_id,
            client_id,
            call_id,
            payload_size,
            processing_time_us,
            dispatch_delay_us,
        })
    }
}

/// `op_type` values for [`SharedLogMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SharedLogOpType {
    Replicate = 0,
    ReadAt = 1,
    Metalogs = 2,
    ShardProgress = 3,
    ReadOk = 4,
    DataLost = 5,
    IndexData = 6,
    Response = 7,
}

impl SharedLogOpType {
    fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Replicate),
            1 => Some(Self::ReadAt),
            2 => Some(Self::Metalogs),
            3 => Some(Self::ShardProgress),
            4 => Some(Self::ReadOk),
            5 => Some(Self::DataLost),
            6 => Some(Self::IndexData),
            7 => Some(Self::Response),
            _ => None,
        }
    }
}

/// Fixed-size header on storage/engine/sequencer connections. `payload_size`
/// bytes follow the header on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SharedLogMessage {
    pub op_type: u8,
    pub flags: u8,
    pub src_node_id: u16,
    pub view_id: u16,
    pub logspace_id: u32,
    pub seqnum: u64,
    pub metalog_position: u64,
    pub user_logspace: u32,
    pub user_tag: u64,
    pub client_data: u64,
    pub payload_size: u32,
}

impl SharedLogMessage {
    pub fn op_type(&self) -> Option<SharedLogOpType> {
        SharedLogOpType::from_u8(self.op_type)
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(SHARED_LOG_MESSAGE_SIZE);
        buf.put_u8(self.op_type);
        buf.put_u8(self.flags);
        buf.put_u16(self.src_node_id);
        buf.put_u16(self.view_id);
        buf.put_u16(0); // reserved
        buf.put_u32(self.logspace_id);
        buf.put_u64(self.seqnum);
        buf.put_u64(self.metalog_position);
        buf.put_u32(self.user_logspace);
        buf.put_u64(self.user_tag);
        buf.put_u64(self.client_data);
        buf.put_u32(self.payload_size);
        buf.freeze()
    }

    pub fn decode(mut buf: impl Buf) -> Option<Self> {
        if buf.remaining() < SHARED_LOG_MESSAGE_SIZE {
            return None;
        }
        let op_type = buf.get_u8();
        let flags = buf.get_u8();
        let src_node_id = buf.get_u16();
        let view_id = buf.get_u16();
        buf.advance(2); // reserved
        let logspace_id = buf.get_u32();
        let seqnum = buf.get_u64();
        let metalog_position = buf.get_u64();
        let user_logspace = buf.get_u32();
        let user_tag = buf.get_u64();
        let client_data = buf.get_u64();
        let payload_size = buf.get_u32();
        Some(SharedLogMessage {
            op_type,
            flags,
            src_node_id,
            view_id,
            logspace_id,
            seqnum,
            metalog_position,
            user_logspace,
            user_tag,
            client_data,
            payload_size,
        })
    }

    pub fn new_read_ok_response(logspace_id: u32, seqnum: u64, view_id: u16, src_node_id: u16) -> Self {
        SharedLogMessage {
            op_type: SharedLogOpType::ReadOk as u8,
            flags: 0,
            src_node_id,
            view_id,
            logspace_id,
            seqnum,
            metalog_position: 0,
            user_logspace: 0,
            user_tag: 0,
            client_data: 0,
            payload_size: 0,
        }
    }

    pub fn new_data_lost_response(logspace_id: u32, seqnum: u64, view_id: u16, src_node_id: u16) -> Self {
        SharedLogMessage {
            op_type: SharedLogOpType::DataLost as u8,
            flags: 0,
            src_node_id,
            view_id,
            logspace_id,
            seqnum,
            metalog_position: 0,
            user_logspace: 0,
            user_tag: 0,
            client_data: 0,
            payload_size: 0,
        }
    }

    pub fn new_shard_progress(logspace_id: u32, view_id: u16, src_node_id: u16) -> Self {
        SharedLogMessage {
            op_type: SharedLogOpType::ShardProgress as u8,
            flags: 0,
            src_node_id,
            view_id,
            logspace_id,
            seqnum: 0,
            metalog_position: 0,
            user_logspace: 0,
            user_tag: 0,
            client_data: 0,
            payload_size: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_message_round_trips() {
        let msg = GatewayMessage {
            message_type: GatewayMessageType::FuncCall as u16,
            func_id: 7,
            method_id: 0,
            client_id: 1,
            call_id: 42,
            payload_size: 5,
            processing_time_us: 0,
            dispatch_delay_us: 0,
        };
        let encoded = msg.encode();
        assert_eq!(encoded.len(), GATEWAY_MESSAGE_SIZE);
        let decoded = GatewayMessage::decode(encoded).unwrap();
        assert_eq!(decoded, msg);
        assert_eq!(decoded.message_type(), Some(GatewayMessageType::FuncCall));
    }

    #[test]
    fn gateway_message_decode_rejects_short_buffer() {
        let short = Bytes::from_static(&[0u8; 10]);
        assert!(GatewayMessage::decode(short).is_none());
    }

    #[test]
    fn shared_log_message_round_trips() {
        let msg = SharedLogMessage {
            op_type: SharedLogOpType::Replicate as u8,
            flags: 0,
            src_node_id: 2,
            view_id: 6,
            logspace_id: 0x0001_0001,
            seqnum: 0x100,
            metalog_position: 0,
            user_logspace: 0,
            user_tag: 0,
            client_data: 0,
            payload_size: 3,
        };
        let encoded = msg.encode();
        assert_eq!(encoded.len(), SHARED_LOG_MESSAGE_SIZE);
        let decoded = SharedLogMessage::decode(encoded).unwrap();
        assert_eq!(decoded, msg);
        assert_eq!(decoded.op_type(), Some(SharedLogOpType::Replicate));
    }

    #[test]
    fn read_ok_and_data_lost_helpers_set_op_type() {
        let ok = SharedLogMessage::new_read_ok_response(1, 0x100, 5, 1);
        assert_eq!(ok.op_type(), Some(SharedLogOpType::ReadOk));
        let lost = SharedLogMessage::new_data_lost_response(1, 0x200, 5, 1);
        assert_eq!(lost.op_type(), Some(SharedLogOpType::DataLost));
    }
}
