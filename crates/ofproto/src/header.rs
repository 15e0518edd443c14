//! OpenFlow header framing and message type classification.

use byteorder::{ByteOrder, NetworkEndian};
use std::sync::atomic::{AtomicU32, Ordering};

use crate::error::{ProtoError, Result};
use crate::wire::{need, put_u16, put_u32};

/// The protocol version this agent speaks (OpenFlow 1.3).
pub const OFP13_VERSION: u8 = 0x04;

/// Fixed size of the OpenFlow header.
pub const OFP_HEADER_LEN: usize = 8;

/// OpenFlow 1.3 message types understood by this agent.
///
/// Types the agent neither sends nor interprets beyond logging are still
/// named here so the receive path can classify and ignore them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OfpType {
    Hello = 0,
    Error = 1,
    EchoRequest = 2,
    EchoReply = 3,
    Experimenter = 4,
    FeaturesRequest = 5,
    FeaturesReply = 6,
    PacketIn = 10,
    FlowRemoved = 11,
    PortStatus = 12,
    PacketOut = 13,
    FlowMod = 14,
    GroupMod = 15,
    BarrierRequest = 20,
    BarrierReply = 21,
}

impl OfpType {
    /// Classifies a raw type code.
    pub fn from_code(code: u8) -> Result<Self> {
        Ok(match code {
            0 => Self::Hello,
            1 => Self::Error,
            2 => Self::EchoRequest,
            3 => Self::EchoReply,
            4 => Self::Experimenter,
            5 => Self::FeaturesRequest,
            6 => Self::FeaturesReply,
            10 => Self::PacketIn,
            11 => Self::FlowRemoved,
            12 => Self::PortStatus,
            13 => Self::PacketOut,
            14 => Self::FlowMod,
            15 => Self::GroupMod,
            20 => Self::BarrierRequest,
            21 => Self::BarrierReply,
            other => return Err(ProtoError::UnknownType(other)),
        })
    }
}

/// The fixed eight-byte header that prefixes every OpenFlow message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OfpHeader {
    /// Wire protocol version.
    pub version: u8,
    /// Raw message type code.
    pub msg_type: u8,
    /// Total message length including this header.
    pub length: u16,
    /// Transaction id correlating requests and replies.
    pub xid: u32,
}

impl OfpHeader {
    /// Builds a header for an outbound message of `length` total bytes.
    pub fn new(msg_type: OfpType, length: u16, xid: u32) -> Self {
        Self {
            version: OFP13_VERSION,
            msg_type: msg_type as u8,
            length,
            xid,
        }
    }

    /// Parses a header from the front of `buf`.
    pub fn parse(buf: &[u8]) -> Result<Self> {
        need(buf, OFP_HEADER_LEN, "OpenFlow header")?;
        let header = Self {
            version: buf[0],
            msg_type: buf[1],
            length: NetworkEndian::read_u16(&buf[2..4]),
            xid: NetworkEndian::read_u32(&buf[4..8]),
        };
        if (header.length as usize) < OFP_HEADER_LEN {
            return Err(ProtoError::BadLength {
                what: "OpenFlow header",
                len: header.length as usize,
            });
        }
        Ok(header)
    }

    /// Serializes the header.
    pub fn serialize(&self, out: &mut Vec<u8>) {
        out.push(self.version);
        out.push(self.msg_type);
        put_u16(out, self.length);
        put_u32(out, self.xid);
    }

    /// Length of the body that follows this header.
    pub fn body_len(&self) -> usize {
        self.length as usize - OFP_HEADER_LEN
    }
}

static NEXT_XID: AtomicU32 = AtomicU32::new(1);

/// Allocates a transaction id unique within this process.
///
/// Both the transport (hello, keepalive probes) and the control state
/// machine draw from the same counter so replies can always be attributed
/// unambiguously.
pub fn next_xid() -> u32 {
    NEXT_XID.fetch_add(1, Ordering::Relaxed)
}
