//! Action encoding.
//!
//! Flows carry their actions as an opaque, already-encoded byte sequence;
//! the stores compare and copy those bytes without interpreting them. This
//! module provides the builder producers use to create such sequences and
//! the instruction wrapping used when a flow mod goes on the wire.

use byteorder::{ByteOrder, NetworkEndian};

use crate::error::{ProtoError, Result};
use crate::wire::{need, pad, put_u16, put_u32};

/// Wildcard output port.
pub const OFPP_ANY: u32 = 0xffffffff;

/// The controller reserved port.
pub const OFPP_CONTROLLER: u32 = 0xfffffffd;

/// "No buffered packet" sentinel for flow mods.
pub const OFP_NO_BUFFER: u32 = 0xffffffff;

const OFPAT_OUTPUT: u16 = 0;
const OFPAT_GROUP: u16 = 22;

const OFPIT_APPLY_ACTIONS: u16 = 4;

/// Maximum bytes of a packet-in sent to the controller.
const CONTROLLER_MAX_LEN: u16 = 0xffff;

/// Builder for an encoded OpenFlow action list.
///
/// An empty list encodes to zero bytes and installs a drop flow.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionList {
    buf: Vec<u8>,
}

impl ActionList {
    /// Starts an empty (drop) action list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an output action to `port`.
    pub fn output(mut self, port: u32) -> Self {
        put_u16(&mut self.buf, OFPAT_OUTPUT);
        put_u16(&mut self.buf, 16);
        put_u32(&mut self.buf, port);
        put_u16(&mut self.buf, 0);
        pad(&mut self.buf, 6);
        self
    }

    /// Appends an output action punting the packet to the controller.
    pub fn controller(mut self) -> Self {
        put_u16(&mut self.buf, OFPAT_OUTPUT);
        put_u16(&mut self.buf, 16);
        put_u32(&mut self.buf, OFPP_CONTROLLER);
        put_u16(&mut self.buf, CONTROLLER_MAX_LEN);
        pad(&mut self.buf, 6);
        self
    }

    /// Appends a group action invoking `group_id`.
    pub fn group(mut self, group_id: u32) -> Self {
        put_u16(&mut self.buf, OFPAT_GROUP);
        put_u16(&mut self.buf, 8);
        put_u32(&mut self.buf, group_id);
        self
    }

    /// Finishes the list, yielding the encoded bytes.
    pub fn build(self) -> Vec<u8> {
        self.buf
    }
}

/// Wraps raw action bytes into an apply-actions instruction.
///
/// Emits nothing for an empty action list; a flow mod without instructions
/// drops matching packets.
pub(crate) fn serialize_instructions(actions: &[u8], out: &mut Vec<u8>) {
    if actions.is_empty() {
        return;
    }
    put_u16(out, OFPIT_APPLY_ACTIONS);
    put_u16(out, (8 + actions.len()) as u16);
    pad(out, 4);
    out.extend_from_slice(actions);
}

/// Extracts the action bytes from a flow mod's instruction list.
///
/// Only apply-actions is interpreted; other instructions are skipped.
pub(crate) fn parse_instructions(mut buf: &[u8]) -> Result<Vec<u8>> {
    let mut actions = Vec::new();
    while !buf.is_empty() {
        need(buf, 4, "instruction header")?;
        let typ = NetworkEndian::read_u16(&buf[0..2]);
        let len = NetworkEndian::read_u16(&buf[2..4]) as usize;
        if len < 8 || len % 8 != 0 {
            return Err(ProtoError::BadLength {
                what: "instruction",
                len,
            });
        }
        need(buf, len, "instruction body")?;
        if typ == OFPIT_APPLY_ACTIONS {
            actions.extend_from_slice(&buf[8..len]);
        }
        buf = &buf[len..];
    }
    Ok(actions)
}
