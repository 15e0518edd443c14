//! Tunnel-TLV table messages (Nicira vendor extension).
//!
//! These experimenter messages let a controller inspect and modify the
//! switch's mapping from Geneve `(class, type, len)` options to
//! tunnel-metadata slots. The agent sends a request on every fresh
//! connection, and adds a mapping when its option is absent.

use byteorder::{ByteOrder, NetworkEndian};

use crate::error::{ProtoError, Result};
use crate::header::OfpType;
use crate::messages::{OfpMessage, OfpPacket};
use crate::wire::{need, pad, put_u16, put_u32};

/// Nicira experimenter id.
pub const NX_VENDOR_ID: u32 = 0x0000_2320;

/// Experimenter subtypes for the TLV table messages.
pub const NXT_TLV_TABLE_MOD: u32 = 30;
pub const NXT_TLV_TABLE_REQUEST: u32 = 31;
pub const NXT_TLV_TABLE_REPLY: u32 = 32;

/// TLV-table-mod failure codes (experimenter error codes under
/// [`NX_VENDOR_ID`]). `ALREADY_MAPPED` and `DUP_ENTRY` mean another
/// controller won the race for the slot.
pub const NXTTMFC_ALREADY_MAPPED: u16 = 3;
pub const NXTTMFC_DUP_ENTRY: u16 = 4;

/// One option-to-slot mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TlvMap {
    /// Geneve option class.
    pub option_class: u16,
    /// Geneve option type.
    pub option_type: u8,
    /// Geneve option length in bytes.
    pub option_len: u8,
    /// Tunnel-metadata slot index the option is mapped to.
    pub index: u16,
}

impl TlvMap {
    const WIRE_LEN: usize = 8;

    fn serialize(&self, out: &mut Vec<u8>) {
        put_u16(out, self.option_class);
        out.push(self.option_type);
        out.push(self.option_len);
        put_u16(out, self.index);
        pad(out, 2);
    }

    fn parse(buf: &[u8]) -> Result<Self> {
        need(buf, Self::WIRE_LEN, "tlv_map")?;
        Ok(Self {
            option_class: NetworkEndian::read_u16(&buf[0..2]),
            option_type: buf[2],
            option_len: buf[3],
            index: NetworkEndian::read_u16(&buf[4..6]),
        })
    }
}

fn parse_maps(mut buf: &[u8]) -> Result<Vec<TlvMap>> {
    let mut mappings = Vec::new();
    while !buf.is_empty() {
        mappings.push(TlvMap::parse(buf)?);
        buf = &buf[TlvMap::WIRE_LEN..];
    }
    Ok(mappings)
}

/// TLV table mod commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum TlvTableModCommand {
    Add = 0,
    Delete = 1,
    Clear = 2,
}

impl TlvTableModCommand {
    fn from_code(code: u16) -> Result<Self> {
        Ok(match code {
            0 => Self::Add,
            1 => Self::Delete,
            2 => Self::Clear,
            other => {
                return Err(ProtoError::malformed(
                    "tlv_table_mod",
                    format!("unknown command {}", other),
                ))
            }
        })
    }
}

/// NXT_TLV_TABLE_MOD: adds, deletes, or clears option mappings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlvTableMod {
    /// What to do with the mappings.
    pub command: TlvTableModCommand,
    /// The mappings operated on.
    pub mappings: Vec<TlvMap>,
}

impl OfpPacket for TlvTableMod {
    fn msg_type(&self) -> OfpType {
        OfpType::Experimenter
    }

    fn serialize_body(&self, out: &mut Vec<u8>) {
        put_u32(out, NX_VENDOR_ID);
        put_u32(out, NXT_TLV_TABLE_MOD);
        put_u16(out, self.command as u16);
        pad(out, 6);
        for map in &self.mappings {
            map.serialize(out);
        }
    }
}

/// NXT_TLV_TABLE_REQUEST: asks for the current mapping table.
#[derive(Debug, Clone, Copy, Default)]
pub struct TlvTableRequest;

impl OfpPacket for TlvTableRequest {
    fn msg_type(&self) -> OfpType {
        OfpType::Experimenter
    }

    fn serialize_body(&self, out: &mut Vec<u8>) {
        put_u32(out, NX_VENDOR_ID);
        put_u32(out, NXT_TLV_TABLE_REQUEST);
    }
}

/// NXT_TLV_TABLE_REPLY: the switch's current mapping table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlvTableReply {
    /// Total option space the switch offers, in bytes.
    pub max_option_space: u32,
    /// Maximum number of mapped fields.
    pub max_fields: u16,
    /// Current mappings.
    pub mappings: Vec<TlvMap>,
}

impl OfpPacket for TlvTableReply {
    fn msg_type(&self) -> OfpType {
        OfpType::Experimenter
    }

    fn serialize_body(&self, out: &mut Vec<u8>) {
        put_u32(out, NX_VENDOR_ID);
        put_u32(out, NXT_TLV_TABLE_REPLY);
        put_u32(out, self.max_option_space);
        put_u16(out, self.max_fields);
        pad(out, 2);
        for map in &self.mappings {
            map.serialize(out);
        }
    }
}

/// Decodes an experimenter body into one of the TLV table messages.
pub(crate) fn decode_experimenter(buf: &[u8]) -> Result<OfpMessage> {
    need(buf, 8, "experimenter header")?;
    let vendor = NetworkEndian::read_u32(&buf[0..4]);
    let subtype = NetworkEndian::read_u32(&buf[4..8]);
    if vendor != NX_VENDOR_ID {
        return Ok(OfpMessage::Other(OfpType::Experimenter));
    }
    let body = &buf[8..];
    match subtype {
        NXT_TLV_TABLE_REQUEST => Ok(OfpMessage::TlvTableRequest),
        NXT_TLV_TABLE_MOD => {
            need(body, 8, "tlv_table_mod")?;
            Ok(OfpMessage::TlvTableMod(TlvTableMod {
                command: TlvTableModCommand::from_code(NetworkEndian::read_u16(&body[0..2]))?,
                mappings: parse_maps(&body[8..])?,
            }))
        }
        NXT_TLV_TABLE_REPLY => {
            need(body, 8, "tlv_table_reply")?;
            Ok(OfpMessage::TlvTableReply(TlvTableReply {
                max_option_space: NetworkEndian::read_u32(&body[0..4]),
                max_fields: NetworkEndian::read_u16(&body[4..6]),
                mappings: parse_maps(&body[8..])?,
            }))
        }
        _ => Ok(OfpMessage::Other(OfpType::Experimenter)),
    }
}
