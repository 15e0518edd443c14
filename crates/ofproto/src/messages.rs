//! OpenFlow message structs, encoding, and inbound classification.

use byteorder::{ByteOrder, NetworkEndian};
use std::fmt;

use crate::actions::{parse_instructions, serialize_instructions, OFPP_ANY, OFP_NO_BUFFER};
use crate::error::{ProtoError, Result};
use crate::groups::GroupMod;
use crate::header::{OfpHeader, OfpType, OFP_HEADER_LEN};
use crate::oxm::Match;
use crate::tlv;
use crate::tlv::{TlvTableMod, TlvTableReply};
use crate::wire::{need, pad, put_u16, put_u32, put_u64};

/// Wildcard table id: a delete over every table.
pub const OFPTT_ALL: u8 = 0xff;

/// The experimenter error type; the real code lives in the payload.
pub const OFPET_EXPERIMENTER: u16 = 0xffff;

/// An outbound OpenFlow message: knows its type and how to write its body.
pub trait OfpPacket {
    /// The message type that goes into the header.
    fn msg_type(&self) -> OfpType;

    /// Writes the body (everything after the header).
    fn serialize_body(&self, out: &mut Vec<u8>);

    /// Frames the message with a header carrying `xid`.
    fn marshal(&self, xid: u32) -> Vec<u8> {
        let mut body = Vec::new();
        self.serialize_body(&mut body);
        let mut buf = Vec::with_capacity(OFP_HEADER_LEN + body.len());
        let header = OfpHeader::new(self.msg_type(), (OFP_HEADER_LEN + body.len()) as u16, xid);
        header.serialize(&mut buf);
        buf.extend_from_slice(&body);
        buf
    }
}

/// OFPT_HELLO. The body is empty; version negotiation is header-level.
#[derive(Debug, Clone, Copy, Default)]
pub struct Hello;

impl OfpPacket for Hello {
    fn msg_type(&self) -> OfpType {
        OfpType::Hello
    }

    fn serialize_body(&self, _out: &mut Vec<u8>) {}
}

/// OFPT_ECHO_REQUEST with an arbitrary payload.
#[derive(Debug, Clone, Default)]
pub struct EchoRequest(pub Vec<u8>);

impl OfpPacket for EchoRequest {
    fn msg_type(&self) -> OfpType {
        OfpType::EchoRequest
    }

    fn serialize_body(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.0);
    }
}

/// OFPT_ECHO_REPLY, carrying the request's payload back.
#[derive(Debug, Clone, Default)]
pub struct EchoReply(pub Vec<u8>);

impl OfpPacket for EchoReply {
    fn msg_type(&self) -> OfpType {
        OfpType::EchoReply
    }

    fn serialize_body(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.0);
    }
}

/// OFPT_BARRIER_REQUEST.
#[derive(Debug, Clone, Copy, Default)]
pub struct BarrierRequest;

impl OfpPacket for BarrierRequest {
    fn msg_type(&self) -> OfpType {
        OfpType::BarrierRequest
    }

    fn serialize_body(&self, _out: &mut Vec<u8>) {}
}

/// OFPT_BARRIER_REPLY.
#[derive(Debug, Clone, Copy, Default)]
pub struct BarrierReply;

impl OfpPacket for BarrierReply {
    fn msg_type(&self) -> OfpType {
        OfpType::BarrierReply
    }

    fn serialize_body(&self, _out: &mut Vec<u8>) {}
}

/// OFPT_ERROR.
///
/// Vendor-extension errors use `err_type` [`OFPET_EXPERIMENTER`] and carry
/// the experimenter id; `code` is then the experimenter-defined code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorMsg {
    /// High-level error type.
    pub err_type: u16,
    /// Error code within the type.
    pub code: u16,
    /// Experimenter id for [`OFPET_EXPERIMENTER`] errors.
    pub experimenter: Option<u32>,
    /// The offending request, as returned by the switch.
    pub data: Vec<u8>,
}

impl ErrorMsg {
    /// Builds a standard error.
    pub fn new(err_type: u16, code: u16) -> Self {
        Self {
            err_type,
            code,
            experimenter: None,
            data: Vec::new(),
        }
    }

    /// Builds an experimenter error.
    pub fn experimenter(experimenter: u32, code: u16) -> Self {
        Self {
            err_type: OFPET_EXPERIMENTER,
            code,
            experimenter: Some(experimenter),
            data: Vec::new(),
        }
    }

    /// Parses an error body.
    pub fn parse(buf: &[u8]) -> Result<Self> {
        need(buf, 4, "error message")?;
        let err_type = NetworkEndian::read_u16(&buf[0..2]);
        let code = NetworkEndian::read_u16(&buf[2..4]);
        if err_type == OFPET_EXPERIMENTER {
            need(buf, 8, "experimenter error")?;
            Ok(Self {
                err_type,
                code,
                experimenter: Some(NetworkEndian::read_u32(&buf[4..8])),
                data: buf[8..].to_vec(),
            })
        } else {
            Ok(Self {
                err_type,
                code,
                experimenter: None,
                data: buf[4..].to_vec(),
            })
        }
    }
}

impl OfpPacket for ErrorMsg {
    fn msg_type(&self) -> OfpType {
        OfpType::Error
    }

    fn serialize_body(&self, out: &mut Vec<u8>) {
        put_u16(out, self.err_type);
        put_u16(out, self.code);
        if let Some(experimenter) = self.experimenter {
            put_u32(out, experimenter);
        }
        out.extend_from_slice(&self.data);
    }
}

impl fmt::Display for ErrorMsg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.experimenter {
            Some(exp) => write!(f, "experimenter error vendor={:#010x} code={}", exp, self.code),
            None => write!(f, "error type={} code={}", self.err_type, self.code),
        }
    }
}

/// Flow mod commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FlowModCommand {
    Add = 0,
    Modify = 1,
    ModifyStrict = 2,
    Delete = 3,
    DeleteStrict = 4,
}

impl FlowModCommand {
    fn from_code(code: u8) -> Result<Self> {
        Ok(match code {
            0 => Self::Add,
            1 => Self::Modify,
            2 => Self::ModifyStrict,
            3 => Self::Delete,
            4 => Self::DeleteStrict,
            other => {
                return Err(ProtoError::malformed(
                    "flow_mod",
                    format!("unknown command {}", other),
                ))
            }
        })
    }
}

/// OFPT_FLOW_MOD restricted to what this agent emits: permanent flows,
/// no cookies, `buffer_id`/`out_port`/`out_group` wildcarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowMod {
    /// Table the flow lives in; [`OFPTT_ALL`] for table-wide deletes.
    pub table_id: u8,
    /// What to do.
    pub command: FlowModCommand,
    /// Flow priority.
    pub priority: u16,
    /// Structured match key.
    pub match_field: Match,
    /// Raw encoded actions; wrapped in apply-actions on the wire.
    pub actions: Vec<u8>,
}

impl FlowMod {
    /// The catch-all delete over every table sent when resyncing.
    pub fn delete_all() -> Self {
        Self {
            table_id: OFPTT_ALL,
            command: FlowModCommand::Delete,
            priority: 0,
            match_field: Match::new(),
            actions: Vec::new(),
        }
    }

    /// Parses a flow mod body.
    pub fn parse(buf: &[u8]) -> Result<Self> {
        need(buf, 40, "flow_mod")?;
        let table_id = buf[16];
        let command = FlowModCommand::from_code(buf[17])?;
        let priority = NetworkEndian::read_u16(&buf[22..24]);
        let (match_field, used) = Match::parse(&buf[40..])?;
        let actions = parse_instructions(&buf[40 + used..])?;
        Ok(Self {
            table_id,
            command,
            priority,
            match_field,
            actions,
        })
    }
}

impl OfpPacket for FlowMod {
    fn msg_type(&self) -> OfpType {
        OfpType::FlowMod
    }

    fn serialize_body(&self, out: &mut Vec<u8>) {
        put_u64(out, 0); // cookie
        put_u64(out, 0); // cookie_mask
        out.push(self.table_id);
        out.push(self.command as u8);
        put_u16(out, 0); // idle_timeout: permanent
        put_u16(out, 0); // hard_timeout: permanent
        put_u16(out, self.priority);
        put_u32(out, OFP_NO_BUFFER);
        put_u32(out, OFPP_ANY);
        put_u32(out, crate::groups::OFPG_ANY);
        put_u16(out, 0); // flags
        pad(out, 2);
        self.match_field.serialize(out);
        serialize_instructions(&self.actions, out);
    }
}

/// An inbound message after classification.
///
/// Bodies the agent acts on are parsed; asynchronous switch events the
/// agent merely acknowledges or ignores are represented by their type
/// alone.
#[derive(Debug, Clone)]
pub enum OfpMessage {
    Hello { version: u8 },
    EchoRequest(Vec<u8>),
    EchoReply(Vec<u8>),
    Error(ErrorMsg),
    BarrierRequest,
    BarrierReply,
    FlowMod(FlowMod),
    GroupMod(GroupMod),
    TlvTableRequest,
    TlvTableMod(TlvTableMod),
    TlvTableReply(TlvTableReply),
    PacketIn,
    FlowRemoved,
    PortStatus,
    Other(OfpType),
}

impl OfpMessage {
    /// Decodes the body of a framed message.
    pub fn decode(header: &OfpHeader, body: &[u8]) -> Result<Self> {
        let msg_type = OfpType::from_code(header.msg_type)?;
        Ok(match msg_type {
            OfpType::Hello => Self::Hello {
                version: header.version,
            },
            OfpType::EchoRequest => Self::EchoRequest(body.to_vec()),
            OfpType::EchoReply => Self::EchoReply(body.to_vec()),
            OfpType::Error => Self::Error(ErrorMsg::parse(body)?),
            OfpType::BarrierRequest => Self::BarrierRequest,
            OfpType::BarrierReply => Self::BarrierReply,
            OfpType::FlowMod => Self::FlowMod(FlowMod::parse(body)?),
            OfpType::GroupMod => Self::GroupMod(GroupMod::parse_wire(body)?),
            OfpType::Experimenter => tlv::decode_experimenter(body)?,
            OfpType::PacketIn => Self::PacketIn,
            OfpType::FlowRemoved => Self::FlowRemoved,
            OfpType::PortStatus => Self::PortStatus,
            other => Self::Other(other),
        })
    }
}
