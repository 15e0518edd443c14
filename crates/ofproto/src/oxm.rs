//! OXM match encoding.
//!
//! A [`Match`] is an ordered list of OXM TLVs. The agent treats matches as
//! structured keys: two matches are equal when their TLVs are equal in
//! order, and the hash derives from the same view. Field values live in
//! each TLV's `body`, with the mask appended when `hasmask` is set.

use byteorder::{ByteOrder, NetworkEndian};
use std::fmt;

use crate::error::{ProtoError, Result};
use crate::wire::{need, pad, put_u16};

/// The ONF-assigned class for standard OpenFlow basic fields.
pub const OXM_CLASS_BASIC: u16 = 0x8000;

/// The Nicira extension class carrying registers and tunnel metadata.
pub const OXM_CLASS_NXM1: u16 = 0x0001;

/// Field number of tunnel-metadata slot 0 within [`OXM_CLASS_NXM1`].
pub const NXM_TUN_METADATA_BASE: u8 = 40;

const OFPXMT_IN_PORT: u8 = 0;
const OFPXMT_METADATA: u8 = 2;
const OFPXMT_ETH_DST: u8 = 3;
const OFPXMT_ETH_SRC: u8 = 4;
const OFPXMT_ETH_TYPE: u8 = 5;
const OFPXMT_TUNNEL_ID: u8 = 38;

/// OXM match type code for the OpenFlow 1.3 `ofp_match` preamble.
const OFPMT_OXM: u16 = 1;

/// A single OXM field-value(-mask) entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OxmTlv {
    /// OXM class.
    pub class: u16,
    /// Field number within the class (7 bits on the wire).
    pub field: u8,
    /// Whether `body` carries a trailing mask of equal length.
    pub hasmask: bool,
    /// Value bytes, with the mask appended when `hasmask` is set.
    pub body: Vec<u8>,
}

impl OxmTlv {
    /// Builds an arbitrary TLV.
    pub fn new(class: u16, field: u8, hasmask: bool, body: Vec<u8>) -> Self {
        Self {
            class,
            field,
            hasmask,
            body,
        }
    }

    /// Match on the OpenFlow ingress port.
    pub fn in_port(port: u32) -> Self {
        Self::new(OXM_CLASS_BASIC, OFPXMT_IN_PORT, false, port.to_be_bytes().into())
    }

    /// Match on the Ethernet type.
    pub fn eth_type(eth_type: u16) -> Self {
        Self::new(
            OXM_CLASS_BASIC,
            OFPXMT_ETH_TYPE,
            false,
            eth_type.to_be_bytes().into(),
        )
    }

    /// Match on the destination MAC address.
    pub fn eth_dst(mac: [u8; 6]) -> Self {
        Self::new(OXM_CLASS_BASIC, OFPXMT_ETH_DST, false, mac.into())
    }

    /// Match on the source MAC address.
    pub fn eth_src(mac: [u8; 6]) -> Self {
        Self::new(OXM_CLASS_BASIC, OFPXMT_ETH_SRC, false, mac.into())
    }

    /// Match on the table metadata register.
    pub fn metadata(value: u64) -> Self {
        Self::new(
            OXM_CLASS_BASIC,
            OFPXMT_METADATA,
            false,
            value.to_be_bytes().into(),
        )
    }

    /// Match on the tunnel id (VNI).
    pub fn tunnel_id(value: u64) -> Self {
        Self::new(
            OXM_CLASS_BASIC,
            OFPXMT_TUNNEL_ID,
            false,
            value.to_be_bytes().into(),
        )
    }

    /// Match on extension register `idx` (exact value).
    pub fn reg(idx: u8, value: u32) -> Self {
        Self::new(OXM_CLASS_NXM1, idx, false, value.to_be_bytes().into())
    }

    /// Match on extension register `idx` under `mask`.
    pub fn reg_masked(idx: u8, value: u32, mask: u32) -> Self {
        let mut body = Vec::with_capacity(8);
        body.extend_from_slice(&value.to_be_bytes());
        body.extend_from_slice(&mask.to_be_bytes());
        Self::new(OXM_CLASS_NXM1, idx, true, body)
    }

    /// Match on tunnel-metadata slot `index`.
    pub fn tun_metadata(index: u8, value: &[u8]) -> Self {
        Self::new(
            OXM_CLASS_NXM1,
            NXM_TUN_METADATA_BASE + index,
            false,
            value.to_vec(),
        )
    }

    /// Size of this TLV on the wire.
    pub fn wire_len(&self) -> usize {
        4 + self.body.len()
    }

    /// Serializes this TLV.
    pub fn serialize(&self, out: &mut Vec<u8>) {
        let header = ((self.class as u32) << 16)
            | ((self.field as u32) << 9)
            | ((self.hasmask as u32) << 8)
            | self.body.len() as u32;
        out.extend_from_slice(&header.to_be_bytes());
        out.extend_from_slice(&self.body);
    }

    /// Parses one TLV from the front of `buf`, returning it and the bytes
    /// consumed.
    pub fn parse(buf: &[u8]) -> Result<(Self, usize)> {
        need(buf, 4, "OXM TLV header")?;
        let header = NetworkEndian::read_u32(&buf[0..4]);
        let len = (header & 0xff) as usize;
        need(&buf[4..], len, "OXM TLV body")?;
        Ok((
            Self {
                class: (header >> 16) as u16,
                field: ((header >> 9) & 0x7f) as u8,
                hasmask: (header >> 8) & 1 == 1,
                body: buf[4..4 + len].to_vec(),
            },
            4 + len,
        ))
    }
}

/// A structured match key: zero or more OXM TLVs in insertion order.
///
/// The empty match is the catch-all.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Match {
    fields: Vec<OxmTlv>,
}

impl Match {
    /// The catch-all match.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a field, builder style.
    pub fn with_field(mut self, tlv: OxmTlv) -> Self {
        self.fields.push(tlv);
        self
    }

    /// Adds a field in place.
    pub fn push(&mut self, tlv: OxmTlv) {
        self.fields.push(tlv);
    }

    /// The match fields in insertion order.
    pub fn fields(&self) -> &[OxmTlv] {
        &self.fields
    }

    /// True when this match matches every packet.
    pub fn is_catchall(&self) -> bool {
        self.fields.is_empty()
    }

    fn oxm_len(&self) -> usize {
        4 + self.fields.iter().map(OxmTlv::wire_len).sum::<usize>()
    }

    /// Serializes the match including the trailing pad to 8 bytes.
    pub fn serialize(&self, out: &mut Vec<u8>) {
        let len = self.oxm_len();
        put_u16(out, OFPMT_OXM);
        put_u16(out, len as u16);
        for tlv in &self.fields {
            tlv.serialize(out);
        }
        pad(out, (len + 7) / 8 * 8 - len);
    }

    /// Parses a match from the front of `buf`, returning it and the bytes
    /// consumed including padding.
    pub fn parse(buf: &[u8]) -> Result<(Self, usize)> {
        need(buf, 4, "ofp_match")?;
        let typ = NetworkEndian::read_u16(&buf[0..2]);
        if typ != OFPMT_OXM {
            return Err(ProtoError::malformed(
                "ofp_match",
                format!("unsupported match type {}", typ),
            ));
        }
        let len = NetworkEndian::read_u16(&buf[2..4]) as usize;
        if len < 4 {
            return Err(ProtoError::BadLength {
                what: "ofp_match",
                len,
            });
        }
        need(buf, len, "ofp_match body")?;

        let mut fields = Vec::new();
        let mut offset = 4;
        while offset < len {
            let (tlv, used) = OxmTlv::parse(&buf[offset..len])?;
            fields.push(tlv);
            offset += used;
        }

        let padded = (len + 7) / 8 * 8;
        need(buf, padded, "ofp_match padding")?;
        Ok((Self { fields }, padded))
    }
}

impl fmt::Display for Match {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.fields.is_empty() {
            return write!(f, "*");
        }
        for (i, tlv) in self.fields.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            match (tlv.class, tlv.field) {
                (OXM_CLASS_BASIC, OFPXMT_IN_PORT) if tlv.body.len() == 4 => {
                    write!(f, "in_port={}", NetworkEndian::read_u32(&tlv.body))?
                }
                (OXM_CLASS_BASIC, OFPXMT_ETH_TYPE) if tlv.body.len() == 2 => {
                    write!(f, "eth_type={:#06x}", NetworkEndian::read_u16(&tlv.body))?
                }
                (OXM_CLASS_BASIC, OFPXMT_METADATA) if tlv.body.len() == 8 => {
                    write!(f, "metadata={:#x}", NetworkEndian::read_u64(&tlv.body))?
                }
                (OXM_CLASS_BASIC, OFPXMT_TUNNEL_ID) if tlv.body.len() == 8 => {
                    write!(f, "tun_id={:#x}", NetworkEndian::read_u64(&tlv.body))?
                }
                (OXM_CLASS_NXM1, idx) if idx < NXM_TUN_METADATA_BASE && tlv.body.len() == 4 => {
                    write!(f, "reg{}={:#x}", idx, NetworkEndian::read_u32(&tlv.body))?
                }
                (OXM_CLASS_NXM1, idx) if idx >= NXM_TUN_METADATA_BASE => {
                    write!(f, "tun_metadata{}=", idx - NXM_TUN_METADATA_BASE)?;
                    for byte in &tlv.body {
                        write!(f, "{:02x}", byte)?;
                    }
                }
                _ => {
                    write!(f, "oxm({:#06x},{})=", tlv.class, tlv.field)?;
                    for byte in &tlv.body {
                        write!(f, "{:02x}", byte)?;
                    }
                }
            }
        }
        Ok(())
    }
}
