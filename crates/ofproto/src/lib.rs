//! OpenFlow 1.3 wire protocol for the vnet agent
//!
//! This crate implements the subset of OpenFlow 1.3 that `flowsyncd` speaks
//! to the local software switch: header framing, flow and group
//! modifications with OXM match encoding, barriers, echo keepalives, error
//! messages, and the vendor-extension tunnel-TLV table messages used to
//! negotiate a Geneve option slot.
//!
//! Messages are plain structs. Anything that goes on the wire implements
//! [`OfpPacket`], which frames the body with an [`OfpHeader`] carrying the
//! caller's transaction id. Inbound frames are decoded with
//! [`OfpMessage::decode`], which classifies the message and parses the
//! bodies the agent cares about.
//!
//! ```
//! use vnet_ofproto::{FlowMod, FlowModCommand, Match, OfpPacket, OxmTlv};
//!
//! let fm = FlowMod {
//!     table_id: 7,
//!     command: FlowModCommand::Add,
//!     priority: 100,
//!     match_field: Match::new().with_field(OxmTlv::in_port(3)),
//!     actions: vnet_ofproto::ActionList::new().output(4).build(),
//! };
//! let frame = fm.marshal(vnet_ofproto::next_xid());
//! assert_eq!(frame[0], vnet_ofproto::OFP13_VERSION);
//! ```

pub mod actions;
pub mod error;
pub mod groups;
pub mod header;
pub mod messages;
pub mod oxm;
pub mod tlv;

mod wire;

pub use actions::{ActionList, OFPP_ANY, OFPP_CONTROLLER, OFP_NO_BUFFER};
pub use error::{ProtoError, Result};
pub use groups::{Bucket, GroupMod, GroupModCommand, GroupType, OFPG_ALL, OFPG_ANY};
pub use header::{next_xid, OfpHeader, OfpType, OFP13_VERSION, OFP_HEADER_LEN};
pub use messages::{
    BarrierReply, BarrierRequest, EchoReply, EchoRequest, ErrorMsg, FlowMod, FlowModCommand, Hello,
    OfpMessage, OfpPacket, OFPET_EXPERIMENTER, OFPTT_ALL,
};
pub use oxm::{Match, OxmTlv};
pub use tlv::{
    TlvMap, TlvTableMod, TlvTableModCommand, TlvTableReply, TlvTableRequest,
    NXTTMFC_ALREADY_MAPPED, NXTTMFC_DUP_ENTRY, NX_VENDOR_ID,
};
