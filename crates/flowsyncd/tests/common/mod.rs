//! Test harness: a fake switch speaking OpenFlow 1.3 over a Unix socket.
//!
//! The harness binds the management socket the agent dials, completes the
//! hello handshake, answers negotiation messages according to its
//! configuration, and records everything else for assertions.

#![allow(dead_code)] // each integration test binary uses a subset

use std::io::{ErrorKind, Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::time::Duration;

use tempfile::TempDir;

use vnet_flowsyncd::{AgentConfig, GroupTable, Ofctrl};
use vnet_ofproto::{
    BarrierReply, EchoReply, ErrorMsg, FlowModCommand, GroupModCommand, Hello, OfpHeader,
    OfpMessage, OfpPacket, TlvMap, TlvTableReply, NX_VENDOR_ID, OFPTT_ALL, OFP_HEADER_LEN,
};

pub const BRIDGE: &str = "br-int";

/// Classification of messages the switch received, for order assertions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    TlvRequest,
    TlvMod,
    Barrier,
    FlowAdd,
    FlowModify,
    FlowDelete,
    FlowDeleteAll,
    GroupAdd,
    GroupDelete,
    GroupDeleteAll,
    Echo,
    Other,
}

pub fn kind(msg: &OfpMessage) -> Kind {
    match msg {
        OfpMessage::TlvTableRequest => Kind::TlvRequest,
        OfpMessage::TlvTableMod(_) => Kind::TlvMod,
        OfpMessage::BarrierRequest => Kind::Barrier,
        OfpMessage::EchoRequest(_) | OfpMessage::EchoReply(_) => Kind::Echo,
        OfpMessage::FlowMod(fm) => match fm.command {
            FlowModCommand::Add => Kind::FlowAdd,
            FlowModCommand::Modify | FlowModCommand::ModifyStrict => Kind::FlowModify,
            FlowModCommand::Delete if fm.table_id == OFPTT_ALL => Kind::FlowDeleteAll,
            FlowModCommand::Delete | FlowModCommand::DeleteStrict => Kind::FlowDelete,
        },
        OfpMessage::GroupMod(gm) => match gm.command {
            GroupModCommand::Add | GroupModCommand::Modify => Kind::GroupAdd,
            GroupModCommand::Delete if gm.group_id == vnet_ofproto::OFPG_ALL => {
                Kind::GroupDeleteAll
            }
            GroupModCommand::Delete => Kind::GroupDelete,
        },
        _ => Kind::Other,
    }
}

pub struct FakeSwitch {
    listener: UnixListener,
    conn: Option<UnixStream>,
    inbuf: Vec<u8>,
    /// Every decoded non-hello message, oldest first.
    pub received: Vec<(OfpHeader, OfpMessage)>,
    /// Mappings reported in TLV table replies.
    pub tlv_mappings: Vec<TlvMap>,
    /// When set, TLV table mods fail with this experimenter error code.
    pub fail_tlv_mod: Option<u16>,
}

impl FakeSwitch {
    pub fn new(dir: &TempDir) -> Self {
        let path = dir.path().join(format!("{}.mgmt", BRIDGE));
        let listener = UnixListener::bind(&path).expect("bind fake switch socket");
        listener.set_nonblocking(true).expect("nonblocking listener");
        Self {
            listener,
            conn: None,
            inbuf: Vec::new(),
            received: Vec::new(),
            tlv_mappings: Vec::new(),
            fail_tlv_mod: None,
        }
    }

    /// Accepts, reads, and answers whatever the agent sent.
    pub fn process(&mut self) {
        if self.conn.is_none() {
            match self.listener.accept() {
                Ok((stream, _)) => {
                    stream.set_nonblocking(true).expect("nonblocking conn");
                    self.conn = Some(stream);
                    self.inbuf.clear();
                    self.send(Hello.marshal(1));
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return,
                Err(e) => panic!("fake switch accept failed: {}", e),
            }
        }

        let mut chunk = [0u8; 4096];
        loop {
            let Some(conn) = self.conn.as_mut() else { return };
            match conn.read(&mut chunk) {
                Ok(0) => {
                    self.conn = None;
                    return;
                }
                Ok(n) => self.inbuf.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => panic!("fake switch read failed: {}", e),
            }
        }

        while let Some(frame) = self.pop_frame() {
            let header = OfpHeader::parse(&frame).expect("agent sent unparsable header");
            let msg = OfpMessage::decode(&header, &frame[OFP_HEADER_LEN..])
                .expect("agent sent undecodable message");
            self.react(&header, &msg);
            if !matches!(msg, OfpMessage::Hello { .. }) {
                self.received.push((header, msg));
            }
        }
    }

    /// Drops the connection, as if the switch restarted.
    pub fn drop_connection(&mut self) {
        self.conn = None;
        self.inbuf.clear();
    }

    /// Takes every recorded message, clearing the log.
    pub fn take_received(&mut self) -> Vec<(OfpHeader, OfpMessage)> {
        std::mem::take(&mut self.received)
    }

    /// Kinds of every recorded message, clearing the log.
    pub fn take_kinds(&mut self) -> Vec<Kind> {
        self.take_received()
            .iter()
            .map(|(_, msg)| kind(msg))
            .collect()
    }

    pub fn send(&mut self, buf: Vec<u8>) {
        let Some(conn) = self.conn.as_mut() else { return };
        let mut written = 0;
        while written < buf.len() {
            match conn.write(&buf[written..]) {
                Ok(n) => written += n,
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    std::thread::sleep(Duration::from_millis(1));
                }
                Err(e) => panic!("fake switch write failed: {}", e),
            }
        }
    }

    fn pop_frame(&mut self) -> Option<Vec<u8>> {
        if self.inbuf.len() < OFP_HEADER_LEN {
            return None;
        }
        let length = u16::from_be_bytes([self.inbuf[2], self.inbuf[3]]) as usize;
        assert!(length >= OFP_HEADER_LEN, "agent sent malformed frame");
        if self.inbuf.len() < length {
            return None;
        }
        Some(self.inbuf.drain(..length).collect())
    }

    fn react(&mut self, header: &OfpHeader, msg: &OfpMessage) {
        match msg {
            OfpMessage::EchoRequest(payload) => {
                self.send(EchoReply(payload.clone()).marshal(header.xid));
            }
            OfpMessage::TlvTableRequest => {
                let reply = TlvTableReply {
                    max_option_space: 256,
                    max_fields: 64,
                    mappings: self.tlv_mappings.clone(),
                };
                self.send(reply.marshal(header.xid));
            }
            OfpMessage::TlvTableMod(ttm) => {
                if let Some(code) = self.fail_tlv_mod {
                    self.send(ErrorMsg::experimenter(NX_VENDOR_ID, code).marshal(header.xid));
                } else {
                    self.tlv_mappings.extend(ttm.mappings.iter().copied());
                }
            }
            OfpMessage::BarrierRequest => {
                self.send(BarrierReply.marshal(header.xid));
            }
            _ => {}
        }
    }
}

/// Builds an agent whose runtime directory is the fixture's tempdir.
pub fn agent(dir: &TempDir) -> Ofctrl {
    let mut config = AgentConfig::for_bridge(BRIDGE);
    config.rundir = dir.path().to_path_buf();
    Ofctrl::new(&config).expect("construct agent")
}

/// One run cycle: agent tick, then switch servicing.
pub fn tick(ctrl: &mut Ofctrl, switch: &mut FakeSwitch) -> u16 {
    let field = ctrl.run(Some(BRIDGE));
    switch.process();
    field
}

/// Drives negotiation until the state machine reports a stable field id
/// (which may be 0 when Geneve is disabled) and the resync messages have
/// reached the switch.
pub fn settle(ctrl: &mut Ofctrl, switch: &mut FakeSwitch) -> u16 {
    let mut field = 0;
    for _ in 0..20 {
        field = tick(ctrl, switch);
        let clear_seen = switch
            .received
            .iter()
            .any(|(_, msg)| kind(msg) == Kind::FlowDeleteAll);
        if clear_seen {
            // One extra cycle flushes anything queued behind the clear.
            tick(ctrl, switch);
            return field;
        }
    }
    panic!("negotiation never settled; field={}", field);
}

/// A full converge cycle once negotiation is done: run, put, and a final
/// run to flush whatever put queued.
pub fn converge(ctrl: &mut Ofctrl, switch: &mut FakeSwitch, groups: &mut GroupTable) {
    ctrl.run(Some(BRIDGE));
    ctrl.put(groups);
    ctrl.run(Some(BRIDGE));
    switch.process();
}
