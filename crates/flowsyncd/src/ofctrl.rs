//! The OpenFlow control core: connection state machine and reconciler.
//!
//! `Ofctrl` owns the desired and installed flow tables and the transport.
//! Each tick the event loop calls [`Ofctrl::run`], which services the
//! connection, walks the negotiation state machine, and drains inbound
//! messages; then [`Ofctrl::put`], which diffs installed against desired
//! state and queues the minimal set of flow and group mods.
//!
//! The state machine negotiates a Geneve tunnel-metadata option slot on
//! every fresh connection:
//!
//! - `New`: send a TLV-table request, await the reply.
//! - `TlvTableRequested`: if the switch already maps our option, take its
//!   slot; else claim the lowest free slot with a TLV-table mod followed
//!   by a barrier; if no slot is free, disable Geneve.
//! - `TlvTableModSent`: a barrier reply accepts the claimed slot; an
//!   `ALREADY_MAPPED`/`DUP_ENTRY` error means another controller raced us,
//!   so start over.
//! - `ClearFlows`: wipe the switch (catch-all flow and group deletes) and
//!   the local mirrors of its state.
//! - `UpdateFlows`: terminal; reconciliation is allowed to run.
//!
//! A connection drop abandons in-flight transactions and restarts the
//! machine from `New`; the switch is assumed to have lost its tables.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use vnet_ofproto::{
    next_xid, BarrierRequest, EchoReply, ErrorMsg, FlowMod, FlowModCommand, GroupMod,
    GroupModCommand, Match, OfpHeader, OfpMessage, OfpPacket, TlvMap, TlvTableMod,
    TlvTableModCommand, TlvTableReply, TlvTableRequest, NXTTMFC_ALREADY_MAPPED,
    NXTTMFC_DUP_ENTRY, NX_VENDOR_ID, OFP_HEADER_LEN,
};

use crate::config::AgentConfig;
use crate::error::Result;
use crate::flow_table::FlowTable;
use crate::group_table::{GroupSet, GroupTable};
use crate::metrics::MetricsCollector;
use crate::ratelimit::RateLimiter;
use crate::rconn::{PacketCounter, Rconn};
use crate::types::Uuid;

/// The Geneve option triple this agent negotiates a slot for.
pub const GENEVE_OPTION_CLASS: u16 = 0x0102;
pub const GENEVE_OPTION_TYPE: u8 = 0x80;
pub const GENEVE_OPTION_LEN: u8 = 4;

/// Tunnel-metadata slots a switch offers.
pub const MAX_TUN_METADATA_SLOTS: u16 = 64;

/// Field id of tunnel-metadata slot 0. The negotiated field id is this
/// plus the slot index; 0 means Geneve is disabled.
pub const BASE_TUN_METADATA_FIELD: u16 = 40;

/// Upper bound on messages drained per tick, so one busy switch cannot
/// starve the rest of the agent.
const RECV_BATCH: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    New,
    TlvTableRequested,
    TlvTableModSent,
    ClearFlows,
    UpdateFlows,
}

/// The OpenFlow control core.
pub struct Ofctrl {
    rconn: Rconn,
    tx_counter: PacketCounter,
    state: State,
    /// Transaction id awaiting a reply, 0 when none.
    xid: u32,
    /// Barrier transaction id in flight alongside `xid`, 0 when none.
    xid2: u32,
    /// Last observed connection generation.
    seqno: u32,
    /// Negotiated tunnel-metadata field id, 0 while absent.
    tun_field: u16,
    desired: FlowTable,
    installed: FlowTable,
    /// Set at `ClearFlows`; the next `put` clears the caller's existing
    /// groups to mirror the emptied switch.
    pending_group_clear: bool,
    rundir: PathBuf,
    metrics: MetricsCollector,
    error_rl: RateLimiter,
    ignored_rl: RateLimiter,
    decode_rl: RateLimiter,
    group_parse_rl: RateLimiter,
}

impl Ofctrl {
    /// Creates the control core. Nothing connects until [`Ofctrl::run`]
    /// is handed a bridge.
    pub fn new(config: &AgentConfig) -> Result<Self> {
        Ok(Self {
            rconn: Rconn::new(config.probe_interval(), config.max_backoff()),
            tx_counter: PacketCounter::new(),
            state: State::New,
            xid: 0,
            xid2: 0,
            seqno: 0,
            tun_field: 0,
            desired: FlowTable::new(),
            installed: FlowTable::new(),
            pending_group_clear: false,
            rundir: config.rundir.clone(),
            metrics: MetricsCollector::new()?,
            error_rl: RateLimiter::for_openflow_messages(),
            ignored_rl: RateLimiter::for_openflow_messages(),
            decode_rl: RateLimiter::for_openflow_messages(),
            group_parse_rl: RateLimiter::for_producer_bugs(),
        })
    }

    /// Adds a flow to the desired table on behalf of `uuid`.
    ///
    /// Nothing reaches the switch until the next `run`/`put` cycle.
    pub fn add_flow(
        &mut self,
        table_id: u8,
        priority: u16,
        match_field: Match,
        actions: Vec<u8>,
        uuid: Uuid,
    ) {
        let outcome = self
            .desired
            .add_flow(table_id, priority, match_field, actions, uuid);
        if outcome.is_duplicate() {
            self.metrics.duplicate_flows_total.inc();
        }
    }

    /// Removes every desired flow owned by `uuid`.
    pub fn remove_flows(&mut self, uuid: &Uuid) -> usize {
        self.desired.remove_flows(uuid)
    }

    /// Replaces every desired flow owned by `uuid` with a single flow.
    pub fn set_flow(
        &mut self,
        table_id: u8,
        priority: u16,
        match_field: Match,
        actions: Vec<u8>,
        uuid: Uuid,
    ) {
        self.remove_flows(&uuid);
        self.add_flow(table_id, priority, match_field, actions, uuid);
    }

    /// Runs the state machine against the bridge named `bridge`.
    ///
    /// `Some(name)` aims the transport at `unix:<rundir>/<name>.mgmt`,
    /// reconnecting if the target changed; `None` disconnects. Returns the
    /// negotiated tunnel-metadata field id, or 0 while negotiation is
    /// incomplete or Geneve is disabled. Callers use 0 to suppress
    /// Geneve-dependent flows upstream.
    pub fn run(&mut self, bridge: Option<&str>) -> u16 {
        match bridge {
            Some(name) => {
                let target = format!("unix:{}/{}.mgmt", self.rundir.display(), name);
                if self.rconn.current_target() != Some(target.as_str()) {
                    info!(%target, "connecting to switch");
                    self.rconn.connect(&target);
                }
            }
            None => self.rconn.disconnect(),
        }

        self.rconn.run_once();

        let connected = self.rconn.is_connected();
        self.metrics
            .switch_connected
            .set(if connected { 1.0 } else { 0.0 });
        if !connected {
            return 0;
        }

        if self.seqno != self.rconn.connection_seqno() {
            // Fresh connection: abandon in-flight transactions and start
            // negotiation over.
            self.seqno = self.rconn.connection_seqno();
            self.state = State::New;
            self.xid = 0;
            self.xid2 = 0;
            self.metrics.reconnects_total.inc();
        }

        // Entry actions, to a fixpoint.
        loop {
            let old = self.state;
            self.run_state();
            if self.state == old {
                break;
            }
        }

        // Drain inbound messages until the state changes or the batch
        // bound is hit.
        let steady = self.state;
        for _ in 0..RECV_BATCH {
            if self.state != steady {
                break;
            }
            match self.rconn.recv() {
                Some(frame) => self.handle_frame(frame),
                None => break,
            }
        }

        match self.state {
            State::ClearFlows | State::UpdateFlows => self.tun_field,
            _ => 0,
        }
    }

    /// How long the event loop may sleep before this core needs another
    /// tick.
    pub fn wait(&self) -> Option<Duration> {
        self.rconn.timeout_hint()
    }

    /// Reconciles the switch with the desired flow and group state.
    ///
    /// Runs only in `UpdateFlows` with no messages outstanding; otherwise
    /// it still consumes `desired` groups and emits nothing. Message order
    /// within one call is: group adds, flow deletes, flow modifies, flow
    /// adds, group deletes.
    pub fn put(&mut self, groups: &mut GroupTable) {
        if self.pending_group_clear {
            groups.clear(GroupSet::Existing);
            self.pending_group_clear = false;
        }

        if self.state != State::UpdateFlows || self.tx_counter.count() != 0 {
            if self.state == State::UpdateFlows {
                self.metrics.backpressure_deferrals_total.inc();
            }
            groups.clear(GroupSet::Desired);
            return;
        }

        let started = Instant::now();

        // New groups first, so flows can reference them the moment they
        // are installed.
        let mut desired_ids = groups.desired_ids();
        desired_ids.sort_unstable();
        for id in desired_ids {
            if groups.lookup(GroupSet::Existing, id).is_some() {
                continue;
            }
            let Some(spec) = groups.lookup(GroupSet::Desired, id) else {
                continue;
            };
            let full_spec = format!("group_id={},{}", id, spec);
            match GroupMod::parse(GroupModCommand::Add, &full_spec) {
                Ok(gm) => {
                    self.queue_msg(&gm);
                    self.metrics.group_adds_total.inc();
                }
                Err(e) => {
                    if self.group_parse_rl.should_log() {
                        error!(error = %e, "cannot install new group");
                    }
                }
            }
        }

        // Installed flows nobody wants anymore.
        for idx in self.installed.slot_indices() {
            let stale = match self.installed.get(idx) {
                Some(flow) => self.desired.select_min_uuid(&flow.key).is_none(),
                None => false,
            };
            if !stale {
                continue;
            }
            if let Some(flow) = self.installed.remove_slot(idx) {
                debug!(flow = %flow, "removing installed");
                let fm = FlowMod {
                    table_id: flow.key.table_id,
                    command: FlowModCommand::DeleteStrict,
                    priority: flow.key.priority,
                    match_field: flow.key.match_field,
                    actions: Vec::new(),
                };
                self.queue_msg(&fm);
                self.metrics.flow_deletes_total.inc();
            }
        }

        // Surviving installed flows: adopt the winning desired flow's
        // owner, then its actions if they differ. The owner change needs
        // no wire message; the switch knows nothing of uuids.
        for idx in self.installed.slot_indices() {
            let Some(flow) = self.installed.get(idx) else {
                continue;
            };
            let Some(didx) = self.desired.select_min_uuid(&flow.key) else {
                continue;
            };
            let key = flow.key.clone();
            let installed_uuid = flow.uuid;
            let desc = flow.to_string();
            let (desired_uuid, new_actions) = match self.desired.get(didx) {
                Some(d) => (
                    d.uuid,
                    (d.actions != flow.actions).then(|| d.actions.clone()),
                ),
                None => continue,
            };

            if installed_uuid != desired_uuid {
                self.installed.set_uuid(idx, desired_uuid);
            }
            if let Some(actions) = new_actions {
                debug!(flow = %desc, "updating installed");
                let fm = FlowMod {
                    table_id: key.table_id,
                    command: FlowModCommand::ModifyStrict,
                    priority: key.priority,
                    match_field: key.match_field,
                    actions: actions.clone(),
                };
                self.queue_msg(&fm);
                self.metrics.flow_modifies_total.inc();
                self.installed.replace_actions(idx, actions);
            }
        }

        // Desired keys with nothing installed yet.
        for key in self.desired.distinct_keys() {
            if !self.installed.lookup(&key).is_empty() {
                continue;
            }
            let Some(didx) = self.desired.select_min_uuid(&key) else {
                continue;
            };
            let Some(flow) = self.desired.get(didx).cloned() else {
                continue;
            };
            debug!(flow = %flow, "adding installed");
            let fm = FlowMod {
                table_id: key.table_id,
                command: FlowModCommand::Add,
                priority: key.priority,
                match_field: key.match_field,
                actions: flow.actions.clone(),
            };
            self.queue_msg(&fm);
            self.metrics.flow_adds_total.inc();
            self.installed.insert(flow);
        }

        // Stale groups last, after the flows that referenced them are
        // gone. Then promote this pass's desired groups to existing.
        let mut existing_ids = groups.existing_ids();
        existing_ids.sort_unstable();
        for id in existing_ids {
            if groups.lookup(GroupSet::Desired, id).is_some() {
                continue;
            }
            let spec = format!("group_id={}", id);
            match GroupMod::parse(GroupModCommand::Delete, &spec) {
                Ok(gm) => {
                    self.queue_msg(&gm);
                    self.metrics.group_deletes_total.inc();
                }
                Err(e) => {
                    if self.group_parse_rl.should_log() {
                        error!(group_id = id, error = %e, "cannot delete group");
                    }
                }
            }
            groups.remove_existing(id);
        }
        groups.promote_desired();

        self.metrics.desired_flows.set(self.desired.len() as f64);
        self.metrics.installed_flows.set(self.installed.len() as f64);
        self.metrics
            .reconcile_seconds
            .observe(started.elapsed().as_secs_f64());
    }

    /// The counter charged for every message this core queues.
    pub fn tx_counter(&self) -> PacketCounter {
        self.tx_counter.clone()
    }

    /// The metrics registry backing this core.
    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    /// Current desired flow count.
    pub fn desired_flow_count(&self) -> usize {
        self.desired.len()
    }

    /// Current installed flow count.
    pub fn installed_flow_count(&self) -> usize {
        self.installed.len()
    }

    fn queue_msg(&mut self, msg: &dyn OfpPacket) -> u32 {
        let xid = next_xid();
        let counter = self.tx_counter.clone();
        match self.rconn.send(msg.marshal(xid), &counter) {
            Ok(()) => self.metrics.messages_sent_total.inc(),
            Err(e) => debug!(error = %e, "dropping outbound message"),
        }
        xid
    }

    /// State entry actions.
    fn run_state(&mut self) {
        match self.state {
            State::New => {
                self.xid = self.queue_msg(&TlvTableRequest);
                self.xid2 = 0;
                self.state = State::TlvTableRequested;
            }
            State::ClearFlows => {
                debug!("clearing all flows");
                self.queue_msg(&FlowMod::delete_all());
                self.queue_msg(&GroupMod::delete_all());
                // Mirror the now-empty switch.
                self.installed.clear();
                self.pending_group_clear = true;
                self.state = State::UpdateFlows;
            }
            State::TlvTableRequested | State::TlvTableModSent | State::UpdateFlows => {}
        }
    }

    fn handle_frame(&mut self, frame: Vec<u8>) {
        let header = match OfpHeader::parse(&frame) {
            Ok(header) => header,
            Err(e) => {
                self.metrics.decode_failures_total.inc();
                if self.decode_rl.should_log() {
                    warn!(error = %e, "could not decode OpenFlow message");
                }
                return;
            }
        };
        let msg = match OfpMessage::decode(&header, &frame[OFP_HEADER_LEN..]) {
            Ok(msg) => msg,
            Err(e) => {
                self.metrics.decode_failures_total.inc();
                if self.decode_rl.should_log() {
                    warn!(xid = header.xid, error = %e, "could not decode OpenFlow message");
                }
                // A reply to an in-flight negotiation transaction that we
                // cannot decode fails the negotiation rather than hanging
                // it.
                if matches!(self.state, State::TlvTableRequested | State::TlvTableModSent)
                    && ((self.xid != 0 && header.xid == self.xid)
                        || (self.xid2 != 0 && header.xid == self.xid2))
                {
                    error!(xid = header.xid, "malformed reply to Geneve option negotiation");
                    self.fail_negotiation();
                }
                return;
            }
        };

        match self.state {
            // Entry actions always move past `New` before the drain loop,
            // so anything arriving here belongs to another subsystem.
            State::New | State::ClearFlows | State::UpdateFlows => self.common_recv(&header, msg),
            State::TlvTableRequested => self.recv_tlv_table_requested(&header, msg),
            State::TlvTableModSent => self.recv_tlv_table_mod_sent(&header, msg),
        }
    }

    fn recv_tlv_table_requested(&mut self, header: &OfpHeader, msg: OfpMessage) {
        if header.xid != self.xid {
            return self.common_recv(header, msg);
        }
        match msg {
            OfpMessage::TlvTableReply(reply) => self.handle_tlv_table_reply(reply),
            OfpMessage::Error(err) => {
                error!(%err, "switch refused to allocate Geneve option");
                self.fail_negotiation();
            }
            other => {
                error!(message = ?other, "unexpected reply to TLV table request");
                self.fail_negotiation();
            }
        }
    }

    fn handle_tlv_table_reply(&mut self, reply: TlvTableReply) {
        let mut free_slots = u64::MAX;
        for map in &reply.mappings {
            if map.option_class == GENEVE_OPTION_CLASS
                && map.option_type == GENEVE_OPTION_TYPE
                && map.option_len == GENEVE_OPTION_LEN
            {
                if map.index >= MAX_TUN_METADATA_SLOTS {
                    error!(
                        class = map.option_class,
                        index = map.index,
                        "Geneve option already mapped at unsupported index"
                    );
                    return self.fail_negotiation();
                }
                self.tun_field = BASE_TUN_METADATA_FIELD + map.index;
                self.state = State::ClearFlows;
                return;
            }
            if map.index < MAX_TUN_METADATA_SLOTS {
                free_slots &= !(1u64 << map.index);
            }
        }

        debug!("Geneve option not found in switch TLV table");
        if free_slots == 0 {
            error!("no Geneve options free for our use");
            return self.fail_negotiation();
        }

        let index = free_slots.trailing_zeros() as u16;
        self.tun_field = BASE_TUN_METADATA_FIELD + index;
        let ttm = TlvTableMod {
            command: TlvTableModCommand::Add,
            mappings: vec![TlvMap {
                option_class: GENEVE_OPTION_CLASS,
                option_type: GENEVE_OPTION_TYPE,
                option_len: GENEVE_OPTION_LEN,
                index,
            }],
        };
        self.xid = self.queue_msg(&ttm);
        self.xid2 = self.queue_msg(&BarrierRequest);
        self.state = State::TlvTableModSent;
    }

    fn recv_tlv_table_mod_sent(&mut self, header: &OfpHeader, msg: OfpMessage) {
        if header.xid != self.xid && header.xid != self.xid2 {
            return self.common_recv(header, msg);
        }
        match msg {
            OfpMessage::BarrierReply if header.xid == self.xid2 => {
                // Our claimed slot survived the barrier; keep tun_field as
                // requested.
                self.state = State::ClearFlows;
            }
            OfpMessage::Error(err) if header.xid == self.xid => {
                if is_tlv_race(&err) {
                    info!(%err, "raced with another controller adding Geneve option; trying again");
                    self.state = State::New;
                } else {
                    error!(%err, "error adding Geneve option");
                    self.fail_negotiation();
                }
            }
            other => {
                error!(message = ?other, "unexpected reply to Geneve option allocation");
                self.fail_negotiation();
            }
        }
    }

    fn fail_negotiation(&mut self) {
        self.tun_field = 0;
        self.state = State::ClearFlows;
    }

    /// Handles messages not tied to an in-flight negotiation transaction:
    /// echo requests are answered, errors logged, asynchronous switch
    /// events dropped.
    fn common_recv(&mut self, header: &OfpHeader, msg: OfpMessage) {
        match msg {
            OfpMessage::EchoRequest(payload) => {
                let counter = self.tx_counter.clone();
                let reply = EchoReply(payload).marshal(header.xid);
                match self.rconn.send(reply, &counter) {
                    Ok(()) => self.metrics.messages_sent_total.inc(),
                    Err(e) => debug!(error = %e, "dropping echo reply"),
                }
            }
            OfpMessage::Error(err) => {
                if self.error_rl.should_log() {
                    info!(%err, "OpenFlow error");
                }
            }
            OfpMessage::EchoReply(_)
            | OfpMessage::BarrierReply
            | OfpMessage::PacketIn
            | OfpMessage::PortStatus
            | OfpMessage::FlowRemoved => {}
            _ => {
                if self.ignored_rl.should_log() {
                    debug!(xid = header.xid, "OpenFlow packet ignored");
                }
            }
        }
    }
}

fn is_tlv_race(err: &ErrorMsg) -> bool {
    err.experimenter == Some(NX_VENDOR_ID)
        && (err.code == NXTTMFC_ALREADY_MAPPED || err.code == NXTTMFC_DUP_ENTRY)
}

#[cfg(test)]
mod tests {
    use super::*;
    use vnet_ofproto::ActionList;

    fn ofctrl() -> Ofctrl {
        Ofctrl::new(&AgentConfig::for_bridge("br-int")).unwrap()
    }

    fn mapping(class: u16, typ: u8, len: u8, index: u16) -> TlvMap {
        TlvMap {
            option_class: class,
            option_type: typ,
            option_len: len,
            index,
        }
    }

    #[test]
    fn test_tlv_reply_with_our_mapping() {
        let mut ctrl = ofctrl();
        ctrl.state = State::TlvTableRequested;
        ctrl.handle_tlv_table_reply(TlvTableReply {
            max_option_space: 256,
            max_fields: 64,
            mappings: vec![mapping(
                GENEVE_OPTION_CLASS,
                GENEVE_OPTION_TYPE,
                GENEVE_OPTION_LEN,
                5,
            )],
        });
        assert_eq!(ctrl.state, State::ClearFlows);
        assert_eq!(ctrl.tun_field, BASE_TUN_METADATA_FIELD + 5);
    }

    #[test]
    fn test_tlv_reply_picks_lowest_free_slot() {
        let mut ctrl = ofctrl();
        ctrl.state = State::TlvTableRequested;
        ctrl.handle_tlv_table_reply(TlvTableReply {
            max_option_space: 256,
            max_fields: 64,
            mappings: vec![
                mapping(0xffff, 1, 8, 0),
                mapping(0xffff, 2, 8, 2),
            ],
        });
        // Slots 0 and 2 are taken by foreign options; we claim slot 1.
        assert_eq!(ctrl.state, State::TlvTableModSent);
        assert_eq!(ctrl.tun_field, BASE_TUN_METADATA_FIELD + 1);
    }

    #[test]
    fn test_tlv_reply_no_free_slots_disables_geneve() {
        let mut ctrl = ofctrl();
        ctrl.state = State::TlvTableRequested;
        let mappings = (0..64u16).map(|i| mapping(0xffff, 1, 8, i)).collect();
        ctrl.handle_tlv_table_reply(TlvTableReply {
            max_option_space: 256,
            max_fields: 64,
            mappings,
        });
        assert_eq!(ctrl.state, State::ClearFlows);
        assert_eq!(ctrl.tun_field, 0);
    }

    #[test]
    fn test_our_mapping_at_bad_index_disables_geneve() {
        let mut ctrl = ofctrl();
        ctrl.state = State::TlvTableRequested;
        ctrl.handle_tlv_table_reply(TlvTableReply {
            max_option_space: 256,
            max_fields: 64,
            mappings: vec![mapping(
                GENEVE_OPTION_CLASS,
                GENEVE_OPTION_TYPE,
                GENEVE_OPTION_LEN,
                64,
            )],
        });
        assert_eq!(ctrl.state, State::ClearFlows);
        assert_eq!(ctrl.tun_field, 0);
    }

    #[test]
    fn test_race_error_restarts_negotiation() {
        let mut ctrl = ofctrl();
        ctrl.state = State::TlvTableModSent;
        ctrl.xid = 77;
        ctrl.xid2 = 78;
        let err = ErrorMsg::experimenter(NX_VENDOR_ID, NXTTMFC_ALREADY_MAPPED);
        let frame = err.marshal(77);
        ctrl.handle_frame(frame);
        assert_eq!(ctrl.state, State::New);
    }

    #[test]
    fn test_other_mod_error_disables_geneve() {
        let mut ctrl = ofctrl();
        ctrl.state = State::TlvTableModSent;
        ctrl.xid = 77;
        ctrl.xid2 = 78;
        ctrl.tun_field = BASE_TUN_METADATA_FIELD;
        let frame = ErrorMsg::new(1, 1).marshal(77);
        ctrl.handle_frame(frame);
        assert_eq!(ctrl.state, State::ClearFlows);
        assert_eq!(ctrl.tun_field, 0);
    }

    #[test]
    fn test_barrier_reply_accepts_claimed_slot() {
        let mut ctrl = ofctrl();
        ctrl.state = State::TlvTableModSent;
        ctrl.xid = 77;
        ctrl.xid2 = 78;
        ctrl.tun_field = BASE_TUN_METADATA_FIELD + 3;
        let frame = vnet_ofproto::BarrierReply.marshal(78);
        ctrl.handle_frame(frame);
        assert_eq!(ctrl.state, State::ClearFlows);
        assert_eq!(ctrl.tun_field, BASE_TUN_METADATA_FIELD + 3);
    }

    #[test]
    fn test_unrelated_xid_routes_to_common_handler() {
        let mut ctrl = ofctrl();
        ctrl.state = State::TlvTableModSent;
        ctrl.xid = 77;
        ctrl.xid2 = 78;
        // An error with a foreign xid (say, to one of our flow mods) must
        // not disturb the negotiation.
        let frame = ErrorMsg::new(1, 1).marshal(99);
        ctrl.handle_frame(frame);
        assert_eq!(ctrl.state, State::TlvTableModSent);
    }

    #[test]
    fn test_undecodable_negotiation_reply_disables_geneve() {
        let mut ctrl = ofctrl();
        ctrl.state = State::TlvTableRequested;
        ctrl.xid = 77;
        ctrl.tun_field = BASE_TUN_METADATA_FIELD;
        // An unknown message type carrying our in-flight xid.
        let frame = vec![4, 99, 0, 8, 0, 0, 0, 77];
        ctrl.handle_frame(frame);
        assert_eq!(ctrl.state, State::ClearFlows);
        assert_eq!(ctrl.tun_field, 0);

        // The same garbage with a foreign xid is merely dropped.
        let mut ctrl = ofctrl();
        ctrl.state = State::TlvTableRequested;
        ctrl.xid = 77;
        ctrl.handle_frame(vec![4, 99, 0, 8, 0, 0, 0, 5]);
        assert_eq!(ctrl.state, State::TlvTableRequested);
    }

    #[test]
    fn test_put_drains_desired_groups_when_not_ready() {
        let mut ctrl = ofctrl();
        let mut groups = GroupTable::new();
        groups.insert_desired(1, "type=all,bucket=output:1");

        // Not in UpdateFlows: nothing may be emitted, but the desired set
        // must still be consumed.
        ctrl.put(&mut groups);
        assert_eq!(groups.desired_len(), 0);
        assert_eq!(groups.existing_len(), 0);
    }

    #[test]
    fn test_duplicate_add_counts_once() {
        let mut ctrl = ofctrl();
        let m = Match::new();
        let actions = ActionList::new().output(2).build();
        ctrl.add_flow(0, 10, m.clone(), actions.clone(), Uuid::from_u128(1));
        ctrl.add_flow(0, 10, m, actions, Uuid::from_u128(1));
        assert_eq!(ctrl.desired_flow_count(), 1);
        assert_eq!(ctrl.metrics().duplicate_flows_total.get(), 1);
    }
}
