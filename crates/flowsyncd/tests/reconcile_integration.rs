//! Integration tests for the reconciler: flow and group diffing against a
//! fake switch, tie-breaking, ordering, back-pressure, and resync after
//! reconnect.

mod common;

use common::{agent, converge, settle, tick, FakeSwitch, Kind, BRIDGE};
use std::time::Duration;
use tempfile::TempDir;
use vnet_flowsyncd::{GroupTable, Ofctrl, Uuid};
use vnet_ofproto::{ActionList, FlowModCommand, Match, OfpMessage, OxmTlv};

fn setup() -> (TempDir, Ofctrl, FakeSwitch, GroupTable) {
    let dir = tempfile::tempdir().unwrap();
    let mut switch = FakeSwitch::new(&dir);
    let mut ctrl = agent(&dir);
    settle(&mut ctrl, &mut switch);
    switch.take_received();
    (dir, ctrl, switch, GroupTable::new())
}

fn port_match(port: u32) -> Match {
    Match::new().with_field(OxmTlv::in_port(port))
}

fn flow_adds(received: &[(vnet_ofproto::OfpHeader, OfpMessage)]) -> Vec<&vnet_ofproto::FlowMod> {
    received
        .iter()
        .filter_map(|(_, msg)| match msg {
            OfpMessage::FlowMod(fm) if fm.command == FlowModCommand::Add => Some(fm),
            _ => None,
        })
        .collect()
}

#[test]
fn test_duplicate_add_installs_once() {
    let (_dir, mut ctrl, mut switch, mut groups) = setup();
    let actions = ActionList::new().output(2).build();

    // The producer forgot it already added this flow; the store keeps one
    // copy and the switch sees a single add.
    ctrl.add_flow(0, 100, port_match(1), actions.clone(), Uuid::from_u128(7));
    ctrl.add_flow(0, 100, port_match(1), actions, Uuid::from_u128(7));
    assert_eq!(ctrl.desired_flow_count(), 1);

    converge(&mut ctrl, &mut switch, &mut groups);
    let received = switch.take_received();
    assert_eq!(flow_adds(&received).len(), 1);
    assert_eq!(ctrl.installed_flow_count(), 1);
}

#[test]
fn test_smallest_uuid_wins_regardless_of_order() {
    let (_dir, mut ctrl, mut switch, mut groups) = setup();
    let a1 = ActionList::new().output(1).build();
    let a2 = ActionList::new().output(2).build();

    // Insert the larger uuid first; selection must not depend on order.
    ctrl.add_flow(0, 100, port_match(9), a2.clone(), Uuid::from_u128(2));
    ctrl.add_flow(0, 100, port_match(9), a1.clone(), Uuid::from_u128(1));

    converge(&mut ctrl, &mut switch, &mut groups);
    let received = switch.take_received();
    let adds = flow_adds(&received);
    assert_eq!(adds.len(), 1);
    assert_eq!(adds[0].actions, a1);
    assert_eq!(ctrl.installed_flow_count(), 1);

    // Removing the winner hands the key to the other owner: the installed
    // flow is modified in place, not deleted and re-added.
    ctrl.remove_flows(&Uuid::from_u128(1));
    converge(&mut ctrl, &mut switch, &mut groups);
    let kinds = switch.take_kinds();
    assert_eq!(kinds, vec![Kind::FlowModify]);
    assert_eq!(ctrl.installed_flow_count(), 1);
}

#[test]
fn test_put_is_idempotent_once_synced() {
    let (_dir, mut ctrl, mut switch, mut groups) = setup();
    for port in 0..5 {
        ctrl.add_flow(
            1,
            50,
            port_match(port),
            ActionList::new().output(port + 1).build(),
            Uuid::from_u128(port as u128),
        );
    }
    converge(&mut ctrl, &mut switch, &mut groups);
    assert_eq!(flow_adds(&switch.take_received()).len(), 5);

    // Nothing changed: repeated cycles emit zero wire messages.
    for _ in 0..3 {
        converge(&mut ctrl, &mut switch, &mut groups);
        assert!(switch.take_kinds().is_empty());
    }
    assert_eq!(ctrl.installed_flow_count(), 5);
}

#[test]
fn test_message_ordering_within_one_put() {
    let (_dir, mut ctrl, mut switch, mut groups) = setup();

    // Converge on an initial state: two flows and one group.
    let keep_uuid = Uuid::from_u128(1);
    let drop_uuid = Uuid::from_u128(2);
    ctrl.add_flow(0, 10, port_match(1), ActionList::new().output(1).build(), keep_uuid);
    ctrl.add_flow(0, 10, port_match(2), ActionList::new().output(2).build(), drop_uuid);
    groups.insert_desired(1, "type=all,bucket=output:1");
    converge(&mut ctrl, &mut switch, &mut groups);
    switch.take_received();

    // Now: a new group, a deleted flow, a modified flow, a new flow, and
    // the old group is no longer desired.
    ctrl.remove_flows(&drop_uuid);
    ctrl.set_flow(0, 10, port_match(1), ActionList::new().output(9).build(), keep_uuid);
    ctrl.add_flow(0, 10, port_match(3), ActionList::new().output(3).build(), keep_uuid);
    groups.insert_desired(2, "type=all,bucket=output:2");

    converge(&mut ctrl, &mut switch, &mut groups);
    let kinds = switch.take_kinds();
    assert_eq!(
        kinds,
        vec![
            Kind::GroupAdd,
            Kind::FlowDelete,
            Kind::FlowModify,
            Kind::FlowAdd,
            Kind::GroupDelete,
        ]
    );
}

#[test]
fn test_backpressure_defers_but_drains_groups() {
    let (_dir, mut ctrl, mut switch, mut groups) = setup();
    let counter = ctrl.tx_counter();

    ctrl.add_flow(0, 10, port_match(1), ActionList::new().output(1).build(), Uuid::from_u128(1));
    ctrl.put(&mut groups);
    assert_eq!(counter.count(), 1, "the add is queued but not yet flushed");

    // A second put while the first message is still outstanding must emit
    // nothing, yet still consume the desired groups.
    groups.insert_desired(1, "type=all,bucket=output:1");
    ctrl.add_flow(0, 10, port_match(2), ActionList::new().output(2).build(), Uuid::from_u128(2));
    ctrl.put(&mut groups);
    assert_eq!(counter.count(), 1, "no new messages under back-pressure");
    assert_eq!(groups.desired_len(), 0);
    assert_eq!(groups.existing_len(), 0, "deferred groups are not promoted");
    assert_eq!(ctrl.installed_flow_count(), 1);

    // Once the queue flushes, the next cycle catches up.
    ctrl.run(Some(BRIDGE));
    assert_eq!(counter.count(), 0);
    groups.insert_desired(1, "type=all,bucket=output:1");
    converge(&mut ctrl, &mut switch, &mut groups);
    let kinds = switch.take_kinds();
    assert!(kinds.contains(&Kind::FlowAdd));
    assert!(kinds.contains(&Kind::GroupAdd));
    assert_eq!(ctrl.installed_flow_count(), 2);
}

#[test]
fn test_group_lifecycle() {
    let (_dir, mut ctrl, mut switch, mut groups) = setup();

    // Producers repopulate the desired set every cycle; the first cycle
    // installs the group, later ones are quiet.
    groups.insert_desired(10, "type=select,bucket=weight:1,output:1,bucket=weight:1,output:2");
    converge(&mut ctrl, &mut switch, &mut groups);
    assert_eq!(switch.take_kinds(), vec![Kind::GroupAdd]);
    assert_eq!(groups.existing_len(), 1);

    groups.insert_desired(10, "type=select,bucket=weight:1,output:1,bucket=weight:1,output:2");
    converge(&mut ctrl, &mut switch, &mut groups);
    assert!(switch.take_kinds().is_empty());

    // The producer stops asking for the group: it is deleted and its id
    // released.
    converge(&mut ctrl, &mut switch, &mut groups);
    assert_eq!(switch.take_kinds(), vec![Kind::GroupDelete]);
    assert_eq!(groups.existing_len(), 0);
    assert!(!groups.id_in_use(10));
}

#[test]
fn test_unparsable_group_spec_is_skipped() {
    let (_dir, mut ctrl, mut switch, mut groups) = setup();

    groups.insert_desired(3, "type=warp,bucket=output:1");
    groups.insert_desired(4, "type=all,bucket=output:4");
    converge(&mut ctrl, &mut switch, &mut groups);

    // Only the well-formed group reaches the switch; the bad spec is
    // logged and dropped, and both still promote to existing.
    let received = switch.take_received();
    let group_ids: Vec<u32> = received
        .iter()
        .filter_map(|(_, msg)| match msg {
            OfpMessage::GroupMod(gm) => Some(gm.group_id),
            _ => None,
        })
        .collect();
    assert_eq!(group_ids, vec![4]);
    assert_eq!(groups.existing_len(), 2);
}

#[test]
fn test_convergence_installs_smallest_uuid_per_key() {
    let (_dir, mut ctrl, mut switch, mut groups) = setup();

    // Three keys, each contested by several owners.
    for key in 0..3u32 {
        for owner in [5u128, 3, 8] {
            ctrl.add_flow(
                2,
                20,
                port_match(key),
                ActionList::new().output(owner as u32).build(),
                Uuid::from_u128(owner + key as u128 * 10),
            );
        }
    }
    converge(&mut ctrl, &mut switch, &mut groups);

    let received = switch.take_received();
    let adds = flow_adds(&received);
    assert_eq!(adds.len(), 3);
    for fm in adds {
        // The smallest owner per key is 3 + 10*key, whose actions output
        // to port 3.
        assert_eq!(fm.actions, ActionList::new().output(3).build());
    }
    assert_eq!(ctrl.installed_flow_count(), 3);

    // A synced table stays quiet.
    converge(&mut ctrl, &mut switch, &mut groups);
    assert!(switch.take_kinds().is_empty());
}

#[test]
fn test_full_cycle_with_reconnect() {
    let (_dir, mut ctrl, mut switch, mut groups) = setup();

    ctrl.add_flow(0, 10, port_match(1), ActionList::new().output(1).build(), Uuid::from_u128(1));
    ctrl.add_flow(0, 10, port_match(2), ActionList::new().output(2).build(), Uuid::from_u128(2));
    converge(&mut ctrl, &mut switch, &mut groups);
    assert_eq!(flow_adds(&switch.take_received()).len(), 2);
    assert_eq!(ctrl.installed_flow_count(), 2);

    // The switch restarts: its tables are gone, and so is our mirror of
    // them.
    switch.drop_connection();
    tick(&mut ctrl, &mut switch);
    std::thread::sleep(Duration::from_millis(1100));
    settle(&mut ctrl, &mut switch);
    assert_eq!(ctrl.installed_flow_count(), 0);

    let kinds = switch.take_kinds();
    assert!(kinds.contains(&Kind::FlowDeleteAll));
    assert!(kinds.contains(&Kind::GroupDeleteAll));

    // The next cycle re-installs the full desired state.
    converge(&mut ctrl, &mut switch, &mut groups);
    assert_eq!(flow_adds(&switch.take_received()).len(), 2);
    assert_eq!(ctrl.installed_flow_count(), 2);
}
