//! The desired/installed flow stores.
//!
//! Flows live in an arena with stable slot indices and are reachable two
//! ways: by `(table_id, priority, match)` key for reconciliation, and by
//! owner uuid for bulk removal when a logical-source record goes away.
//! Key collisions across different owners are legal; the reconciler picks
//! the smallest uuid deterministically. A colliding key under the *same*
//! owner is a producer bug, tolerated and logged here.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use tracing::{info, warn};

use vnet_ofproto::Match;

use crate::ratelimit::RateLimiter;
use crate::types::Uuid;

/// The identity of a flow in the switch: table, priority, and match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowKey {
    /// OpenFlow table number.
    pub table_id: u8,
    /// Flow priority.
    pub priority: u16,
    /// Structured match.
    pub match_field: Match,
}

impl Hash for FlowKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        // Two-word combination: table and priority packed together, then
        // the match.
        state.write_u32(((self.table_id as u32) << 16) | self.priority as u32);
        self.match_field.hash(state);
    }
}

/// A desired or installed flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Flow {
    /// Switch-visible identity.
    pub key: FlowKey,
    /// Raw encoded actions.
    pub actions: Vec<u8>,
    /// The logical-source record that produced this flow.
    pub uuid: Uuid,
}

impl fmt::Display for Flow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "table_id={}, priority={}, match=({}), actions=",
            self.key.table_id, self.key.priority, self.key.match_field
        )?;
        if self.actions.is_empty() {
            write!(f, "drop")
        } else {
            for byte in &self.actions {
                write!(f, "{:02x}", byte)?;
            }
            Ok(())
        }
    }
}

/// Outcome of [`FlowTable::add_flow`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// A new entry was inserted.
    Added,
    /// Same owner, same key, same actions: the new flow was dropped.
    DuplicateDropped,
    /// Same owner, same key, different actions: the existing entry's
    /// actions were overwritten with the new ones.
    DuplicateReplaced,
}

impl AddOutcome {
    /// True for either duplicate case.
    pub fn is_duplicate(&self) -> bool {
        !matches!(self, Self::Added)
    }
}

/// Arena-backed flow store with key and uuid indexes.
pub struct FlowTable {
    slots: Vec<Option<Flow>>,
    free: Vec<usize>,
    by_key: HashMap<FlowKey, Vec<usize>>,
    by_uuid: HashMap<Uuid, Vec<usize>>,
    len: usize,
    dup_info_rl: RateLimiter,
    dup_warn_rl: RateLimiter,
}

impl FlowTable {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            by_key: HashMap::new(),
            by_uuid: HashMap::new(),
            len: 0,
            dup_info_rl: RateLimiter::for_producer_bugs(),
            dup_warn_rl: RateLimiter::for_producer_bugs(),
        }
    }

    /// Number of flows in the store.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True when the store holds no flows.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Adds a flow, handling producer duplicates.
    ///
    /// A flow with the same key *and* the same owner as an existing entry
    /// indicates a producer bug: if the actions match the new flow is
    /// dropped, otherwise the existing entry's actions are overwritten
    /// (the newer actions are presumed correct). Either way the event is
    /// logged, rate-limited.
    pub fn add_flow(
        &mut self,
        table_id: u8,
        priority: u16,
        match_field: Match,
        actions: Vec<u8>,
        uuid: Uuid,
    ) -> AddOutcome {
        let flow = Flow {
            key: FlowKey {
                table_id,
                priority,
                match_field,
            },
            actions,
            uuid,
        };

        let same_owner = self
            .by_key
            .get(&flow.key)
            .into_iter()
            .flatten()
            .copied()
            .find(|&idx| self.slot(idx).uuid == uuid);
        if let Some(existing) = same_owner {
            if self.slot(existing).actions == flow.actions {
                if self.dup_info_rl.should_log() {
                    info!(parent = %uuid, flow = %flow, "duplicate flow");
                }
                return AddOutcome::DuplicateDropped;
            }
            if self.dup_warn_rl.should_log() {
                warn!(parent = %uuid, flow = %flow, "duplicate flow with modified action");
            }
            self.slot_mut(existing).actions = flow.actions;
            return AddOutcome::DuplicateReplaced;
        }

        self.insert(flow);
        AddOutcome::Added
    }

    /// Inserts a flow without duplicate checks, returning its slot.
    pub fn insert(&mut self, flow: Flow) -> usize {
        let idx = match self.free.pop() {
            Some(idx) => {
                self.slots[idx] = Some(flow);
                idx
            }
            None => {
                self.slots.push(Some(flow));
                self.slots.len() - 1
            }
        };
        let flow = self.slot(idx);
        let (key, uuid) = (flow.key.clone(), flow.uuid);
        self.by_key.entry(key).or_default().push(idx);
        self.by_uuid.entry(uuid).or_default().push(idx);
        self.len += 1;
        idx
    }

    /// Removes every flow owned by `uuid`, returning how many went away.
    pub fn remove_flows(&mut self, uuid: &Uuid) -> usize {
        let Some(indices) = self.by_uuid.remove(uuid) else {
            return 0;
        };
        let mut removed = 0;
        for idx in indices {
            if let Some(flow) = self.slots.get_mut(idx).and_then(Option::take) {
                self.unlink_key(&flow.key, idx);
                self.free.push(idx);
                self.len -= 1;
                removed += 1;
            }
        }
        removed
    }

    /// Removes the flow in `idx`, returning it.
    pub fn remove_slot(&mut self, idx: usize) -> Option<Flow> {
        let flow = self.slots.get_mut(idx)?.take()?;
        self.unlink_key(&flow.key, idx);
        self.unlink_uuid(&flow.uuid, idx);
        self.free.push(idx);
        self.len -= 1;
        Some(flow)
    }

    /// Empties the store.
    pub fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
        self.by_key.clear();
        self.by_uuid.clear();
        self.len = 0;
    }

    /// The flow in `idx`, if occupied.
    pub fn get(&self, idx: usize) -> Option<&Flow> {
        self.slots.get(idx).and_then(Option::as_ref)
    }

    /// Slot indices of every flow, in arena order.
    pub fn slot_indices(&self) -> Vec<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(idx, slot)| slot.as_ref().map(|_| idx))
            .collect()
    }

    /// Each distinct key in the store, once.
    pub fn distinct_keys(&self) -> Vec<FlowKey> {
        self.by_key.keys().cloned().collect()
    }

    /// Slots of every flow whose key equals `key`.
    pub fn lookup(&self, key: &FlowKey) -> &[usize] {
        self.by_key.get(key).map_or(&[], Vec::as_slice)
    }

    /// The matching flow with the smallest uuid, for deterministic
    /// selection among colliding keys.
    pub fn select_min_uuid(&self, key: &FlowKey) -> Option<usize> {
        self.lookup(key)
            .iter()
            .copied()
            .min_by_key(|&idx| self.slot(idx).uuid)
    }

    /// Rebinds the flow in `idx` to a new owner.
    pub fn set_uuid(&mut self, idx: usize, uuid: Uuid) {
        let old = self.slot(idx).uuid;
        if old == uuid {
            return;
        }
        self.unlink_uuid(&old, idx);
        self.slot_mut(idx).uuid = uuid;
        self.by_uuid.entry(uuid).or_default().push(idx);
    }

    /// Replaces the actions of the flow in `idx`.
    pub fn replace_actions(&mut self, idx: usize, actions: Vec<u8>) {
        self.slot_mut(idx).actions = actions;
    }

    fn slot(&self, idx: usize) -> &Flow {
        self.slots[idx].as_ref().expect("slot index out of date")
    }

    fn slot_mut(&mut self, idx: usize) -> &mut Flow {
        self.slots[idx].as_mut().expect("slot index out of date")
    }

    fn unlink_key(&mut self, key: &FlowKey, idx: usize) {
        if let Entry::Occupied(mut entry) = self.by_key.entry(key.clone()) {
            entry.get_mut().retain(|&i| i != idx);
            if entry.get().is_empty() {
                entry.remove();
            }
        }
    }

    fn unlink_uuid(&mut self, uuid: &Uuid, idx: usize) {
        if let Entry::Occupied(mut entry) = self.by_uuid.entry(*uuid) {
            entry.get_mut().retain(|&i| i != idx);
            if entry.get().is_empty() {
                entry.remove();
            }
        }
    }
}

impl Default for FlowTable {
    fn default() -> Self {
        Self::new()
    }
}
