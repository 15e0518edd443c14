//! The desired/existing group stores and the group-id allocator.
//!
//! A group is a 32-bit id plus the textual specification the reconciler
//! parses when installing it. The table tracks two sets: `desired`, which
//! producers fill and each reconcile pass consumes, and `existing`, which
//! mirrors what the switch holds. A set of allocated ids spans the whole
//! 32-bit id space and keeps an id marked allocated exactly as long as it
//! appears in either set.

use std::collections::{HashMap, HashSet};

/// The allocator hands out ids from `[1, MAX_GROUPS)`; 0 is never
/// allocated. Producer-supplied ids may use the full 32-bit space and are
/// tracked regardless.
pub const MAX_GROUPS: u32 = 65536;

/// Which of the two sets an operation addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupSet {
    /// Groups producers want installed.
    Desired,
    /// Groups believed present in the switch.
    Existing,
}

/// Desired and existing groups plus the shared id allocator.
pub struct GroupTable {
    desired: HashMap<u32, String>,
    existing: HashMap<u32, String>,
    ids: HashSet<u32>,
}

impl GroupTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self {
            desired: HashMap::new(),
            existing: HashMap::new(),
            ids: HashSet::new(),
        }
    }

    /// Allocates the lowest free group id, marking it used.
    pub fn allocate_id(&mut self) -> Option<u32> {
        let id = (1..MAX_GROUPS).find(|id| !self.ids.contains(id))?;
        self.ids.insert(id);
        Some(id)
    }

    /// True when `id` is marked allocated.
    pub fn id_in_use(&self, id: u32) -> bool {
        self.ids.contains(&id)
    }

    fn mark(&mut self, id: u32, used: bool) {
        if used {
            self.ids.insert(id);
        } else {
            self.ids.remove(&id);
        }
    }

    /// Adds a group to the desired set, replacing any previous spec.
    pub fn insert_desired(&mut self, id: u32, spec: impl Into<String>) {
        self.desired.insert(id, spec.into());
        self.mark(id, true);
    }

    /// Looks up a group's spec in one of the sets.
    pub fn lookup(&self, set: GroupSet, id: u32) -> Option<&str> {
        let map = match set {
            GroupSet::Desired => &self.desired,
            GroupSet::Existing => &self.existing,
        };
        map.get(&id).map(String::as_str)
    }

    /// Ids currently in the desired set.
    pub fn desired_ids(&self) -> Vec<u32> {
        self.desired.keys().copied().collect()
    }

    /// Ids currently in the existing set.
    pub fn existing_ids(&self) -> Vec<u32> {
        self.existing.keys().copied().collect()
    }

    /// Number of desired groups.
    pub fn desired_len(&self) -> usize {
        self.desired.len()
    }

    /// Number of existing groups.
    pub fn existing_len(&self) -> usize {
        self.existing.len()
    }

    /// Empties one of the sets, releasing ids no longer referenced by the
    /// other.
    pub fn clear(&mut self, set: GroupSet) {
        let ids: Vec<u32> = match set {
            GroupSet::Desired => self.desired.drain().map(|(id, _)| id).collect(),
            GroupSet::Existing => self.existing.drain().map(|(id, _)| id).collect(),
        };
        for id in ids {
            if !self.desired.contains_key(&id) && !self.existing.contains_key(&id) {
                self.mark(id, false);
            }
        }
    }

    /// Removes one group from the existing set, releasing its id if the
    /// desired set no longer references it.
    pub fn remove_existing(&mut self, id: u32) -> Option<String> {
        let spec = self.existing.remove(&id)?;
        if !self.desired.contains_key(&id) {
            self.mark(id, false);
        }
        Some(spec)
    }

    /// Moves every desired group into the existing set, dropping specs for
    /// ids already present there. The desired set ends empty.
    pub fn promote_desired(&mut self) {
        for (id, spec) in self.desired.drain() {
            self.existing.entry(id).or_insert(spec);
        }
    }
}

impl Default for GroupTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_skips_zero_and_is_ordered() {
        let mut table = GroupTable::new();
        assert_eq!(table.allocate_id(), Some(1));
        assert_eq!(table.allocate_id(), Some(2));
        assert!(table.id_in_use(1));
        assert!(!table.id_in_use(0));
    }

    #[test]
    fn test_allocate_reuses_lowest_released_id() {
        let mut table = GroupTable::new();
        table.insert_desired(1, "a");
        table.insert_desired(2, "b");
        table.insert_desired(3, "c");
        table.clear(GroupSet::Desired);
        table.insert_desired(2, "b");
        assert_eq!(table.allocate_id(), Some(1));
        assert_eq!(table.allocate_id(), Some(3));
    }

    #[test]
    fn test_insert_desired_marks_id() {
        let mut table = GroupTable::new();
        table.insert_desired(10, "type=all,bucket=output:1");
        assert!(table.id_in_use(10));
        assert_eq!(
            table.lookup(GroupSet::Desired, 10),
            Some("type=all,bucket=output:1")
        );
        assert_eq!(table.lookup(GroupSet::Existing, 10), None);
    }

    #[test]
    fn test_tracks_ids_beyond_allocator_range() {
        let mut table = GroupTable::new();
        // Producer-chosen ids above the allocator's range still honor the
        // allocated-iff-in-either-set invariant.
        let big = MAX_GROUPS + 7;
        table.insert_desired(big, "type=all,bucket=output:1");
        assert!(table.id_in_use(big));
        table.promote_desired();
        assert!(table.id_in_use(big));
        table.remove_existing(big);
        assert!(!table.id_in_use(big));

        table.insert_desired(u32::MAX, "type=all,bucket=output:2");
        assert!(table.id_in_use(u32::MAX));
        table.clear(GroupSet::Desired);
        assert!(!table.id_in_use(u32::MAX));
    }

    #[test]
    fn test_clear_releases_unreferenced_ids() {
        let mut table = GroupTable::new();
        table.insert_desired(5, "type=all,bucket=output:1");
        table.promote_desired();
        table.insert_desired(5, "type=all,bucket=output:1");
        table.insert_desired(6, "type=all,bucket=output:2");

        // 5 is in both sets; clearing desired must keep it allocated.
        table.clear(GroupSet::Desired);
        assert!(table.id_in_use(5));
        assert!(!table.id_in_use(6));

        table.clear(GroupSet::Existing);
        assert!(!table.id_in_use(5));
    }

    #[test]
    fn test_remove_existing_releases_id() {
        let mut table = GroupTable::new();
        table.insert_desired(7, "type=all,bucket=output:1");
        table.promote_desired();
        assert_eq!(table.desired_len(), 0);
        assert_eq!(table.existing_len(), 1);

        let spec = table.remove_existing(7).unwrap();
        assert_eq!(spec, "type=all,bucket=output:1");
        assert!(!table.id_in_use(7));
        assert!(table.remove_existing(7).is_none());
    }

    #[test]
    fn test_promote_drops_duplicate_specs() {
        let mut table = GroupTable::new();
        table.insert_desired(3, "old");
        table.promote_desired();
        table.insert_desired(3, "new");
        table.promote_desired();
        // The existing spec is kept; the duplicate desired spec is dropped.
        assert_eq!(table.lookup(GroupSet::Existing, 3), Some("old"));
        assert_eq!(table.desired_len(), 0);
    }

    #[test]
    fn test_allocated_iff_in_either_set() {
        let mut table = GroupTable::new();
        let id = table.allocate_id().unwrap();
        table.insert_desired(id, "type=all,bucket=output:1");
        table.promote_desired();
        assert!(table.id_in_use(id));
        table.remove_existing(id);
        assert!(!table.id_in_use(id));
    }
}
