//! The set of relations currently being assembled.
//!
//! Slots are never compacted: a [`RelationHandle`] is a position in the slot
//! table and must stay meaningful for the lifetime of the database, so
//! removal only empties the slot. `size()` therefore counts all slots ever
//! added, while `count()` and the iterators skip the emptied ones.

use std::mem;

use crate::osm::Relation;
use crate::stash::{self, ItemStash};

/// Stable reference to a tracked relation. Stays valid (as a value) after
/// the relation is removed; dereferencing it then is a programming error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RelationHandle(u32);

struct RelationEntry {
    stash: Option<stash::Handle>,
    need_members: u32,
}

#[derive(Default)]
pub struct RelationsDatabase {
    stash: ItemStash<Relation>,
    entries: Vec<RelationEntry>,
}

impl RelationsDatabase {
    pub fn new() -> Self {
        Default::default()
    }

    /// Stores a copy of `relation` and starts tracking it. The outstanding
    /// member count starts at zero; `MembersDatabase::track` raises it.
    pub fn add(&mut self, relation: Relation) -> RelationHandle {
        let handle = RelationHandle(u32::try_from(self.entries.len()).expect("slot overflow"));
        let stash_handle = self.stash.add(relation);
        self.entries.push(RelationEntry {
            stash: Some(stash_handle),
            need_members: 0,
        });
        handle
    }

    fn entry(&self, handle: RelationHandle) -> &RelationEntry {
        &self.entries[handle.0 as usize]
    }

    pub fn get(&self, handle: RelationHandle) -> &Relation {
        let stash_handle = self
            .entry(handle)
            .stash
            .expect("relation handle dereferenced after removal");
        self.stash.get(stash_handle)
    }

    /// Releases the relation. Its slot stays allocated (and counted by
    /// `size()`) but no longer shows up in `get_relations()`.
    pub fn remove(&mut self, handle: RelationHandle) {
        let entry = &mut self.entries[handle.0 as usize];
        let stash_handle = mem::take(&mut entry.stash)
            .expect("relation handle removed twice");
        self.stash.remove(stash_handle);
    }

    /// Total slots, removed ones included.
    pub fn size(&self) -> usize {
        self.entries.len()
    }

    /// Live relations.
    pub fn count(&self) -> usize {
        self.stash.len()
    }

    /// Handles of all live relations.
    pub fn get_relations(&self) -> impl Iterator<Item = RelationHandle> + '_ {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.stash.is_some())
            .map(|(pos, _)| RelationHandle(pos as u32))
    }

    /// Handles of live relations still waiting for members.
    pub fn incomplete(&self) -> impl Iterator<Item = RelationHandle> + '_ {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.stash.is_some() && e.need_members > 0)
            .map(|(pos, _)| RelationHandle(pos as u32))
    }

    /// Outstanding member count of a live relation.
    pub fn need_members(&self, handle: RelationHandle) -> u32 {
        self.entry(handle).need_members
    }

    pub(crate) fn increment_need_members(&mut self, handle: RelationHandle) {
        self.entries[handle.0 as usize].need_members += 1;
    }

    /// Records the arrival of one awaited member. Returns true when the
    /// relation just became complete.
    pub(crate) fn got_one_member(&mut self, handle: RelationHandle) -> bool {
        let entry = &mut self.entries[handle.0 as usize];
        debug_assert!(entry.need_members > 0);
        entry.need_members -= 1;
        entry.need_members == 0
    }

    /// Rough memory footprint of the database, for telemetry.
    pub fn used_memory(&self) -> usize {
        self.entries.capacity() * mem::size_of::<RelationEntry>() + self.stash.used_memory()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_slots_survive_removal() {
        let mut rdb = RelationsDatabase::new();
        let a = rdb.add(Relation::new(20));
        let b = rdb.add(Relation::new(21));

        assert_eq!(rdb.size(), 2);
        assert_eq!(rdb.count(), 2);
        assert_eq!(rdb.get(a).id, 20);

        rdb.remove(a);
        assert_eq!(rdb.size(), 2);
        assert_eq!(rdb.count(), 1);
        let live: Vec<_> = rdb.get_relations().collect();
        assert_eq!(live, vec![b]);

        rdb.remove(b);
        assert_eq!(rdb.size(), 2);
        assert!(rdb.get_relations().next().is_none());
    }

    #[test]
    fn test_member_accounting() {
        let mut rdb = RelationsDatabase::new();
        let h = rdb.add(Relation::new(20));
        rdb.increment_need_members(h);
        rdb.increment_need_members(h);
        assert_eq!(rdb.need_members(h), 2);
        assert_eq!(rdb.incomplete().count(), 1);

        assert!(!rdb.got_one_member(h));
        assert!(rdb.got_one_member(h));
        assert!(rdb.incomplete().next().is_none());
    }

    #[test]
    #[should_panic(expected = "after removal")]
    fn test_get_after_remove_panics() {
        let mut rdb = RelationsDatabase::new();
        let h = rdb.add(Relation::new(20));
        rdb.remove(h);
        rdb.get(h);
    }
}
