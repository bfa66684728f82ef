//! Streaming members database: tracks which objects of one member type are
//! awaited by which relations, stores each wanted object exactly once, and
//! reports relations whose member set just became complete.
//!
//! Usage follows three phases: `track` every wanted membership while
//! relations are loaded, `prepare` once, then `add` each candidate object
//! from the stream. Entries are reference counted per member id through
//! their status: the stashed object is released when the last entry for its
//! id leaves the non-removed states.

use std::mem;
use std::ops::Range;

use smallvec::SmallVec;

use crate::osm::{ObjectId, OsmElement};
use crate::relations::{RelationHandle, RelationsDatabase};
use crate::stash::{self, ItemStash};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Tracked,
    Available,
    Removed,
}

struct Entry {
    member_id: ObjectId,
    relation: RelationHandle,
    member_pos: u32,
    object: Option<stash::Handle>,
    status: Status,
}

/// Snapshot of entry states. `tracked + available + removed` always equals
/// `size()`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MemberCounts {
    pub tracked: usize,
    pub available: usize,
    pub removed: usize,
}

/// Result of feeding one candidate object.
#[derive(Debug, Default)]
pub struct AddOutcome {
    /// True iff at least one tracked entry was waiting for the object.
    pub matched: bool,
    /// Relations whose last outstanding member this object was. Callers
    /// handle these, release their members with `remove`, and drop the
    /// relation handle.
    pub completed: SmallVec<[RelationHandle; 4]>,
}

pub struct MembersDatabase<T: OsmElement> {
    stash: ItemStash<T>,
    entries: Vec<Entry>,
    prepared: bool,
}

impl<T: OsmElement> Default for MembersDatabase<T> {
    fn default() -> Self {
        MembersDatabase {
            stash: ItemStash::new(),
            entries: Vec::new(),
            prepared: false,
        }
    }
}

impl<T: OsmElement> MembersDatabase<T> {
    pub fn new() -> Self {
        Default::default()
    }

    /// Records that `relation` wants the object with `member_id` at member
    /// list position `member_pos`. Raises the relation's outstanding count.
    /// Must not be called after `prepare`.
    pub fn track(
        &mut self,
        rdb: &mut RelationsDatabase,
        relation: RelationHandle,
        member_id: ObjectId,
        member_pos: usize,
    ) {
        assert!(!self.prepared, "track called after prepare");
        self.entries.push(Entry {
            member_id,
            relation,
            member_pos: member_pos as u32,
            object: None,
            status: Status::Tracked,
        });
        rdb.increment_need_members(relation);
    }

    /// Sorts the entry table for id lookup. No `track` calls are valid
    /// afterwards.
    pub fn prepare(&mut self) {
        self.entries.sort_unstable_by_key(|e| e.member_id);
        self.prepared = true;
    }

    fn equal_range(&self, member_id: ObjectId) -> Range<usize> {
        debug_assert!(self.prepared, "lookup before prepare");
        let start = self.entries.partition_point(|e| e.member_id < member_id);
        let end = start + self.entries[start..].partition_point(|e| e.member_id == member_id);
        start..end
    }

    /// Offers `object` to every relation waiting for it. If any entry is
    /// still in tracked state, exactly one copy of the object is stashed and
    /// every such entry flips to available; relations whose outstanding
    /// count thereby reaches zero are reported in the outcome.
    pub fn add(&mut self, object: &T, rdb: &mut RelationsDatabase) -> AddOutcome {
        let range = self.equal_range(object.id());
        let mut outcome = AddOutcome::default();
        if !self.entries[range.clone()]
            .iter()
            .any(|e| e.status == Status::Tracked)
        {
            return outcome;
        }
        outcome.matched = true;

        let handle = self.stash.add(object.clone());
        for entry in &mut self.entries[range] {
            if entry.status != Status::Tracked {
                continue;
            }
            entry.object = Some(handle);
            entry.status = Status::Available;
            if rdb.got_one_member(entry.relation) {
                outcome.completed.push(entry.relation);
            }
        }
        outcome
    }

    /// Releases one membership of `relation_id` on `member_id`: the first
    /// matching non-removed entry flips to removed. When no non-removed
    /// entry for the id remains, the stashed object is dropped.
    pub fn remove(&mut self, rdb: &RelationsDatabase, member_id: ObjectId, relation_id: ObjectId) {
        let range = self.equal_range(member_id);
        let marked = range.clone().find(|&i| {
            let entry = &self.entries[i];
            entry.status != Status::Removed && rdb.get(entry.relation).id == relation_id
        });
        let Some(marked) = marked else {
            return;
        };
        self.entries[marked].status = Status::Removed;

        let last = !self.entries[range.clone()]
            .iter()
            .any(|e| e.status != Status::Removed);
        if last {
            let mut stashed = None;
            for entry in &mut self.entries[range] {
                if let Some(handle) = mem::take(&mut entry.object) {
                    stashed = Some(handle);
                }
            }
            if let Some(handle) = stashed {
                self.stash.remove(handle);
            }
        }
    }

    /// The stored object for `member_id`, if it has arrived and is still
    /// referenced.
    pub fn get(&self, member_id: ObjectId) -> Option<&T> {
        let range = self.equal_range(member_id);
        self.entries[range]
            .iter()
            .find(|e| e.status == Status::Available)
            .map(|e| self.stash.get(e.object.expect("available entry without object")))
    }

    /// Member list position recorded for the first non-removed entry of
    /// `(member_id, relation_id)`.
    pub fn member_pos(
        &self,
        rdb: &RelationsDatabase,
        member_id: ObjectId,
        relation_id: ObjectId,
    ) -> Option<usize> {
        let range = self.equal_range(member_id);
        self.entries[range]
            .iter()
            .find(|e| {
                e.status != Status::Removed && rdb.get(e.relation).id == relation_id
            })
            .map(|e| e.member_pos as usize)
    }

    /// Total entries, removed ones included.
    pub fn size(&self) -> usize {
        self.entries.len()
    }

    pub fn count(&self) -> MemberCounts {
        let mut counts = MemberCounts::default();
        for entry in &self.entries {
            match entry.status {
                Status::Tracked => counts.tracked += 1,
                Status::Available => counts.available += 1,
                Status::Removed => counts.removed += 1,
            }
        }
        counts
    }

    /// Rough memory footprint of the database, for telemetry.
    pub fn used_memory(&self) -> usize {
        self.entries.capacity() * mem::size_of::<Entry>() + self.stash.used_memory()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::osm::{ItemType, Member, Relation, Way};
    use proptest::prelude::*;

    fn fill(
        rdb: &mut RelationsDatabase,
        mdb: &mut MembersDatabase<Way>,
        relations: Vec<Relation>,
    ) -> Vec<RelationHandle> {
        let handles = relations
            .into_iter()
            .map(|relation| {
                let members = relation.members.clone();
                let handle = rdb.add(relation);
                for (pos, member) in members.iter().enumerate() {
                    mdb.track(rdb, handle, member.id, pos);
                }
                handle
            })
            .collect();
        mdb.prepare();
        handles
    }

    #[test]
    fn test_fill_member_database() {
        let mut rdb = RelationsDatabase::new();
        let mut mdb = MembersDatabase::<Way>::new();
        assert!(mdb.used_memory() < 100);

        fill(
            &mut rdb,
            &mut mdb,
            vec![
                Relation::new(20).with_member(ItemType::Way, 10, "outer"),
                Relation::new(21)
                    .with_member(ItemType::Way, 11, "outer")
                    .with_member(ItemType::Way, 12, "outer"),
                Relation::new(22)
                    .with_member(ItemType::Way, 13, "outer")
                    .with_member(ItemType::Way, 10, "inner")
                    .with_member(ItemType::Way, 14, "inner"),
            ],
        );

        let mut completed_ids = Vec::new();
        for id in [10, 11, 12, 13, 14, 15] {
            let way = Way::new(id);
            let outcome = mdb.add(&way, &mut rdb);
            assert_eq!(outcome.matched, id != 15);
            for handle in outcome.completed {
                completed_ids.push((id, rdb.get(handle).id));
            }
            if id == 11 {
                assert_eq!(mdb.get(11), Some(&way));
            }
        }

        assert_eq!(completed_ids, vec![(10, 20), (12, 21), (14, 22)]);
        assert!(mdb.used_memory() > 100);
    }

    #[test]
    fn test_duplicate_member_in_relation() {
        let mut rdb = RelationsDatabase::new();
        let mut mdb = MembersDatabase::<Way>::new();

        let handles = fill(
            &mut rdb,
            &mut mdb,
            vec![Relation::new(20)
                .with_member(ItemType::Way, 10, "outer")
                .with_member(ItemType::Way, 11, "inner")
                .with_member(ItemType::Way, 12, "inner")
                .with_member(ItemType::Way, 11, "inner")],
        );

        assert_eq!(mdb.size(), 4);
        assert_eq!(
            mdb.count(),
            MemberCounts {
                tracked: 4,
                available: 0,
                removed: 0
            }
        );

        let mut completions = 0;
        for id in [10, 11, 12] {
            let outcome = mdb.add(&Way::new(id), &mut rdb);
            for handle in outcome.completed {
                completions += 1;
                assert_eq!(rdb.get(handle).id, 20);
                assert_eq!(
                    mdb.count(),
                    MemberCounts {
                        tracked: 0,
                        available: 4,
                        removed: 0
                    }
                );

                let members: Vec<Member> = rdb.get(handle).members.clone();
                for member in &members {
                    mdb.remove(&rdb, member.id, 20);
                }
                rdb.remove(handle);
            }
        }

        assert_eq!(completions, 1);
        assert_eq!(handles.len(), 1);

        assert_eq!(rdb.size(), 1);
        assert!(rdb.get_relations().next().is_none());

        assert_eq!(mdb.size(), 4);
        assert_eq!(
            mdb.count(),
            MemberCounts {
                tracked: 0,
                available: 0,
                removed: 4
            }
        );
        assert_eq!(mdb.get(11), None);
    }

    #[test]
    fn test_shared_member_released_with_last_relation() {
        let mut rdb = RelationsDatabase::new();
        let mut mdb = MembersDatabase::<Way>::new();
        fill(
            &mut rdb,
            &mut mdb,
            vec![
                Relation::new(20).with_member(ItemType::Way, 10, "outer"),
                Relation::new(21).with_member(ItemType::Way, 10, "outer"),
            ],
        );

        let outcome = mdb.add(&Way::new(10), &mut rdb);
        assert_eq!(outcome.completed.len(), 2);

        mdb.remove(&rdb, 10, 20);
        // still referenced by relation 21
        assert!(mdb.get(10).is_some());
        assert_eq!(mdb.member_pos(&rdb, 10, 21), Some(0));
        assert_eq!(mdb.member_pos(&rdb, 10, 20), None);
        mdb.remove(&rdb, 10, 21);
        assert!(mdb.get(10).is_none());
    }

    #[test]
    #[should_panic(expected = "track called after prepare")]
    fn test_track_after_prepare_panics() {
        let mut rdb = RelationsDatabase::new();
        let mut mdb = MembersDatabase::<Way>::new();
        let handle = rdb.add(Relation::new(20).with_member(ItemType::Way, 10, "outer"));
        mdb.prepare();
        mdb.track(&mut rdb, handle, 10, 0);
    }

    proptest! {
        // tracked + available + removed == size across arbitrary protocols
        #[test]
        fn counts_stay_balanced(member_ids in prop::collection::vec(1i64..20, 1..30)) {
            let mut rdb = RelationsDatabase::new();
            let mut mdb = MembersDatabase::<Way>::new();
            let relation = member_ids
                .iter()
                .fold(Relation::new(99), |r, id| {
                    r.with_member(ItemType::Way, *id, "outer")
                });
            let members = relation.members.clone();
            let handle = rdb.add(relation);
            for (pos, member) in members.iter().enumerate() {
                mdb.track(&mut rdb, handle, member.id, pos);
            }
            mdb.prepare();

            let total = mdb.size();
            let check = |mdb: &MembersDatabase<Way>| {
                let counts = mdb.count();
                counts.tracked + counts.available + counts.removed == total
            };
            prop_assert!(check(&mdb));

            let mut completed = Vec::new();
            for id in 1..20 {
                let outcome = mdb.add(&Way::new(id), &mut rdb);
                completed.extend(outcome.completed);
                prop_assert!(check(&mdb));
            }
            prop_assert_eq!(completed.len(), 1);

            for member in &members {
                mdb.remove(&rdb, member.id, 99);
                prop_assert!(check(&mdb));
            }
            prop_assert_eq!(mdb.count().removed, total);
        }
    }
}
