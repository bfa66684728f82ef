//! Two-pass relation assembly.
//!
//! Pass 1 scans the relation part of the stream, keeps the interesting
//! relations in the relation arena, and builds one wanted-member index per
//! member type. Pass 2 scans the stream again from the start; every object
//! with a waiting index entry is copied into the members arena, and as soon
//! as a relation's last outstanding member lands, the assembler's
//! `complete_relation` hook fires with the relation and all of its captured
//! members. The members arena is compacted on a completion schedule so a
//! long second pass does not accumulate dead objects.

use std::fmt;
use std::mem;

use log::debug;
use rayon::prelude::*;

use crate::arena::ObjectArena;
use crate::codec::{MemberRef, ObjectView, RelationView};
use crate::error::{Error, HookError};
use crate::meta::{equal_range, MemberMeta, RelationMeta};
use crate::osm::{ItemType, Member, Node, ObjectId, OsmObject, Relation, Way};

/// Which member types the collector captures during pass 2.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Interest {
    nodes: bool,
    ways: bool,
    relations: bool,
}

impl Interest {
    /// No member types selected; chain the builder methods.
    pub fn new() -> Self {
        Default::default()
    }

    pub fn all() -> Self {
        Interest {
            nodes: true,
            ways: true,
            relations: true,
        }
    }

    pub fn nodes(mut self) -> Self {
        self.nodes = true;
        self
    }

    pub fn ways(mut self) -> Self {
        self.ways = true;
        self
    }

    pub fn relations(mut self) -> Self {
        self.relations = true;
        self
    }

    #[inline]
    pub fn contains(&self, item_type: ItemType) -> bool {
        match item_type {
            ItemType::Node => self.nodes,
            ItemType::Way => self.ways,
            ItemType::Relation => self.relations,
        }
    }
}

/// Consumer hooks driving and receiving the assembly.
///
/// Only [`complete_relation`](Assembler::complete_relation) is mandatory.
/// `keep_member` decides which memberships are waited for; members of types
/// outside the collector's [`Interest`] are never fed in pass 2, so an
/// assembler that keeps them will leave their relations incomplete.
pub trait Assembler {
    /// Pass-1 filter: is this relation worth assembling? Storing relations
    /// costs memory, so filter as tightly as possible.
    fn keep_relation(&mut self, _relation: &Relation) -> bool {
        true
    }

    /// Pass-1 filter: is this membership needed? Declined members stay in
    /// the stored relation with their id rewritten to zero.
    fn keep_member(&mut self, _relation: &Relation, _member: &Member) -> bool {
        true
    }

    /// Fires once per relation, during the pass-2 call that supplied its
    /// final member. Everything reachable through `relation` is only valid
    /// for the duration of the call. An error aborts the second pass.
    fn complete_relation(&mut self, relation: CompletedRelation<'_>) -> Result<(), HookError>;

    /// Pass-2 side channel: a node no relation was waiting for.
    fn node_not_in_any_relation(&mut self, _node: &Node) {}

    /// Pass-2 side channel: a way no relation was waiting for.
    fn way_not_in_any_relation(&mut self, _way: &Way) {}

    /// Pass-2 side channel: a relation no relation was waiting for.
    fn relation_not_in_any_relation(&mut self, _relation: &Relation) {}

    /// Called once at the end of pass 2. Relations may still be incomplete
    /// if their members were not in the input.
    fn flush(&mut self) {}
}

/// A relation whose full member set is in hand, passed to
/// [`Assembler::complete_relation`].
pub struct CompletedRelation<'a> {
    relation: RelationView<'a>,
    members_buffer: &'a ObjectArena,
    member_meta: &'a [Vec<MemberMeta>; 3],
}

impl<'a> CompletedRelation<'a> {
    pub fn relation(&self) -> RelationView<'a> {
        self.relation
    }

    #[inline]
    pub fn id(&self) -> ObjectId {
        self.relation.id()
    }

    /// The captured object for one of this relation's members. `None` for
    /// memberships that were declined in pass 1 (id zero) or ids this
    /// collector never captured.
    pub fn get_member(&self, item_type: ItemType, id: ObjectId) -> Option<ObjectView<'a>> {
        if id == 0 {
            return None;
        }
        let metas = &self.member_meta[item_type.index()];
        let range = equal_range(metas, id);
        let offset = metas.get(range.start)?.buffer_offset()?;
        Some(self.members_buffer.get(offset))
    }

    /// Kept members in member-list order, each with its captured object.
    pub fn member_objects(&self) -> impl Iterator<Item = (MemberRef<'a>, ObjectView<'a>)> + '_ {
        self.relation.members().filter(|m| m.id != 0).map(|m| {
            let object = self
                .get_member(m.item_type, m.id)
                .expect("kept member not captured at completion");
            (m, object)
        })
    }
}

/// Capacity snapshot of the collector's buffers and indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryUsage {
    /// Relation-meta slots allocated.
    pub relations: usize,
    /// Member-meta entries allocated, per member type.
    pub member_meta: [usize; 3],
    /// Bytes allocated by the relation arena.
    pub relations_buffer: usize,
    /// Bytes allocated by the members arena.
    pub members_buffer: usize,
}

impl MemoryUsage {
    pub fn total_bytes(&self) -> usize {
        let metas: usize = self.member_meta.iter().sum();
        self.relations * mem::size_of::<RelationMeta>()
            + metas * mem::size_of::<MemberMeta>()
            + self.relations_buffer
            + self.members_buffer
    }
}

impl fmt::Display for MemoryUsage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            r#"relation metas ........ = {:>12}
member metas (node) ... = {:>12}
member metas (way) .... = {:>12}
member metas (rel) .... = {:>12}
relations buffer bytes  = {:>12}
members buffer bytes .. = {:>12}
total bytes ........... = {:>12}"#,
            self.relations,
            self.member_meta[0],
            self.member_meta[1],
            self.member_meta[2],
            self.relations_buffer,
            self.members_buffer,
            self.total_bytes()
        )
    }
}

const DEFAULT_PURGE_INTERVAL: usize = 10_000;

pub struct Collector<A: Assembler> {
    assembler: A,
    interest: Interest,
    relations_buffer: ObjectArena,
    members_buffer: ObjectArena,
    relations: Vec<RelationMeta>,
    member_meta: [Vec<MemberMeta>; 3],
    sorted: bool,
    completions_since_purge: usize,
    purge_interval: usize,
}

impl<A: Assembler> Collector<A> {
    pub fn new(assembler: A, interest: Interest) -> Self {
        Collector {
            assembler,
            interest,
            relations_buffer: ObjectArena::new(),
            members_buffer: ObjectArena::new(),
            relations: Vec::new(),
            member_meta: [Vec::new(), Vec::new(), Vec::new()],
            sorted: false,
            completions_since_purge: 0,
            purge_interval: DEFAULT_PURGE_INTERVAL,
        }
    }

    /// Number of completions between compactions of the members arena.
    pub fn with_purge_interval(mut self, interval: usize) -> Self {
        self.purge_interval = interval;
        self
    }

    pub fn assembler(&self) -> &A {
        &self.assembler
    }

    pub fn assembler_mut(&mut self) -> &mut A {
        &mut self.assembler
    }

    pub fn into_assembler(self) -> A {
        self.assembler
    }

    /// Pass 1: feed the input stream (or just its relation part). Keeps
    /// every relation accepted by `keep_relation` that has at least one kept
    /// member, then sorts the member indices for pass 2.
    pub fn read_relations<I>(&mut self, input: I)
    where
        I: IntoIterator<Item = OsmObject>,
    {
        for object in input {
            if let OsmObject::Relation(relation) = object {
                if self.assembler.keep_relation(&relation) {
                    self.add_relation(relation);
                }
            }
        }
        self.sort_member_meta();
        debug!(
            "tracking {} relations waiting for {}/{}/{} node/way/relation members",
            self.relations.len(),
            self.member_meta[0].len(),
            self.member_meta[1].len(),
            self.member_meta[2].len()
        );
    }

    fn add_relation(&mut self, mut relation: Relation) {
        assert!(!self.sorted, "relation added after the member index was sorted");

        let keeps: Vec<bool> = relation
            .members
            .iter()
            .map(|m| m.id != 0 && self.assembler.keep_member(&relation, m))
            .collect();
        let need = keeps.iter().filter(|k| **k).count() as u32;
        if need == 0 {
            // nothing to wait for
            return;
        }

        let relation_pos = self.relations.len();
        for (pos, (member, keep)) in relation.members.iter_mut().zip(&keeps).enumerate() {
            if *keep {
                self.member_meta[member.item_type.index()]
                    .push(MemberMeta::new(member.id, relation_pos, pos));
            } else {
                member.id = 0;
            }
        }

        self.relations_buffer.add_item(&relation.into());
        let offset = self.relations_buffer.commit();
        self.relations.push(RelationMeta::new(offset, need));
    }

    fn sort_member_meta(&mut self) {
        for metas in &mut self.member_meta {
            metas.par_sort_unstable_by_key(|m| m.member_id());
        }
        self.sorted = true;
    }

    /// Pass 2: feed the input stream from the start. Members the index is
    /// waiting for are captured; relations fire `complete_relation` the
    /// moment their member set is complete; objects nothing waits for go to
    /// the `*_not_in_any_relation` hooks. Assumes the canonical stream
    /// property that each (type, id) appears at most once.
    pub fn read_members<I>(&mut self, input: I) -> Result<(), Error>
    where
        I: IntoIterator<Item = OsmObject>,
    {
        for object in input {
            if !self.interest.contains(object.item_type()) {
                continue;
            }
            if !self.find_and_add_object(&object)? {
                match &object {
                    OsmObject::Node(node) => self.assembler.node_not_in_any_relation(node),
                    OsmObject::Way(way) => self.assembler.way_not_in_any_relation(way),
                    OsmObject::Relation(relation) => {
                        self.assembler.relation_not_in_any_relation(relation)
                    }
                }
            }
        }
        self.assembler.flush();
        Ok(())
    }

    /// Offers one object to every relation waiting for it. Returns false if
    /// no live index entry matched.
    fn find_and_add_object(&mut self, object: &OsmObject) -> Result<bool, Error> {
        assert!(self.sorted, "second pass started before read_relations");
        let type_index = object.item_type().index();
        let range = equal_range(&self.member_meta[type_index], object.id());
        if self.member_meta[type_index][range.clone()]
            .iter()
            .all(|m| m.removed())
        {
            return Ok(false);
        }

        self.members_buffer.add_item(object);
        let offset = self.members_buffer.commit();
        for meta in &mut self.member_meta[type_index][range.clone()] {
            meta.set_buffer_offset(offset);
        }

        for i in range {
            if self.member_meta[type_index][i].removed() {
                continue;
            }
            let relation_pos = self.member_meta[type_index][i].relation_pos();
            let relation_meta = &mut self.relations[relation_pos];
            debug_assert!(!relation_meta.is_vacated());
            relation_meta.got_one_member();
            if relation_meta.has_all_members() {
                self.complete(relation_pos)?;
            }
        }
        Ok(true)
    }

    fn complete(&mut self, relation_pos: usize) -> Result<(), Error> {
        let relation_meta = self.relations[relation_pos].clone();
        {
            let relation = self
                .relations_buffer
                .get(relation_meta.relation_offset())
                .as_relation()
                .expect("relation arena holds a non-relation");
            let id = relation.id();
            let completed = CompletedRelation {
                relation,
                members_buffer: &self.members_buffer,
                member_meta: &self.member_meta,
            };
            self.assembler
                .complete_relation(completed)
                .map_err(|source| Error::Assembler { id, source })?;
        }
        self.clear_member_metas(relation_pos, &relation_meta);
        self.relations[relation_pos] = RelationMeta::vacated();
        self.possibly_purge_removed_members();
        Ok(())
    }

    /// Retires every index entry of a just-completed relation. An entry
    /// whose object no other relation still waits for tombstones the object
    /// in the members arena.
    fn clear_member_metas(&mut self, relation_pos: usize, relation_meta: &RelationMeta) {
        let members: Vec<(ItemType, ObjectId)> = self
            .relations_buffer
            .get(relation_meta.relation_offset())
            .as_relation()
            .expect("relation arena holds a non-relation")
            .members()
            .filter(|m| m.id != 0)
            .map(|m| (m.item_type, m.id))
            .collect();

        for (item_type, member_id) in members {
            let metas = &self.member_meta[item_type.index()];
            let range = equal_range(metas, member_id);
            debug_assert!(!range.is_empty());

            let mut live = metas[range.clone()].iter().filter(|m| !m.removed());
            let offset = live
                .next()
                .expect("completed member already cleared")
                .buffer_offset()
                .expect("completed member was never captured");
            if live.next().is_none() {
                // last relation waiting for this object
                self.members_buffer.set_removed(offset);
            }

            let metas = &mut self.member_meta[item_type.index()];
            for i in range {
                let meta = &mut metas[i];
                if !meta.removed() && meta.relation_pos() == relation_pos {
                    meta.remove();
                    break;
                }
            }
        }
    }

    fn possibly_purge_removed_members(&mut self) {
        self.completions_since_purge += 1;
        if self.completions_since_purge <= self.purge_interval {
            return;
        }
        let member_meta = &mut self.member_meta;
        self.members_buffer.purge_removed(|kind, id, old, new| {
            let metas = &mut member_meta[kind.index()];
            let range = equal_range(metas, id);
            for meta in &mut metas[range] {
                debug_assert_eq!(meta.buffer_offset(), Some(old));
                meta.set_buffer_offset(new);
            }
        });
        self.completions_since_purge = 0;
    }

    /// Relations that were accepted in pass 1 but whose member set never
    /// fully showed up. Views stay valid until the collector is dropped.
    pub fn get_incomplete_relations(&self) -> Vec<RelationView<'_>> {
        self.relations
            .iter()
            .filter(|m| !m.is_vacated() && !m.has_all_members())
            .map(|m| {
                self.relations_buffer
                    .get(m.relation_offset())
                    .as_relation()
                    .expect("relation arena holds a non-relation")
            })
            .collect()
    }

    /// The arena holding captured member objects.
    pub fn members_buffer(&self) -> &ObjectArena {
        &self.members_buffer
    }

    /// Capacity snapshot; render or log it as needed.
    pub fn used_memory(&self) -> MemoryUsage {
        MemoryUsage {
            relations: self.relations.capacity(),
            member_meta: [
                self.member_meta[0].capacity(),
                self.member_meta[1].capacity(),
                self.member_meta[2].capacity(),
            ],
            relations_buffer: self.relations_buffer.capacity(),
            members_buffer: self.members_buffer.capacity(),
        }
    }
}
