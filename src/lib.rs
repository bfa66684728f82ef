//! Assembly of OSM relations from streamed input.
//!
//! OSM streams are ordered nodes, then ways, then relations, so by the time
//! a relation shows up its member objects have long been discarded. This
//! crate buffers exactly what is needed to hand each interesting relation to
//! a consumer together with its full member set:
//!
//! * [`Collector`] drives a two-pass scan: pass 1 records the relations of
//!   interest and a sorted wanted-member index, pass 2 captures the wanted
//!   objects and fires [`Assembler::complete_relation`] the moment a
//!   relation's last member arrives.
//! * [`RelationsDatabase`] + [`MembersDatabase`] are the streaming variant:
//!   relations are loaded and tracked explicitly, and members are released
//!   as soon as the last relation referencing them is done.
//!
//! Reading the stream, deciding which relations are interesting, and turning
//! completed relations into geometry are all the caller's business.
//!
//! ```
//! use osmrelate::{
//!     Assembler, Collector, CompletedRelation, HookError, Interest, ItemType, OsmObject,
//!     Relation, Way,
//! };
//!
//! struct Roles(Vec<String>);
//!
//! impl Assembler for Roles {
//!     fn complete_relation(&mut self, relation: CompletedRelation<'_>) -> Result<(), HookError> {
//!         for (member, object) in relation.member_objects() {
//!             self.0.push(format!("{} {}", member.role, object.id()));
//!         }
//!         Ok(())
//!     }
//! }
//!
//! let input = vec![
//!     OsmObject::from(Way::new(10)),
//!     Relation::new(20).with_member(ItemType::Way, 10, "outer").into(),
//! ];
//!
//! let mut collector = Collector::new(Roles(Vec::new()), Interest::new().ways());
//! collector.read_relations(input.clone());
//! collector.read_members(input)?;
//! assert_eq!(collector.assembler().0, ["outer 10"]);
//! # Ok::<(), osmrelate::Error>(())
//! ```

mod arena;
mod codec;
mod collector;
mod error;
mod matcher;
mod members;
mod meta;
mod osm;
mod relations;
mod stash;

pub use crate::arena::ObjectArena;
pub use crate::codec::{
    MemberIter, MemberRef, NodeView, ObjectView, RelationView, TagIter, WayView,
};
pub use crate::collector::{Assembler, Collector, CompletedRelation, Interest, MemoryUsage};
pub use crate::error::{Error, HookError};
pub use crate::matcher::StringMatcher;
pub use crate::members::{AddOutcome, MemberCounts, MembersDatabase};
pub use crate::meta::{MemberMeta, RelationMeta};
pub use crate::osm::{
    ItemType, Member, Node, ObjectId, OsmElement, OsmObject, Relation, Tag, Way,
};
pub use crate::relations::{RelationHandle, RelationsDatabase};
pub use crate::stash::{Handle, ItemStash};
