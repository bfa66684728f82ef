//! Minimal OSM object model for the assembly engine.
//!
//! Objects carry scaled integer coordinates and owned tag/member lists. The
//! parsers producing these objects live outside this crate; everything here
//! is what the engine itself needs to buffer, index, and hand back.

use std::fmt;

/// OSM object id. Zero is reserved: a member whose id was rewritten to zero
/// is one the application chose not to track.
pub type ObjectId = i64;

/// The three OSM object kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ItemType {
    Node,
    Way,
    Relation,
}

impl ItemType {
    /// Index into per-type tables.
    #[inline]
    pub(crate) fn index(self) -> usize {
        match self {
            ItemType::Node => 0,
            ItemType::Way => 1,
            ItemType::Relation => 2,
        }
    }

    #[inline]
    pub(crate) fn as_u8(self) -> u8 {
        match self {
            ItemType::Node => 0,
            ItemType::Way => 1,
            ItemType::Relation => 2,
        }
    }

    #[inline]
    pub(crate) fn from_u8(raw: u8) -> ItemType {
        match raw {
            0 => ItemType::Node,
            1 => ItemType::Way,
            2 => ItemType::Relation,
            _ => panic!("invalid item type tag: {}", raw),
        }
    }
}

impl fmt::Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ItemType::Node => write!(f, "node"),
            ItemType::Way => write!(f, "way"),
            ItemType::Relation => write!(f, "relation"),
        }
    }
}

/// A single key/value tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

impl Tag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Tag {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// A typed reference from a relation to another object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub item_type: ItemType,
    pub id: ObjectId,
    pub role: String,
}

impl Member {
    pub fn new(item_type: ItemType, id: ObjectId, role: impl Into<String>) -> Self {
        Member {
            item_type,
            id,
            role: role.into(),
        }
    }
}

/// A node with scaled integer coordinates (units of 1e-7 degrees).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub id: ObjectId,
    pub lat: i32,
    pub lon: i32,
    pub tags: Vec<Tag>,
}

impl Node {
    pub fn new(id: ObjectId, lat: i32, lon: i32) -> Self {
        Node {
            id,
            lat,
            lon,
            tags: Vec::new(),
        }
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.push(Tag::new(key, value));
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Way {
    pub id: ObjectId,
    pub refs: Vec<ObjectId>,
    pub tags: Vec<Tag>,
}

impl Way {
    pub fn new(id: ObjectId) -> Self {
        Way {
            id,
            refs: Vec::new(),
            tags: Vec::new(),
        }
    }

    pub fn with_ref(mut self, node_id: ObjectId) -> Self {
        self.refs.push(node_id);
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.push(Tag::new(key, value));
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relation {
    pub id: ObjectId,
    pub members: Vec<Member>,
    pub tags: Vec<Tag>,
}

impl Relation {
    pub fn new(id: ObjectId) -> Self {
        Relation {
            id,
            members: Vec::new(),
            tags: Vec::new(),
        }
    }

    pub fn with_member(
        mut self,
        item_type: ItemType,
        id: ObjectId,
        role: impl Into<String>,
    ) -> Self {
        self.members.push(Member::new(item_type, id, role));
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.push(Tag::new(key, value));
        self
    }

    /// Looks up the first tag with the given key.
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|t| t.key == key)
            .map(|t| t.value.as_str())
    }
}

/// Any OSM object, as produced by the input stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OsmObject {
    Node(Node),
    Way(Way),
    Relation(Relation),
}

impl OsmObject {
    #[inline]
    pub fn item_type(&self) -> ItemType {
        match self {
            OsmObject::Node(_) => ItemType::Node,
            OsmObject::Way(_) => ItemType::Way,
            OsmObject::Relation(_) => ItemType::Relation,
        }
    }

    #[inline]
    pub fn id(&self) -> ObjectId {
        match self {
            OsmObject::Node(n) => n.id,
            OsmObject::Way(w) => w.id,
            OsmObject::Relation(r) => r.id,
        }
    }
}

impl From<Node> for OsmObject {
    fn from(node: Node) -> Self {
        OsmObject::Node(node)
    }
}

impl From<Way> for OsmObject {
    fn from(way: Way) -> Self {
        OsmObject::Way(way)
    }
}

impl From<Relation> for OsmObject {
    fn from(relation: Relation) -> Self {
        OsmObject::Relation(relation)
    }
}

/// Implemented by the three concrete object types. Lets code that works on a
/// single member type (notably `MembersDatabase`) stay statically typed.
pub trait OsmElement: Clone {
    const ITEM_TYPE: ItemType;

    fn id(&self) -> ObjectId;
}

impl OsmElement for Node {
    const ITEM_TYPE: ItemType = ItemType::Node;

    fn id(&self) -> ObjectId {
        self.id
    }
}

impl OsmElement for Way {
    const ITEM_TYPE: ItemType = ItemType::Way;

    fn id(&self) -> ObjectId {
        self.id
    }
}

impl OsmElement for Relation {
    const ITEM_TYPE: ItemType = ItemType::Relation;

    fn id(&self) -> ObjectId {
        self.id
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_builders() {
        let relation = Relation::new(20)
            .with_member(ItemType::Way, 10, "outer")
            .with_member(ItemType::Way, 11, "inner")
            .with_tag("type", "multipolygon");

        assert_eq!(relation.members.len(), 2);
        assert_eq!(relation.members[0].id, 10);
        assert_eq!(relation.members[1].role, "inner");
        assert_eq!(relation.tag("type"), Some("multipolygon"));
        assert_eq!(relation.tag("name"), None);

        let obj = OsmObject::from(relation);
        assert_eq!(obj.item_type(), ItemType::Relation);
        assert_eq!(obj.id(), 20);
    }

    #[test]
    fn test_item_type_tags() {
        for t in [ItemType::Node, ItemType::Way, ItemType::Relation] {
            assert_eq!(ItemType::from_u8(t.as_u8()), t);
        }
    }
}
