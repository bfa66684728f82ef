//! Flat little-endian encoding of OSM objects and lazy views over it.
//!
//! The arenas store payloads produced by [`encode`]; readers never decode a
//! whole object up front. Instead the view types walk the raw bytes on
//! access, so a completion hook that only looks at one member pays only for
//! that member.
//!
//! Payload layouts (all integers little-endian, strings UTF-8):
//!
//! ```text
//! node:     lat:i32 lon:i32 tags
//! way:      nrefs:u32 (ref:i64)* tags
//! relation: nmembers:u32 (kind:u8 role_len:u16 id:i64 role)* tags
//! tags:     ntags:u32 (klen:u16 key vlen:u16 value)*
//! ```

use byteorder::{ByteOrder, LittleEndian};

use crate::osm::{ItemType, Member, Node, ObjectId, OsmObject, Relation, Tag, Way};

fn put_u16(out: &mut Vec<u8>, value: usize) {
    let value = u16::try_from(value).expect("string longer than 64 KiB");
    out.extend_from_slice(&value.to_le_bytes());
}

fn put_u32(out: &mut Vec<u8>, value: usize) {
    let value = u32::try_from(value).expect("list longer than 4G entries");
    out.extend_from_slice(&value.to_le_bytes());
}

fn put_tags(out: &mut Vec<u8>, tags: &[Tag]) {
    put_u32(out, tags.len());
    for tag in tags {
        put_u16(out, tag.key.len());
        out.extend_from_slice(tag.key.as_bytes());
        put_u16(out, tag.value.len());
        out.extend_from_slice(tag.value.as_bytes());
    }
}

/// Appends the payload of `object` to `out`. The object id and kind are not
/// part of the payload; the arena keeps them in its record header.
pub(crate) fn encode(object: &OsmObject, out: &mut Vec<u8>) {
    match object {
        OsmObject::Node(node) => {
            out.extend_from_slice(&node.lat.to_le_bytes());
            out.extend_from_slice(&node.lon.to_le_bytes());
            put_tags(out, &node.tags);
        }
        OsmObject::Way(way) => {
            put_u32(out, way.refs.len());
            for node_ref in &way.refs {
                out.extend_from_slice(&node_ref.to_le_bytes());
            }
            put_tags(out, &way.tags);
        }
        OsmObject::Relation(relation) => {
            put_u32(out, relation.members.len());
            for member in &relation.members {
                out.push(member.item_type.as_u8());
                put_u16(out, member.role.len());
                out.extend_from_slice(&member.id.to_le_bytes());
                out.extend_from_slice(member.role.as_bytes());
            }
            put_tags(out, &relation.tags);
        }
    }
}

fn str_at(data: &[u8], start: usize, len: usize) -> &str {
    std::str::from_utf8(&data[start..start + len]).expect("corrupt arena payload")
}

/// A read-only view of one stored object.
#[derive(Clone, Copy)]
pub struct ObjectView<'a> {
    kind: ItemType,
    id: ObjectId,
    payload: &'a [u8],
}

impl<'a> ObjectView<'a> {
    pub(crate) fn new(kind: ItemType, id: ObjectId, payload: &'a [u8]) -> Self {
        ObjectView { kind, id, payload }
    }

    #[inline]
    pub fn item_type(&self) -> ItemType {
        self.kind
    }

    #[inline]
    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn as_node(&self) -> Option<NodeView<'a>> {
        match self.kind {
            ItemType::Node => Some(NodeView { view: *self }),
            _ => None,
        }
    }

    pub fn as_way(&self) -> Option<WayView<'a>> {
        match self.kind {
            ItemType::Way => Some(WayView { view: *self }),
            _ => None,
        }
    }

    pub fn as_relation(&self) -> Option<RelationView<'a>> {
        match self.kind {
            ItemType::Relation => Some(RelationView { view: *self }),
            _ => None,
        }
    }

    /// Byte offset of the tag block within the payload.
    fn tags_start(&self) -> usize {
        match self.kind {
            ItemType::Node => 8,
            ItemType::Way => {
                let nrefs = LittleEndian::read_u32(&self.payload[0..]) as usize;
                4 + nrefs * 8
            }
            ItemType::Relation => {
                let nmembers = LittleEndian::read_u32(&self.payload[0..]) as usize;
                let mut pos = 4;
                for _ in 0..nmembers {
                    let role_len = LittleEndian::read_u16(&self.payload[pos + 1..]) as usize;
                    pos += 1 + 2 + 8 + role_len;
                }
                pos
            }
        }
    }

    pub fn tags(&self) -> TagIter<'a> {
        let start = self.tags_start();
        let remaining = LittleEndian::read_u32(&self.payload[start..]) as usize;
        TagIter {
            payload: self.payload,
            pos: start + 4,
            remaining,
        }
    }

    /// Decodes the full object into an owned value.
    pub fn to_object(&self) -> OsmObject {
        let tags: Vec<Tag> = self
            .tags()
            .map(|(k, v)| Tag::new(k.to_string(), v.to_string()))
            .collect();
        match self.kind {
            ItemType::Node => {
                let view = self.as_node().unwrap();
                OsmObject::Node(Node {
                    id: self.id,
                    lat: view.lat(),
                    lon: view.lon(),
                    tags,
                })
            }
            ItemType::Way => {
                let view = self.as_way().unwrap();
                OsmObject::Way(Way {
                    id: self.id,
                    refs: view.refs().collect(),
                    tags,
                })
            }
            ItemType::Relation => {
                let view = self.as_relation().unwrap();
                OsmObject::Relation(Relation {
                    id: self.id,
                    members: view
                        .members()
                        .map(|m| Member::new(m.item_type, m.id, m.role.to_string()))
                        .collect(),
                    tags,
                })
            }
        }
    }
}

#[derive(Clone, Copy)]
pub struct NodeView<'a> {
    view: ObjectView<'a>,
}

impl<'a> NodeView<'a> {
    #[inline]
    pub fn id(&self) -> ObjectId {
        self.view.id
    }

    #[inline]
    pub fn lat(&self) -> i32 {
        LittleEndian::read_i32(&self.view.payload[0..])
    }

    #[inline]
    pub fn lon(&self) -> i32 {
        LittleEndian::read_i32(&self.view.payload[4..])
    }

    pub fn tags(&self) -> TagIter<'a> {
        self.view.tags()
    }
}

#[derive(Clone, Copy)]
pub struct WayView<'a> {
    view: ObjectView<'a>,
}

impl<'a> WayView<'a> {
    #[inline]
    pub fn id(&self) -> ObjectId {
        self.view.id
    }

    /// Node refs in way order.
    pub fn refs(&self) -> impl ExactSizeIterator<Item = ObjectId> + 'a {
        let payload = self.view.payload;
        let nrefs = LittleEndian::read_u32(&payload[0..]) as usize;
        (0..nrefs).map(move |i| LittleEndian::read_i64(&payload[4 + i * 8..]))
    }

    pub fn tags(&self) -> TagIter<'a> {
        self.view.tags()
    }
}

#[derive(Clone, Copy)]
pub struct RelationView<'a> {
    view: ObjectView<'a>,
}

impl<'a> RelationView<'a> {
    #[inline]
    pub fn id(&self) -> ObjectId {
        self.view.id
    }

    pub fn members(&self) -> MemberIter<'a> {
        let remaining = LittleEndian::read_u32(&self.view.payload[0..]) as usize;
        MemberIter {
            payload: self.view.payload,
            pos: 4,
            remaining,
        }
    }

    pub fn tags(&self) -> TagIter<'a> {
        self.view.tags()
    }
}

/// One member as stored, with the role borrowed from the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemberRef<'a> {
    pub item_type: ItemType,
    pub id: ObjectId,
    pub role: &'a str,
}

pub struct MemberIter<'a> {
    payload: &'a [u8],
    pos: usize,
    remaining: usize,
}

impl<'a> Iterator for MemberIter<'a> {
    type Item = MemberRef<'a>;

    fn next(&mut self) -> Option<MemberRef<'a>> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let kind = ItemType::from_u8(self.payload[self.pos]);
        let role_len = LittleEndian::read_u16(&self.payload[self.pos + 1..]) as usize;
        let id = LittleEndian::read_i64(&self.payload[self.pos + 3..]);
        let role = str_at(self.payload, self.pos + 11, role_len);
        self.pos += 11 + role_len;
        Some(MemberRef {
            item_type: kind,
            id,
            role,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for MemberIter<'_> {}

pub struct TagIter<'a> {
    payload: &'a [u8],
    pos: usize,
    remaining: usize,
}

impl<'a> Iterator for TagIter<'a> {
    type Item = (&'a str, &'a str);

    fn next(&mut self) -> Option<(&'a str, &'a str)> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let klen = LittleEndian::read_u16(&self.payload[self.pos..]) as usize;
        let key = str_at(self.payload, self.pos + 2, klen);
        self.pos += 2 + klen;
        let vlen = LittleEndian::read_u16(&self.payload[self.pos..]) as usize;
        let value = str_at(self.payload, self.pos + 2, vlen);
        self.pos += 2 + vlen;
        Some((key, value))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for TagIter<'_> {}

#[cfg(test)]
mod test {
    use super::*;

    fn view_of<'a>(object: &OsmObject, buf: &'a mut Vec<u8>) -> ObjectView<'a> {
        encode(object, buf);
        ObjectView::new(object.item_type(), object.id(), buf)
    }

    #[test]
    fn test_relation_view() {
        let relation = Relation::new(22)
            .with_member(ItemType::Way, 13, "outer")
            .with_member(ItemType::Node, 7, "admin_centre")
            .with_member(ItemType::Way, 14, "inner")
            .with_tag("type", "multipolygon");

        let mut buf = Vec::new();
        let view = view_of(&relation.clone().into(), &mut buf);
        let rel = view.as_relation().unwrap();
        assert!(view.as_way().is_none());

        let members: Vec<_> = rel.members().collect();
        assert_eq!(members.len(), 3);
        assert_eq!(members[0].id, 13);
        assert_eq!(members[1].item_type, ItemType::Node);
        assert_eq!(members[1].role, "admin_centre");
        assert_eq!(members[2].role, "inner");

        let tags: Vec<_> = rel.tags().collect();
        assert_eq!(tags, vec![("type", "multipolygon")]);

        assert_eq!(view.to_object(), OsmObject::Relation(relation));
    }

    #[test]
    fn test_way_and_node_views() {
        let way = Way::new(10).with_ref(1).with_ref(2).with_ref(3);
        let mut buf = Vec::new();
        let view = view_of(&way.into(), &mut buf);
        let refs: Vec<_> = view.as_way().unwrap().refs().collect();
        assert_eq!(refs, vec![1, 2, 3]);
        assert_eq!(view.tags().count(), 0);

        let node = Node::new(7, 515_000_000, -1_250_000).with_tag("place", "city");
        let mut buf = Vec::new();
        let view = view_of(&node.into(), &mut buf);
        let n = view.as_node().unwrap();
        assert_eq!((n.lat(), n.lon()), (515_000_000, -1_250_000));
        assert_eq!(n.tags().next(), Some(("place", "city")));
    }
}
