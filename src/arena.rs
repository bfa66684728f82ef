//! Append-only storage for encoded OSM objects.
//!
//! Records are addressed by the byte offset returned at commit time. Offsets
//! stay valid until [`ObjectArena::purge_removed`] compacts the buffer; the
//! purge reports every survivor it moves so external indices can be
//! repaired. Removal is a tombstone flag, no bytes shift until the purge.

use byteorder::{ByteOrder, LittleEndian};
use log::debug;

use crate::codec::{self, ObjectView};
use crate::osm::{ItemType, ObjectId, OsmObject};

const HEADER_SIZE: usize = 16;
const FLAG_REMOVED: u8 = 1;

#[inline]
fn padded(len: usize) -> usize {
    (len + 7) & !7
}

/// Record header: `len:u32 kind:u8 flags:u8 pad:u16 id:i64`, then the
/// payload padded to 8 bytes. Keeping kind and id in the header lets the
/// purge report moves without decoding payloads.
#[derive(Debug, Default)]
pub struct ObjectArena {
    data: Vec<u8>,
    committed: usize,
}

impl ObjectArena {
    pub fn new() -> Self {
        Default::default()
    }

    /// Appends `object` without committing it. Returns the offset the record
    /// will have once committed. Only one write may be pending at a time.
    pub fn add_item(&mut self, object: &OsmObject) -> usize {
        assert!(
            self.data.len() == self.committed,
            "uncommitted write pending"
        );
        let offset = self.committed;

        self.data.extend_from_slice(&[0u8; HEADER_SIZE]);
        codec::encode(object, &mut self.data);
        let payload_len = self.data.len() - offset - HEADER_SIZE;
        self.data.resize(offset + HEADER_SIZE + padded(payload_len), 0);

        let header = &mut self.data[offset..offset + HEADER_SIZE];
        LittleEndian::write_u32(&mut header[0..], payload_len as u32);
        header[4] = object.item_type().as_u8();
        header[5] = 0;
        LittleEndian::write_i64(&mut header[8..], object.id());

        offset
    }

    /// Finalizes the pending write and returns its offset.
    pub fn commit(&mut self) -> usize {
        let offset = self.committed;
        self.committed = self.data.len();
        offset
    }

    /// Discards the pending write.
    pub fn rollback(&mut self) {
        self.data.truncate(self.committed);
    }

    /// Bytes of committed data.
    #[inline]
    pub fn committed(&self) -> usize {
        self.committed
    }

    /// Capacity of the backing buffer, for memory accounting.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.data.capacity()
    }

    #[inline]
    fn header(&self, offset: usize) -> &[u8] {
        assert!(
            offset + HEADER_SIZE <= self.committed,
            "offset {} past committed data",
            offset
        );
        debug_assert_eq!(offset % 8, 0, "offset {} is not a commit point", offset);
        &self.data[offset..offset + HEADER_SIZE]
    }

    /// View of the record committed at `offset`.
    pub fn get(&self, offset: usize) -> ObjectView<'_> {
        let header = self.header(offset);
        let payload_len = LittleEndian::read_u32(&header[0..]) as usize;
        let kind = ItemType::from_u8(header[4]);
        let id = LittleEndian::read_i64(&header[8..]);
        let payload = &self.data[offset + HEADER_SIZE..offset + HEADER_SIZE + payload_len];
        ObjectView::new(kind, id, payload)
    }

    /// Marks the record at `offset` as removed in place.
    pub fn set_removed(&mut self, offset: usize) {
        self.header(offset);
        self.data[offset + 5] |= FLAG_REMOVED;
    }

    pub fn is_removed(&self, offset: usize) -> bool {
        self.header(offset)[5] & FLAG_REMOVED != 0
    }

    /// Iterates committed records as `(offset, view)`, tombstoned ones
    /// included.
    pub fn iter(&self) -> impl Iterator<Item = (usize, ObjectView<'_>)> + '_ {
        let mut offset = 0;
        std::iter::from_fn(move || {
            if offset >= self.committed {
                return None;
            }
            let current = offset;
            let payload_len =
                LittleEndian::read_u32(&self.data[current..current + 4]) as usize;
            offset += HEADER_SIZE + padded(payload_len);
            Some((current, self.get(current)))
        })
    }

    /// Compacts surviving records to the front of the buffer and drops the
    /// tombstoned ones. For every survivor that moves, `on_move` receives
    /// its kind, id, old offset, and new offset. Offsets of removed records
    /// are invalid afterwards.
    pub fn purge_removed(&mut self, mut on_move: impl FnMut(ItemType, ObjectId, usize, usize)) {
        assert!(
            self.data.len() == self.committed,
            "uncommitted write pending"
        );
        let before = self.committed;
        let mut read = 0;
        let mut write = 0;
        while read < self.committed {
            let header = &self.data[read..read + HEADER_SIZE];
            let payload_len = LittleEndian::read_u32(&header[0..]) as usize;
            let removed = header[5] & FLAG_REMOVED != 0;
            let size = HEADER_SIZE + padded(payload_len);
            if !removed {
                if read != write {
                    let kind = ItemType::from_u8(header[4]);
                    let id = LittleEndian::read_i64(&header[8..]);
                    self.data.copy_within(read..read + size, write);
                    on_move(kind, id, read, write);
                }
                write += size;
            }
            read += size;
        }
        self.data.truncate(write);
        self.committed = write;
        if before != write {
            debug!("arena purge: {} -> {} committed bytes", before, write);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::osm::{Node, Way};
    use proptest::prelude::*;

    fn way(id: ObjectId) -> OsmObject {
        Way::new(id).with_ref(id * 10).with_ref(id * 10 + 1).into()
    }

    #[test]
    fn test_commit_and_get() {
        let mut arena = ObjectArena::new();
        arena.add_item(&way(10));
        let a = arena.commit();
        arena.add_item(&Node::new(7, 1, 2).into());
        let b = arena.commit();

        assert_eq!(arena.get(a).id(), 10);
        assert_eq!(arena.get(a).item_type(), ItemType::Way);
        assert_eq!(arena.get(b).id(), 7);
        assert!(b > a);
    }

    #[test]
    fn test_rollback_discards() {
        let mut arena = ObjectArena::new();
        arena.add_item(&way(10));
        arena.commit();
        let committed = arena.committed();

        arena.add_item(&way(11));
        arena.rollback();
        assert_eq!(arena.committed(), committed);

        // the slot is reusable after a rollback
        arena.add_item(&way(12));
        let offset = arena.commit();
        assert_eq!(arena.get(offset).id(), 12);
    }

    #[test]
    #[should_panic(expected = "past committed data")]
    fn test_get_past_committed_panics() {
        let mut arena = ObjectArena::new();
        arena.add_item(&way(10));
        // not committed
        arena.get(0);
    }

    #[test]
    fn test_purge_compacts_and_reports_moves() {
        let mut arena = ObjectArena::new();
        let offsets: Vec<usize> = (0..5)
            .map(|i| {
                arena.add_item(&way(i));
                arena.commit()
            })
            .collect();

        arena.set_removed(offsets[0]);
        arena.set_removed(offsets[3]);
        assert!(arena.is_removed(offsets[0]));
        assert!(!arena.is_removed(offsets[1]));

        let mut moves = Vec::new();
        arena.purge_removed(|kind, id, old, new| {
            assert_eq!(kind, ItemType::Way);
            moves.push((id, old, new));
        });

        // survivors 1, 2, 4 compacted to the front in order
        let ids: Vec<ObjectId> = arena.iter().map(|(_, v)| v.id()).collect();
        assert_eq!(ids, vec![1, 2, 4]);
        for (id, _, new) in &moves {
            assert_eq!(arena.get(*new).id(), *id);
        }
        // record 1 and 2 moved down by one slot, record 4 by two
        assert_eq!(moves.len(), 3);
    }

    proptest! {
        #[test]
        fn purge_is_idempotent(removed in prop::collection::vec(any::<bool>(), 1..40)) {
            let mut arena = ObjectArena::new();
            let offsets: Vec<usize> = (0..removed.len() as ObjectId)
                .map(|i| {
                    arena.add_item(&way(i));
                    arena.commit()
                })
                .collect();
            for (offset, remove) in offsets.iter().zip(&removed) {
                if *remove {
                    arena.set_removed(*offset);
                }
            }

            arena.purge_removed(|_, _, _, _| ());
            let after_first: Vec<(usize, ObjectId)> =
                arena.iter().map(|(o, v)| (o, v.id())).collect();

            arena.purge_removed(|_, _, old, _| panic!("moved {} in second purge", old));
            let after_second: Vec<(usize, ObjectId)> =
                arena.iter().map(|(o, v)| (o, v.id())).collect();

            prop_assert_eq!(after_first, after_second);
        }
    }
}
