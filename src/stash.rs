//! Handle-indexed object store.
//!
//! Handles are slot index plus generation. Removing an item frees its slot
//! for reuse and bumps the generation, so a handle kept past the removal is
//! detected instead of silently reading the slot's new occupant.

use std::fmt;
use std::mem;

/// Opaque handle into an [`ItemStash`]. Fits in a machine word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle {
    index: u32,
    generation: u32,
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

struct Slot<T> {
    generation: u32,
    item: Option<T>,
}

pub struct ItemStash<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    count: usize,
}

impl<T> Default for ItemStash<T> {
    fn default() -> Self {
        ItemStash {
            slots: Vec::new(),
            free: Vec::new(),
            count: 0,
        }
    }
}

impl<T> ItemStash<T> {
    pub fn new() -> Self {
        Default::default()
    }

    /// Number of live items.
    #[inline]
    pub fn len(&self) -> usize {
        self.count
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Stores `item` and returns a stable handle for it.
    pub fn add(&mut self, item: T) -> Handle {
        self.count += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            debug_assert!(slot.item.is_none());
            slot.item = Some(item);
            return Handle {
                index,
                generation: slot.generation,
            };
        }
        let index = u32::try_from(self.slots.len()).expect("stash exhausted");
        self.slots.push(Slot {
            generation: 0,
            item: Some(item),
        });
        Handle {
            index,
            generation: 0,
        }
    }

    fn slot(&self, handle: Handle) -> &Slot<T> {
        let slot = &self.slots[handle.index as usize];
        assert!(
            slot.generation == handle.generation && slot.item.is_some(),
            "stale stash handle {}",
            handle
        );
        slot
    }

    pub fn get(&self, handle: Handle) -> &T {
        self.slot(handle).item.as_ref().unwrap()
    }

    pub fn get_mut(&mut self, handle: Handle) -> &mut T {
        self.slot(handle);
        self.slots[handle.index as usize].item.as_mut().unwrap()
    }

    /// Releases the item behind `handle`. The handle value is dead
    /// afterwards; a later `add` may reuse the slot under a new generation.
    pub fn remove(&mut self, handle: Handle) -> T {
        self.slot(handle);
        let slot = &mut self.slots[handle.index as usize];
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        self.count -= 1;
        mem::take(&mut slot.item).unwrap()
    }

    /// Rough memory footprint of the slot table, for telemetry. Does not
    /// include heap owned by the items themselves.
    pub fn used_memory(&self) -> usize {
        self.slots.capacity() * mem::size_of::<Slot<T>>()
            + self.free.capacity() * mem::size_of::<u32>()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_add_get_remove() {
        let mut stash = ItemStash::new();
        let a = stash.add("a".to_string());
        let b = stash.add("b".to_string());
        assert_eq!(stash.len(), 2);
        assert_eq!(stash.get(a), "a");
        assert_eq!(stash.get(b), "b");

        assert_eq!(stash.remove(a), "a");
        assert_eq!(stash.len(), 1);
        // b survives a's removal
        assert_eq!(stash.get(b), "b");
    }

    #[test]
    fn test_slot_reuse_changes_generation() {
        let mut stash = ItemStash::new();
        let a = stash.add(1);
        stash.remove(a);
        let c = stash.add(3);
        // slot was reused, but the handle differs
        assert_ne!(a, c);
        assert_eq!(*stash.get(c), 3);
    }

    #[test]
    #[should_panic(expected = "stale stash handle")]
    fn test_stale_handle_panics() {
        let mut stash = ItemStash::new();
        let a = stash.add(1);
        stash.remove(a);
        stash.get(a);
    }

    #[test]
    #[should_panic(expected = "stale stash handle")]
    fn test_reused_slot_rejects_old_handle() {
        let mut stash = ItemStash::new();
        let a = stash.add(1);
        stash.remove(a);
        stash.add(2);
        stash.get(a);
    }
}
