//! Generational arena for scheduler records.
//!
//! Tasks and I/O registrations are identified by stable `(index, generation)`
//! pairs minted at insertion, never by raw pointers or object addresses. The
//! generation counter makes a stale id resolve to `None` instead of aliasing
//! whatever record reused the slot.

use core::fmt;

/// An index into an [`Arena`], tagged with the slot's generation.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArenaIndex {
    index: u32,
    generation: u32,
}

impl ArenaIndex {
    /// Creates an index from raw parts (primarily for tests).
    #[must_use]
    pub const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Raw slot index.
    #[must_use]
    pub const fn index(self) -> u32 {
        self.index
    }

    /// Slot generation at mint time.
    #[must_use]
    pub const fn generation(self) -> u32 {
        self.generation
    }

    /// Packs the index into a single integer, usable as a poller key.
    #[must_use]
    pub const fn packed(self) -> u64 {
        (self.index as u64) << 32 | self.generation as u64
    }

    /// Reverses [`packed`](Self::packed).
    #[must_use]
    pub const fn from_packed(key: u64) -> Self {
        Self {
            index: (key >> 32) as u32,
            generation: key as u32,
        }
    }
}

impl fmt::Debug for ArenaIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.index, self.generation)
    }
}

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// A slab of records with generation-checked access.
pub struct Arena<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    len: usize,
}

impl<T> Arena<T> {
    /// Creates an empty arena.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
        }
    }

    /// Number of live records.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns true if no records are live.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Inserts a record and mints its index.
    pub fn insert(&mut self, value: T) -> ArenaIndex {
        self.len += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            debug_assert!(slot.value.is_none());
            slot.value = Some(value);
            ArenaIndex {
                index,
                generation: slot.generation,
            }
        } else {
            let index = u32::try_from(self.slots.len()).expect("arena overflow");
            self.slots.push(Slot {
                generation: 0,
                value: Some(value),
            });
            ArenaIndex {
                index,
                generation: 0,
            }
        }
    }

    /// Removes and returns the record, if `index` is still live.
    pub fn remove(&mut self, index: ArenaIndex) -> Option<T> {
        let slot = self.slots.get_mut(index.index as usize)?;
        if slot.generation != index.generation || slot.value.is_none() {
            return None;
        }
        let value = slot.value.take();
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(index.index);
        self.len -= 1;
        value
    }

    /// Borrow the record at `index`, if live.
    #[must_use]
    pub fn get(&self, index: ArenaIndex) -> Option<&T> {
        let slot = self.slots.get(index.index as usize)?;
        if slot.generation == index.generation {
            slot.value.as_ref()
        } else {
            None
        }
    }

    /// Mutably borrow the record at `index`, if live.
    pub fn get_mut(&mut self, index: ArenaIndex) -> Option<&mut T> {
        let slot = self.slots.get_mut(index.index as usize)?;
        if slot.generation == index.generation {
            slot.value.as_mut()
        } else {
            None
        }
    }

    /// Returns true if `index` refers to a live record.
    #[must_use]
    pub fn contains(&self, index: ArenaIndex) -> bool {
        self.get(index).is_some()
    }

    /// Iterates over live records.
    pub fn iter(&self) -> impl Iterator<Item = (ArenaIndex, &T)> {
        self.slots.iter().enumerate().filter_map(|(i, slot)| {
            slot.value.as_ref().map(|value| {
                (
                    ArenaIndex {
                        index: i as u32,
                        generation: slot.generation,
                    },
                    value,
                )
            })
        })
    }
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Arena<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Arena").field("len", &self.len).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_get_remove() {
        let mut arena = Arena::new();
        let a = arena.insert("a");
        let b = arena.insert("b");
        assert_eq!(arena.get(a), Some(&"a"));
        assert_eq!(arena.remove(a), Some("a"));
        assert_eq!(arena.get(a), None);
        assert_eq!(arena.get(b), Some(&"b"));
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn stale_index_does_not_alias_reused_slot() {
        let mut arena = Arena::new();
        let a = arena.insert(1);
        arena.remove(a);
        let b = arena.insert(2);
        assert_eq!(a.index(), b.index());
        assert_ne!(a.generation(), b.generation());
        assert_eq!(arena.get(a), None);
        assert_eq!(arena.remove(a), None);
        assert_eq!(arena.get(b), Some(&2));
    }

    #[test]
    fn packed_is_unique_per_generation() {
        let a = ArenaIndex::new(3, 0);
        let b = ArenaIndex::new(3, 1);
        assert_ne!(a.packed(), b.packed());
        assert_eq!(ArenaIndex::from_packed(a.packed()), a);
        assert_eq!(ArenaIndex::from_packed(b.packed()), b);
    }
}
