// SPDX-License-Identifier: Apache-2.0
//! Generational slot arena backing the block/property/binding stores.
//!
//! Every graph object lives in an [`Arena`] and is addressed by a typed key
//! carrying a slot index plus a generation counter. Removing an object bumps
//! the slot generation, so keys held elsewhere (back-links, scheduler queues,
//! subscriptions) go stale instead of aliasing a later occupant of the slot.

use core::fmt;
use core::marker::PhantomData;

/// Untyped (index, generation) pair shared by all arena keys.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct RawId {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl fmt::Display for RawId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.index, self.generation)
    }
}

/// Typed arena key. Implemented by the id newtypes in [`crate::ident`].
pub trait ArenaKey: Copy + Eq {
    /// Wraps a raw (index, generation) pair.
    fn from_raw(raw: RawId) -> Self;
    /// Unwraps the raw pair.
    fn raw(self) -> RawId;
}

struct Slot<T> {
    generation: u32,
    entry: Option<T>,
}

/// Generational arena. Slots are reused after removal; stale keys are
/// rejected by the generation check on every access.
pub struct Arena<K, T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    len: usize,
    _key: PhantomData<K>,
}

impl<K, T> Default for Arena<K, T> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
            _key: PhantomData,
        }
    }
}

impl<K: ArenaKey, T> Arena<K, T> {
    /// Creates an empty arena.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True when no entries are live.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Inserts a value and returns its key. Freed slots are reused with the
    /// generation that was bumped at removal time.
    pub fn insert(&mut self, value: T) -> K {
        self.len += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            debug_assert!(slot.entry.is_none(), "free list pointed at a live slot");
            slot.entry = Some(value);
            return K::from_raw(RawId {
                index,
                generation: slot.generation,
            });
        }
        let index = u32::try_from(self.slots.len()).unwrap_or(u32::MAX);
        debug_assert!(index != u32::MAX, "arena exceeded u32 slot capacity");
        self.slots.push(Slot {
            generation: 1,
            entry: Some(value),
        });
        K::from_raw(RawId {
            index,
            generation: 1,
        })
    }

    fn slot(&self, key: K) -> Option<&Slot<T>> {
        let raw = key.raw();
        self.slots
            .get(raw.index as usize)
            .filter(|s| s.generation == raw.generation)
    }

    /// Returns the entry for `key`, or `None` when the key is stale or unknown.
    pub fn get(&self, key: K) -> Option<&T> {
        self.slot(key).and_then(|s| s.entry.as_ref())
    }

    /// Mutable access to the entry for `key`.
    pub fn get_mut(&mut self, key: K) -> Option<&mut T> {
        let raw = key.raw();
        self.slots
            .get_mut(raw.index as usize)
            .filter(|s| s.generation == raw.generation)
            .and_then(|s| s.entry.as_mut())
    }

    /// True when `key` addresses a live entry.
    pub fn contains(&self, key: K) -> bool {
        self.slot(key).is_some_and(|s| s.entry.is_some())
    }

    /// Removes and returns the entry for `key`, bumping the slot generation
    /// so the key (and any copies of it) can never resolve again.
    pub fn remove(&mut self, key: K) -> Option<T> {
        let raw = key.raw();
        let slot = self
            .slots
            .get_mut(raw.index as usize)
            .filter(|s| s.generation == raw.generation)?;
        let entry = slot.entry.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(raw.index);
        self.len -= 1;
        Some(entry)
    }

    /// Iterates over live entries in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (K, &T)> {
        self.slots.iter().enumerate().filter_map(|(i, s)| {
            let entry = s.entry.as_ref()?;
            let key = K::from_raw(RawId {
                index: u32::try_from(i).unwrap_or(u32::MAX),
                generation: s.generation,
            });
            Some((key, entry))
        })
    }

    /// Keys of live entries in slot order, collected so callers can mutate
    /// the arena while walking.
    pub fn keys(&self) -> Vec<K> {
        self.iter().map(|(k, _)| k).collect()
    }
}
