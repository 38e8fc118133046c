// SPDX-License-Identifier: Apache-2.0
//! Identifier types for graph objects, subscriptions, and the tick counter.
//!
//! Block, property, and binding ids are generational arena keys: stable for
//! the lifetime of the object they name, and permanently stale afterwards.
//! They are plain `Copy` data, safe to store in back-links, scheduler queues,
//! snapshots of listener sets, and external subscription records.

use core::fmt;

use crate::arena::{ArenaKey, RawId};

/// Identifier of a [`crate::Block`].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct BlockId(RawId);

impl ArenaKey for BlockId {
    fn from_raw(raw: RawId) -> Self {
        Self(raw)
    }
    fn raw(self) -> RawId {
        self.0
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "block:{}", self.0)
    }
}

/// Identifier of a [`crate::Property`].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct PropId(RawId);

impl ArenaKey for PropId {
    fn from_raw(raw: RawId) -> Self {
        Self(raw)
    }
    fn raw(self) -> RawId {
        self.0
    }
}

impl fmt::Display for PropId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "prop:{}", self.0)
    }
}

/// Identifier of one segment node in a binding chain.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct BindingId(RawId);

impl ArenaKey for BindingId {
    fn from_raw(raw: RawId) -> Self {
        Self(raw)
    }
    fn raw(self) -> RawId {
        self.0
    }
}

impl fmt::Display for BindingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bind:{}", self.0)
    }
}

/// Handle for an external subscription registered through
/// [`crate::Runtime::subscribe`] or [`crate::Runtime::watch_children`].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct SubId(pub(crate) u64);

impl fmt::Display for SubId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub:{}", self.0)
    }
}

/// Scheduler pass counter. Advances exactly once per completed pass and
/// stamps every [`crate::Event`] token minted during that pass.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default)]
pub struct Tick(pub(crate) u64);

impl Tick {
    /// Raw counter value.
    #[must_use]
    pub fn value(self) -> u64 {
        self.0
    }

    /// The tick after this one.
    #[must_use]
    pub fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

impl fmt::Display for Tick {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_next_increments() {
        let t = Tick(4);
        assert_eq!(t.next().value(), 5);
    }

    #[test]
    fn ids_display_with_kind_prefix() {
        let raw = RawId {
            index: 3,
            generation: 2,
        };
        assert_eq!(BlockId::from_raw(raw).to_string(), "block:3.2");
        assert_eq!(PropId::from_raw(raw).to_string(), "prop:3.2");
        assert_eq!(BindingId::from_raw(raw).to_string(), "bind:3.2");
    }
}
