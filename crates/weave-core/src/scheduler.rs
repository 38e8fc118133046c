// SPDX-License-Identifier: Apache-2.0
//! Cooperative priority-band scheduler.
//!
//! Three strictly ordered bands: band 0 for pure/cheap work, band 1 for
//! heavier synchronous work, band 2 for work that may stay pending across
//! passes. `pop_next` always scans from band 0, so a band-0 block enqueued
//! while band 1 or 2 is being swept preempts the remainder of that sweep.
//!
//! Within a band, order is queue insertion order. `#priority` moves a block
//! between bands; it never reorders a band.
//!
//! A pass is one drain to empty. The tick counter advances exactly once per
//! completed pass. Blocks run at most once per pass unless explicitly
//! re-armed by a new upstream change; the dispatch budget turns a runaway
//! re-arm cycle into an error instead of a hang.

use std::collections::VecDeque;

use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::ident::{BlockId, Tick};

/// Dispatches allowed within a single pass before the pass is aborted.
/// Far above any legitimate chain depth.
pub const PASS_BUDGET: u32 = 65_536;

/// Nested synchronous runs allowed before a sync cycle is reported.
pub const SYNC_DEPTH_LIMIT: u8 = 64;

/// Scheduler failures. Both indicate a graph bug, not an engine bug.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchedError {
    /// A re-arm cycle kept dispatching within one pass.
    #[error("pass dispatch budget exhausted ({limit} runs): runaway re-arm cycle")]
    PassBudgetExhausted {
        /// The budget that was exceeded.
        limit: u32,
    },
    /// Sync-mode blocks recursed into each other past the depth limit.
    #[error("synchronous run depth exceeded ({limit}): sync-mode cycle")]
    SyncDepthExceeded {
        /// The depth that was exceeded.
        limit: u8,
    },
}

/// Execution priority band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Band {
    /// Band 0: pure, cheap, drained first.
    Fast,
    /// Band 1: ordinary synchronous work.
    #[default]
    Normal,
    /// Band 2: may remain pending across passes.
    Deferred,
}

impl Band {
    /// Queue index of the band.
    #[must_use]
    pub fn index(self) -> usize {
        match self {
            Self::Fast => 0,
            Self::Normal => 1,
            Self::Deferred => 2,
        }
    }

    /// Maps a `#priority` value onto a band, clamping out-of-range values.
    #[must_use]
    pub fn from_priority(value: i64) -> Self {
        match value {
            i64::MIN..=0 => Self::Fast,
            1 => Self::Normal,
            _ => Self::Deferred,
        }
    }
}

/// Generation-stamped membership set. Clearing is O(1): the generation is
/// bumped and stale marks are ignored. The backing map is purged once it
/// grows past a threshold so long-lived runtimes don't accumulate marks for
/// dead blocks.
#[derive(Debug, Default)]
pub(crate) struct PassSet {
    generation: u32,
    marks: FxHashMap<BlockId, u32>,
}

const PASS_SET_PURGE: usize = 4096;

impl PassSet {
    /// Marks `block`; returns false if already marked this generation.
    pub(crate) fn mark(&mut self, block: BlockId) -> bool {
        self.marks.insert(block, self.generation) != Some(self.generation)
    }

    pub(crate) fn contains(&self, block: BlockId) -> bool {
        self.marks.get(&block) == Some(&self.generation)
    }

    pub(crate) fn unmark(&mut self, block: BlockId) {
        self.marks.remove(&block);
    }

    /// Invalidates every mark.
    pub(crate) fn clear(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        if self.marks.len() > PASS_SET_PURGE {
            self.marks.clear();
        }
    }
}

/// The three-band queue.
#[derive(Debug, Default)]
pub struct Scheduler {
    queues: [VecDeque<BlockId>; 3],
    queued: PassSet,
    ran: PassSet,
    parked: Vec<(BlockId, Band)>,
    tick: Tick,
    dispatched: u32,
}

impl Scheduler {
    /// Creates an empty scheduler at tick zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current tick.
    #[must_use]
    pub fn tick(&self) -> Tick {
        self.tick
    }

    /// True when no block is queued in any band.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.queues.iter().all(VecDeque::is_empty)
    }

    /// Enqueues `block` in `band` unless it is already queued or parked.
    /// Returns true when newly queued. Parked blocks refuse normal
    /// scheduling; they re-enter only through [`Self::take_parked`].
    pub fn schedule(&mut self, block: BlockId, band: Band) -> bool {
        if self.is_parked(block) || !self.queued.mark(block) {
            return false;
        }
        self.queues[band.index()].push_back(block);
        true
    }

    /// True when `block` sits in the parked list.
    #[must_use]
    pub fn is_parked(&self, block: BlockId) -> bool {
        self.parked.iter().any(|(b, _)| *b == block)
    }

    /// Next block to run: the front of the lowest non-empty band. Charges
    /// the pass budget.
    pub fn pop_next(&mut self) -> Result<Option<(BlockId, Band)>, SchedError> {
        for band in [Band::Fast, Band::Normal, Band::Deferred] {
            if let Some(block) = self.queues[band.index()].pop_front() {
                self.queued.unmark(block);
                self.dispatched += 1;
                if self.dispatched > PASS_BUDGET {
                    return Err(SchedError::PassBudgetExhausted { limit: PASS_BUDGET });
                }
                return Ok(Some((block, band)));
            }
        }
        Ok(None)
    }

    /// Records that `block` completed a run in this pass.
    pub fn note_ran(&mut self, block: BlockId) {
        self.ran.mark(block);
    }

    /// True when `block` already ran this pass and has not been re-armed.
    #[must_use]
    pub fn ran_this_pass(&self, block: BlockId) -> bool {
        self.ran.contains(block)
    }

    /// Re-arms `block`: a new upstream change makes it eligible to run
    /// again within the same pass.
    pub fn re_arm(&mut self, block: BlockId) {
        self.ran.unmark(block);
    }

    /// Parks a block whose run returned pending. Parked blocks re-enter the
    /// queues only through [`Self::take_parked`].
    pub fn park(&mut self, block: BlockId, band: Band) {
        if !self.parked.iter().any(|(b, _)| *b == block) {
            self.parked.push((block, band));
        }
    }

    /// Number of parked blocks.
    #[must_use]
    pub fn parked_len(&self) -> usize {
        self.parked.len()
    }

    /// Drains the parked list for re-scheduling.
    pub fn take_parked(&mut self) -> Vec<(BlockId, Band)> {
        std::mem::take(&mut self.parked)
    }

    /// Drops a destroyed block from the parked list. Queue entries are left
    /// alone; dispatch skips dead ids.
    pub(crate) fn forget(&mut self, block: BlockId) {
        self.parked.retain(|(b, _)| *b != block);
    }

    /// Completes a pass: advances the tick, forgets per-pass run marks, and
    /// resets the dispatch budget.
    pub fn pass_done(&mut self) {
        debug_assert!(self.is_idle(), "a pass must drain every band");
        self.tick = self.tick.next();
        self.ran.clear();
        self.queued.clear();
        self.dispatched = 0;
    }
}
