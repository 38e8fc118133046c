// SPDX-License-Identifier: Apache-2.0
//! Per-flow undo history: a bounded ring of snapshot checkpoints.
//!
//! Checkpoints are deduplicated by content digest, so recording the same
//! state twice in a row is free. Undo and redo only hand back the snapshot
//! to restore; the runtime applies it through `live_update` so unchanged
//! runtime state survives the restore.

use crate::snapshot::{digest, SnapshotMap};

/// Default number of checkpoints a flow keeps.
pub const DEFAULT_HISTORY_CAP: usize = 64;

#[derive(Debug, Clone)]
struct Checkpoint {
    digest: String,
    map: SnapshotMap,
}

/// Bounded checkpoint ring with a cursor.
#[derive(Debug, Clone)]
pub struct History {
    entries: Vec<Checkpoint>,
    /// Index of the checkpoint describing the current state, when any.
    cursor: Option<usize>,
    cap: usize,
}

impl Default for History {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_HISTORY_CAP)
    }
}

impl History {
    /// Creates a history keeping at most `cap` checkpoints.
    #[must_use]
    pub fn with_capacity(cap: usize) -> Self {
        Self {
            entries: Vec::new(),
            cursor: None,
            cap: cap.max(1),
        }
    }

    /// Number of stored checkpoints.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no checkpoint is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True when an undo step is available.
    #[must_use]
    pub fn can_undo(&self) -> bool {
        self.cursor.is_some_and(|c| c > 0)
    }

    /// True when a redo step is available.
    #[must_use]
    pub fn can_redo(&self) -> bool {
        self.cursor.is_some_and(|c| c + 1 < self.entries.len())
    }

    /// Records a checkpoint of the current state.
    ///
    /// Drops any redo tail, deduplicates against the checkpoint under the
    /// cursor, and evicts the oldest entry once the ring is full. Returns
    /// true when a new checkpoint was stored.
    pub fn record(&mut self, map: SnapshotMap) -> bool {
        let d = digest(&map);
        if let Some(c) = self.cursor {
            if self.entries[c].digest == d {
                return false;
            }
            self.entries.truncate(c + 1);
        }
        self.entries.push(Checkpoint { digest: d, map });
        if self.entries.len() > self.cap {
            self.entries.remove(0);
        }
        self.cursor = Some(self.entries.len() - 1);
        true
    }

    /// Steps the cursor back and returns the snapshot to restore.
    pub fn undo(&mut self) -> Option<&SnapshotMap> {
        let c = self.cursor?;
        if c == 0 {
            return None;
        }
        self.cursor = Some(c - 1);
        Some(&self.entries[c - 1].map)
    }

    /// Steps the cursor forward and returns the snapshot to restore.
    pub fn redo(&mut self) -> Option<&SnapshotMap> {
        let c = self.cursor?;
        if c + 1 >= self.entries.len() {
            return None;
        }
        self.cursor = Some(c + 1);
        Some(&self.entries[c + 1].map)
    }
}
