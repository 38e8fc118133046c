// SPDX-License-Identifier: Apache-2.0
//! Flow state: the extra state carried by namespace-bounding blocks.
//!
//! A flow bounds a namespace, gates execution of everything beneath it via
//! its enable flag, and owns the undo history for its subtree. A flow
//! materialized from a stored definition remembers where it was loaded
//! from, so instances of a reusable "worker" definition can be told apart
//! from inline flows.

use crate::history::History;

/// State of a flow block.
#[derive(Debug)]
pub struct FlowState {
    pub(crate) enabled: bool,
    pub(crate) history: History,
    pub(crate) loaded_from: Option<String>,
}

impl Default for FlowState {
    fn default() -> Self {
        Self::new()
    }
}

impl FlowState {
    /// Creates an enabled flow with empty history.
    #[must_use]
    pub fn new() -> Self {
        Self {
            enabled: true,
            history: History::default(),
            loaded_from: None,
        }
    }

    /// True when the flow is enabled. Disabled flows suspend scheduling of
    /// every block in their subtree, including nested flows.
    #[must_use]
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Store name of the definition this flow was materialized from.
    #[must_use]
    pub fn loaded_from(&self) -> Option<&str> {
        self.loaded_from.as_deref()
    }

    /// Undo history of this flow's subtree.
    #[must_use]
    pub fn history(&self) -> &History {
        &self.history
    }
}
