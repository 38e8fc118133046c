// SPDX-License-Identifier: Apache-2.0
//! Blocks: named graph nodes owning a property table, a binding registry,
//! and at most one attached logic unit.
//!
//! A block is reachable through exactly one owner property; replacing that
//! property's value destroys the block and everything under it. The root
//! block is the only block without an owner.

use std::collections::BTreeMap;
use std::fmt;

use crate::flow::FlowState;
use crate::ident::{BindingId, PropId};
use crate::unit::Unit;

/// Structural role of a block.
pub enum BlockKind {
    /// Ordinary block.
    Plain,
    /// Namespace-bounding flow block.
    Flow(FlowState),
}

impl fmt::Debug for BlockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Plain => write!(f, "Plain"),
            Self::Flow(state) => f.debug_tuple("Flow").field(state).finish(),
        }
    }
}

/// Slot holding the block's attached unit, if any.
///
/// `instance` is `None` either because no unit is attached (unknown or
/// absent `#type`) or because the unit is currently taken out for a `run`
/// call; `running` distinguishes the two.
#[derive(Default)]
pub(crate) struct UnitSlot {
    pub(crate) type_name: Option<String>,
    pub(crate) instance: Option<Box<dyn Unit>>,
    pub(crate) running: bool,
    /// Unit registry revision observed at attach time; a lower value than
    /// the registry's current revision marks the instance for hot swap.
    pub(crate) revision: u64,
}

impl fmt::Debug for UnitSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnitSlot")
            .field("type_name", &self.type_name)
            .field("attached", &self.instance.is_some())
            .field("running", &self.running)
            .field("revision", &self.revision)
            .finish()
    }
}

/// A named graph node.
#[derive(Debug)]
pub struct Block {
    pub(crate) name: String,
    /// Owning property; `None` only for the root block.
    pub(crate) owner: Option<PropId>,
    pub(crate) kind: BlockKind,
    /// Property table. Ordered so saves and child walks are deterministic.
    pub(crate) props: BTreeMap<String, PropId>,
    /// Memoized binding-chain nodes, keyed by normalized sub-path. Chains
    /// requested through this block share their common prefixes here.
    pub(crate) bindings: BTreeMap<String, BindingId>,
    pub(crate) unit: UnitSlot,
}

impl Block {
    pub(crate) fn new(name: String, owner: Option<PropId>, kind: BlockKind) -> Self {
        Self {
            name,
            owner,
            kind,
            props: BTreeMap::new(),
            bindings: BTreeMap::new(),
            unit: UnitSlot::default(),
        }
    }

    /// Block name (the name of its owner property).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// True for flow blocks.
    #[must_use]
    pub fn is_flow(&self) -> bool {
        matches!(self.kind, BlockKind::Flow(_))
    }

    /// Flow state, for flow blocks.
    #[must_use]
    pub fn flow_state(&self) -> Option<&FlowState> {
        match &self.kind {
            BlockKind::Flow(state) => Some(state),
            BlockKind::Plain => None,
        }
    }

    pub(crate) fn flow_state_mut(&mut self) -> Option<&mut FlowState> {
        match &mut self.kind {
            BlockKind::Flow(state) => Some(state),
            BlockKind::Plain => None,
        }
    }

    /// Id of the named property, if it exists.
    #[must_use]
    pub fn prop_id(&self, name: &str) -> Option<PropId> {
        self.props.get(name).copied()
    }

    /// Attached unit type name, if `#type` selected one.
    #[must_use]
    pub fn unit_type(&self) -> Option<&str> {
        self.unit.type_name.as_deref()
    }

    /// Property names in deterministic (sorted) order.
    pub fn prop_names(&self) -> impl Iterator<Item = &str> {
        self.props.keys().map(String::as_str)
    }
}
