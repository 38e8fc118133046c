// SPDX-License-Identifier: Apache-2.0
//! The structural store: arenas of blocks, properties, and binding nodes,
//! plus path walks and the cascading destroy.
//!
//! `Graph` knows nothing about scheduling, units, or notification policy;
//! the runtime layers those on top. Everything here is synchronous data
//! manipulation with explicit errors for stale ids and bad names.

use thiserror::Error;

use crate::arena::Arena;
use crate::binding::BindNode;
use crate::block::{Block, BlockKind};
use crate::flow::FlowState;
use crate::ident::{BindingId, BlockId, PropId};
use crate::path::{self, ScopeKind};
use crate::prop::Property;
use crate::unit::Unit;
use crate::value::Value;

/// Structural errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// A held block id no longer names a live block.
    #[error("stale or unknown block id {id}")]
    DanglingBlock {
        /// The stale id.
        id: BlockId,
    },
    /// A held property id no longer names a live property.
    #[error("stale or unknown property id {id}")]
    DanglingProp {
        /// The stale id.
        id: PropId,
    },
    /// The name is not admissible for a property or block.
    #[error("`{name}` is not a valid property or block name")]
    BadName {
        /// Offending name.
        name: String,
    },
    /// No block lives at the given absolute path.
    #[error("no block at `{path}`")]
    NoSuchBlock {
        /// Looked-up path.
        path: String,
    },
    /// No property lives at the given absolute path.
    #[error("no property at `{path}`")]
    NoSuchProperty {
        /// Looked-up path.
        path: String,
    },
}

/// Everything a cascading destroy tore down, for the runtime to finish:
/// units still need their `destroy` hook, subscriptions on dead objects
/// need dropping, and surviving binding nodes that watched a removed
/// property need re-resolution.
pub(crate) struct DestroyReport {
    /// Units taken from destroyed blocks, with the block they came from.
    pub(crate) units: Vec<(BlockId, Box<dyn Unit>)>,
    /// Removed properties with their absolute paths.
    pub(crate) removed_props: Vec<(PropId, String)>,
    /// Removed blocks with their former paths, subtree root included.
    pub(crate) removed_blocks: Vec<(BlockId, String)>,
    /// (parent id, parent path, child name) for child-watch notifications.
    pub(crate) removed_children: Vec<(BlockId, String, String)>,
    /// Binding nodes anchored outside the destroyed subtree that watched a
    /// removed property.
    pub(crate) orphaned_watchers: Vec<BindingId>,
}

/// The structural store.
pub struct Graph {
    pub(crate) blocks: Arena<BlockId, Block>,
    pub(crate) props: Arena<PropId, Property>,
    pub(crate) bindings: Arena<BindingId, BindNode>,
    root: BlockId,
    global: BlockId,
    shared: BlockId,
    temp: BlockId,
}

impl Graph {
    /// Creates the root flow with its three permanent scope children.
    pub(crate) fn new() -> Self {
        let mut blocks = Arena::new();
        let mut props = Arena::new();
        let root = blocks.insert(Block::new(
            String::new(),
            None,
            BlockKind::Flow(FlowState::new()),
        ));
        let mut scope = |blocks: &mut Arena<BlockId, Block>, name: &str| {
            let prop = props.insert(Property::new(name.to_owned(), root));
            let id = blocks.insert(Block::new(
                name.to_owned(),
                Some(prop),
                BlockKind::Flow(FlowState::new()),
            ));
            if let Some(p) = props.get_mut(prop) {
                p.value = Value::Block(id);
            }
            if let Some(r) = blocks.get_mut(root) {
                r.props.insert(name.to_owned(), prop);
            }
            id
        };
        let global = scope(&mut blocks, path::SCOPE_GLOBAL);
        let shared = scope(&mut blocks, path::SCOPE_SHARED);
        let temp = scope(&mut blocks, path::SCOPE_TEMP);
        Self {
            blocks,
            props,
            bindings: Arena::new(),
            root,
            global,
            shared,
            temp,
        }
    }

    /// The root flow block.
    #[must_use]
    pub fn root(&self) -> BlockId {
        self.root
    }

    /// Root block of a fixed scope.
    #[must_use]
    pub fn scope_block(&self, kind: ScopeKind) -> BlockId {
        match kind {
            ScopeKind::Global => self.global,
            ScopeKind::Shared => self.shared,
            ScopeKind::Temp => self.temp,
        }
    }

    /// Block by id.
    pub fn block(&self, id: BlockId) -> Result<&Block, GraphError> {
        self.blocks.get(id).ok_or(GraphError::DanglingBlock { id })
    }

    pub(crate) fn block_mut(&mut self, id: BlockId) -> Result<&mut Block, GraphError> {
        self.blocks
            .get_mut(id)
            .ok_or(GraphError::DanglingBlock { id })
    }

    /// Property by id.
    pub fn prop(&self, id: PropId) -> Result<&Property, GraphError> {
        self.props.get(id).ok_or(GraphError::DanglingProp { id })
    }

    pub(crate) fn prop_mut(&mut self, id: PropId) -> Result<&mut Property, GraphError> {
        self.props
            .get_mut(id)
            .ok_or(GraphError::DanglingProp { id })
    }

    /// Live object counts, for diagnostics and leak checks.
    #[must_use]
    pub fn counts(&self) -> (usize, usize, usize) {
        (self.blocks.len(), self.props.len(), self.bindings.len())
    }

    /// Number of binding nodes currently listening to a property.
    pub fn listener_count(&self, prop: PropId) -> Result<usize, GraphError> {
        Ok(self.prop(prop)?.listeners.len())
    }

    /// Existing property `name` on `block`.
    pub fn find_prop(&self, block: BlockId, name: &str) -> Result<Option<PropId>, GraphError> {
        Ok(self.block(block)?.prop_id(name))
    }

    /// Property `name` on `block`, created empty on first access.
    pub(crate) fn ensure_prop(&mut self, block: BlockId, name: &str) -> Result<PropId, GraphError> {
        if let Some(existing) = self.block(block)?.prop_id(name) {
            return Ok(existing);
        }
        if !path::is_valid_name(name) {
            return Err(GraphError::BadName {
                name: name.to_owned(),
            });
        }
        let id = self.props.insert(Property::new(name.to_owned(), block));
        self.block_mut(block)?.props.insert(name.to_owned(), id);
        Ok(id)
    }

    /// Creates a block owned by `owner_prop`. The caller wires the owning
    /// property's value and emits notifications.
    pub(crate) fn create_block(
        &mut self,
        owner_prop: PropId,
        kind: BlockKind,
    ) -> Result<BlockId, GraphError> {
        let name = self.prop(owner_prop)?.name.clone();
        Ok(self
            .blocks
            .insert(Block::new(name, Some(owner_prop), kind)))
    }

    /// Block owning a property.
    pub fn owner_of_prop(&self, prop: PropId) -> Result<BlockId, GraphError> {
        Ok(self.prop(prop)?.owner)
    }

    /// Parent block in the ownership tree; `None` for the root.
    pub fn parent_block(&self, block: BlockId) -> Result<Option<BlockId>, GraphError> {
        match self.block(block)?.owner {
            Some(prop) => Ok(Some(self.prop(prop)?.owner)),
            None => Ok(None),
        }
    }

    /// Nearest flow at or above `block`. The root is a flow, so the walk
    /// always terminates.
    pub fn enclosing_flow(&self, block: BlockId) -> Result<BlockId, GraphError> {
        let mut cursor = block;
        loop {
            if self.block(cursor)?.is_flow() {
                return Ok(cursor);
            }
            match self.parent_block(cursor)? {
                Some(parent) => cursor = parent,
                None => return Ok(cursor),
            }
        }
    }

    /// Fixed scope containing `block`, if any.
    pub fn scope_containing(&self, block: BlockId) -> Result<Option<ScopeKind>, GraphError> {
        let mut cursor = block;
        loop {
            if cursor == self.global {
                return Ok(Some(ScopeKind::Global));
            }
            if cursor == self.shared {
                return Ok(Some(ScopeKind::Shared));
            }
            if cursor == self.temp {
                return Ok(Some(ScopeKind::Temp));
            }
            match self.parent_block(cursor)? {
                Some(parent) => cursor = parent,
                None => return Ok(None),
            }
        }
    }

    /// True when every enclosing flow of `block` (including itself) is
    /// enabled.
    pub fn effectively_enabled(&self, block: BlockId) -> Result<bool, GraphError> {
        let mut cursor = block;
        loop {
            if let Some(state) = self.block(cursor)?.flow_state() {
                if !state.enabled {
                    return Ok(false);
                }
            }
            match self.parent_block(cursor)? {
                Some(parent) => cursor = parent,
                None => return Ok(true),
            }
        }
    }

    /// Absolute path of a block. The root path is the empty string.
    pub fn block_path(&self, block: BlockId) -> Result<String, GraphError> {
        let mut parts: Vec<String> = Vec::new();
        let mut cursor = block;
        loop {
            let b = self.block(cursor)?;
            if b.owner.is_none() {
                break;
            }
            parts.push(b.name.clone());
            match self.parent_block(cursor)? {
                Some(parent) => cursor = parent,
                None => break,
            }
        }
        parts.reverse();
        Ok(parts.join("."))
    }

    /// Absolute path of a property.
    pub fn prop_path(&self, prop: PropId) -> Result<String, GraphError> {
        let p = self.prop(prop)?;
        let owner = self.block_path(p.owner)?;
        if owner.is_empty() {
            Ok(p.name.clone())
        } else {
            Ok(format!("{owner}.{}", p.name))
        }
    }

    /// Walks an absolute path to a block: every segment must name a
    /// property holding a live block.
    pub fn block_at(&self, abs: &str) -> Result<BlockId, GraphError> {
        let mut cursor = self.root;
        for seg in path::segments(abs) {
            let prop = self.block(cursor)?.prop_id(seg).ok_or_else(|| {
                GraphError::NoSuchBlock {
                    path: abs.to_owned(),
                }
            })?;
            cursor = self
                .prop(prop)?
                .value
                .as_block()
                .ok_or_else(|| GraphError::NoSuchBlock {
                    path: abs.to_owned(),
                })?;
        }
        Ok(cursor)
    }

    /// Walks an absolute path to a property: the last segment is the
    /// property name, everything before it a block path.
    pub fn prop_at(&self, abs: &str) -> Result<PropId, GraphError> {
        let segs: Vec<&str> = path::segments(abs).collect();
        let Some((last, block_segs)) = segs.split_last() else {
            return Err(GraphError::NoSuchProperty {
                path: abs.to_owned(),
            });
        };
        let block_path = block_segs.join(".");
        let block = self.block_at(&block_path)?;
        self.block(block)?
            .prop_id(last)
            .ok_or_else(|| GraphError::NoSuchProperty {
                path: abs.to_owned(),
            })
    }

    /// True when `ancestor` is on the ownership chain of `block`
    /// (inclusive).
    pub fn is_within(&self, block: BlockId, ancestor: BlockId) -> Result<bool, GraphError> {
        let mut cursor = block;
        loop {
            if cursor == ancestor {
                return Ok(true);
            }
            match self.parent_block(cursor)? {
                Some(parent) => cursor = parent,
                None => return Ok(false),
            }
        }
    }

    /// Child blocks of `block` in deterministic property order.
    pub fn child_blocks(&self, block: BlockId) -> Result<Vec<BlockId>, GraphError> {
        let b = self.block(block)?;
        let mut out = Vec::new();
        for prop in b.props.values() {
            if let Some(child) = self.prop(*prop)?.value.as_block() {
                if self.blocks.contains(child) {
                    out.push(child);
                }
            }
        }
        Ok(out)
    }

    /// Tears down `block` and everything it owns: child blocks first, then
    /// the block's own binding nodes, then its properties.
    ///
    /// Binding nodes anchored in other blocks that watched a removed
    /// property are reported back so the caller can re-resolve them (the
    /// lazy walk will recreate the watched property if the path becomes
    /// reachable again).
    pub(crate) fn destroy_block(&mut self, block: BlockId) -> Result<DestroyReport, GraphError> {
        let mut report = DestroyReport {
            units: Vec::new(),
            removed_props: Vec::new(),
            removed_blocks: Vec::new(),
            removed_children: Vec::new(),
            orphaned_watchers: Vec::new(),
        };
        self.destroy_into(block, &mut report)?;
        // Nodes torn down with the subtree cannot be re-resolved.
        report
            .orphaned_watchers
            .retain(|id| self.bindings.contains(*id));
        Ok(report)
    }

    fn destroy_into(&mut self, block: BlockId, report: &mut DestroyReport) -> Result<(), GraphError> {
        let block_path = self.block_path(block)?;
        let prop_ids: Vec<PropId> = self.block(block)?.props.values().copied().collect();

        // Children die before their parent.
        for prop in &prop_ids {
            if let Some(child) = self.prop(*prop)?.value.as_block() {
                if self
                    .blocks
                    .get(child)
                    .is_some_and(|c| c.owner == Some(*prop))
                {
                    let name = self.prop(*prop)?.name.clone();
                    report
                        .removed_children
                        .push((block, block_path.clone(), name));
                    self.destroy_into(child, report)?;
                }
            }
        }

        if let Some(b) = self.blocks.get_mut(block) {
            if let Some(unit) = b.unit.instance.take() {
                report.units.push((block, unit));
            }
            let node_ids: Vec<BindingId> = b.bindings.values().copied().collect();
            b.bindings.clear();
            for node_id in node_ids {
                if let Some(node) = self.bindings.remove(node_id) {
                    if let Some(target) = node.target {
                        if let Some(p) = self.props.get_mut(target) {
                            p.remove_listener(node_id);
                        }
                    }
                }
            }
        }

        for prop in prop_ids {
            if let Some(p) = self.props.remove(prop) {
                let path = if block_path.is_empty() {
                    p.name.clone()
                } else {
                    format!("{block_path}.{}", p.name)
                };
                report.removed_props.push((prop, path));
                report.orphaned_watchers.extend(p.listeners);
            }
        }

        self.blocks.remove(block);
        report.removed_blocks.push((block, block_path));
        Ok(())
    }
}
