// SPDX-License-Identifier: Apache-2.0
//! Binding chains: lazy per-segment path indirection.
//!
//! A bound property never holds a direct reference to its target. Its path
//! is broken into segments, and each segment gets a chain node that resolves
//! one hop and watches the property it resolved through. When an upstream
//! segment's value changes identity (a block is replaced), that node's
//! subtree re-resolves: old subscriptions are dropped, the walk repeats
//! against the new block, and consumers are forwarded the terminal value.
//! The runtime deduplicates forwards against the consumer's current value,
//! which yields exactly one notification per real change.
//!
//! Chains are owned by the block that requested the path and are shared per
//! normalized sub-path: two properties of one block bound to `a.b.c` and
//! `a.b.d` share the `a` and `a.b` nodes. A node dies when its last child
//! and last consumer are gone.
//!
//! Missing properties along a walk are created empty rather than treated as
//! errors; a path into state that does not exist yet resolves to `Null` and
//! starts delivering values the moment something appears there.

use tracing::{debug, trace};

use crate::graph::{Graph, GraphError};
use crate::ident::{BindingId, BlockId, PropId};
use crate::path::{self, PathError, ScopeKind};
use crate::value::Value;

/// One parsed path segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Segment {
    /// `#`: the current block.
    Here,
    /// `##`: the parent block.
    Parent,
    /// `###`: the enclosing flow's root block.
    FlowRoot,
    /// A fixed scope anchor (first segment only).
    Scope(ScopeKind),
    /// An ordinary property name.
    Name(String),
}

impl Segment {
    fn spelling(&self) -> &str {
        match self {
            Self::Here => path::SEG_HERE,
            Self::Parent => path::SEG_PARENT,
            Self::FlowRoot => path::SEG_FLOW_ROOT,
            Self::Scope(kind) => kind.name(),
            Self::Name(name) => name,
        }
    }
}

/// Parses a binding path into segments. Scope names anchor only in first
/// position; later occurrences are ordinary names.
pub(crate) fn parse_segments(p: &str) -> Result<Vec<Segment>, PathError> {
    if p.is_empty() {
        return Err(PathError::Empty);
    }
    let mut out = Vec::new();
    for (i, seg) in p.split('.').enumerate() {
        if seg.is_empty() {
            return Err(PathError::EmptySegment { path: p.to_owned() });
        }
        if i == 0 {
            if let Some(scope) = ScopeKind::parse(seg) {
                out.push(Segment::Scope(scope));
                continue;
            }
        }
        out.push(match seg {
            path::SEG_HERE => Segment::Here,
            path::SEG_PARENT => Segment::Parent,
            path::SEG_FLOW_ROOT => Segment::FlowRoot,
            _ => Segment::Name(seg.to_owned()),
        });
    }
    Ok(out)
}

/// One segment's node in a binding chain.
#[derive(Debug)]
pub struct BindNode {
    /// Block whose registry owns this node.
    pub(crate) anchor: BlockId,
    /// Registry key: the normalized sub-path up to and including this
    /// segment.
    pub(crate) key: String,
    pub(crate) segment: Segment,
    pub(crate) parent: Option<BindingId>,
    pub(crate) children: Vec<BindingId>,
    /// Bound properties fed by this node (terminal role).
    pub(crate) consumers: Vec<PropId>,
    /// Property this node watches. Only `Name` segments watch anything.
    pub(crate) target: Option<PropId>,
    /// Block the walk continues from below this node.
    pub(crate) cursor: Option<BlockId>,
}

/// A pending value delivery to a bound property.
pub(crate) struct Forward {
    pub(crate) consumer: PropId,
    pub(crate) value: Value,
}

/// Gets or creates the chain for `path_str` anchored at `anchor`, registers
/// `consumer` on its terminal node, resolves the chain, and returns the
/// terminal node plus the currently resolved value.
pub(crate) fn attach(
    g: &mut Graph,
    anchor: BlockId,
    path_str: &str,
    segments: &[Segment],
    consumer: PropId,
) -> Result<(BindingId, Value), GraphError> {
    debug_assert!(!segments.is_empty(), "parse_segments rejects empty paths");
    let mut key = String::new();
    let mut parent: Option<BindingId> = None;
    let mut node_ids = Vec::with_capacity(segments.len());
    for seg in segments {
        if key.is_empty() {
            key.push_str(seg.spelling());
        } else {
            key.push('.');
            key.push_str(seg.spelling());
        }
        let existing = g.block(anchor)?.bindings.get(&key).copied();
        let id = if let Some(id) = existing {
            id
        } else {
            let id = g.bindings.insert(BindNode {
                anchor,
                key: key.clone(),
                segment: seg.clone(),
                parent,
                children: Vec::new(),
                consumers: Vec::new(),
                target: None,
                cursor: None,
            });
            g.block_mut(anchor)?.bindings.insert(key.clone(), id);
            if let Some(p) = parent {
                if let Some(pn) = g.bindings.get_mut(p) {
                    pn.children.push(id);
                }
            }
            id
        };
        node_ids.push(id);
        parent = Some(id);
    }

    let terminal = *node_ids.last().ok_or(GraphError::DanglingBlock { id: anchor })?;
    if let Some(n) = g.bindings.get_mut(terminal) {
        if !n.consumers.contains(&consumer) {
            n.consumers.push(consumer);
        }
    }
    for id in &node_ids {
        resolve_node(g, *id);
    }
    trace!(%terminal, path = path_str, "binding chain attached");
    Ok((terminal, terminal_value(g, terminal)))
}

/// Removes `consumer` from the terminal node and prunes the chain upward;
/// nodes with no children and no consumers left are destroyed and their
/// subscriptions dropped.
pub(crate) fn detach(g: &mut Graph, terminal: BindingId, consumer: PropId) {
    if let Some(n) = g.bindings.get_mut(terminal) {
        n.consumers.retain(|c| *c != consumer);
    }
    let mut cursor = Some(terminal);
    while let Some(id) = cursor {
        let Some(n) = g.bindings.get(id) else { break };
        if !n.children.is_empty() || !n.consumers.is_empty() {
            break;
        }
        let parent = n.parent;
        let anchor = n.anchor;
        let key = n.key.clone();
        if let Some(node) = g.bindings.remove(id) {
            if let Some(target) = node.target {
                if let Some(p) = g.props.get_mut(target) {
                    p.remove_listener(id);
                }
            }
        }
        if let Some(b) = g.blocks.get_mut(anchor) {
            b.bindings.remove(&key);
        }
        if let Some(pid) = parent {
            if let Some(pn) = g.bindings.get_mut(pid) {
                pn.children.retain(|c| *c != id);
            }
        }
        debug!(node = %id, key, "binding node pruned");
        cursor = parent;
    }
}

/// Reacts to a value change of the property `node` watches: forwards the
/// new terminal value to this node's consumers and, when the value's block
/// identity changed, re-resolves every child subtree.
pub(crate) fn on_target_changed(g: &mut Graph, node: BindingId) -> Vec<Forward> {
    let mut out = Vec::new();
    let Some(n) = g.bindings.get(node) else {
        return out;
    };
    let value = n
        .target
        .and_then(|t| g.props.get(t))
        .map_or(Value::Null, |p| p.value.clone());
    for c in n.consumers.clone() {
        out.push(Forward {
            consumer: c,
            value: value.clone(),
        });
    }
    let new_cursor = value.as_block().filter(|b| g.blocks.contains(*b));
    let old_cursor = n.cursor;
    if new_cursor != old_cursor {
        if let Some(nm) = g.bindings.get_mut(node) {
            nm.cursor = new_cursor;
        }
        let children = g
            .bindings
            .get(node)
            .map(|n| n.children.clone())
            .unwrap_or_default();
        for child in children {
            re_resolve(g, child, &mut out);
        }
    }
    out
}

/// Fully re-resolves `node` and its subtree, collecting consumer forwards.
/// Used when an upstream cursor changed and when a watched property was
/// destroyed out from under the chain.
pub(crate) fn re_resolve(g: &mut Graph, node: BindingId, out: &mut Vec<Forward>) {
    resolve_node(g, node);
    let Some(n) = g.bindings.get(node) else { return };
    let value = n
        .target
        .and_then(|t| g.props.get(t))
        .map_or(Value::Null, |p| p.value.clone());
    for c in n.consumers.clone() {
        out.push(Forward {
            consumer: c,
            value: value.clone(),
        });
    }
    let children = g
        .bindings
        .get(node)
        .map(|n| n.children.clone())
        .unwrap_or_default();
    for child in children {
        re_resolve(g, child, out);
    }
}

/// Collects re-resolution forwards for a node without a subtree descent
/// entry point (convenience wrapper used by the runtime for orphaned
/// watchers).
pub(crate) fn re_resolve_collect(g: &mut Graph, node: BindingId) -> Vec<Forward> {
    let mut out = Vec::new();
    re_resolve(g, node, &mut out);
    out
}

fn terminal_value(g: &Graph, terminal: BindingId) -> Value {
    g.bindings
        .get(terminal)
        .and_then(|n| n.target)
        .and_then(|t| g.props.get(t))
        .map_or(Value::Null, |p| p.value.clone())
}

/// Resolves a single node against its parent's cursor: computes the block
/// the walk continues from and, for name segments, subscribes to the
/// property resolved through. Missing properties are created empty.
fn resolve_node(g: &mut Graph, node: BindingId) {
    let Some(n) = g.bindings.get(node) else { return };
    let anchor = n.anchor;
    let base = match n.parent {
        Some(p) => g.bindings.get(p).and_then(|pn| pn.cursor),
        None => Some(anchor),
    };
    let segment = n.segment.clone();
    let old_target = n.target;

    let (new_target, new_cursor) = match (&segment, base) {
        (_, None) => (None, None),
        (Segment::Here, Some(b)) => (None, Some(b)),
        (Segment::Parent, Some(b)) => (None, g.parent_block(b).ok().flatten()),
        (Segment::FlowRoot, Some(b)) => (None, g.enclosing_flow(b).ok()),
        (Segment::Scope(k), Some(_)) => (None, Some(g.scope_block(*k))),
        (Segment::Name(name), Some(b)) => {
            if g.blocks.contains(b) {
                match g.ensure_prop(b, name) {
                    Ok(prop) => {
                        let cursor = g
                            .props
                            .get(prop)
                            .and_then(|p| p.value.as_block())
                            .filter(|c| g.blocks.contains(*c));
                        (Some(prop), cursor)
                    }
                    Err(_) => (None, None),
                }
            } else {
                (None, None)
            }
        }
    };

    if old_target != new_target {
        if let Some(t) = old_target {
            if let Some(p) = g.props.get_mut(t) {
                p.remove_listener(node);
            }
        }
        if let Some(t) = new_target {
            if let Some(p) = g.props.get_mut(t) {
                p.add_listener(node);
            }
        }
    }
    if let Some(nm) = g.bindings.get_mut(node) {
        nm.target = new_target;
        nm.cursor = new_cursor;
    }
}
