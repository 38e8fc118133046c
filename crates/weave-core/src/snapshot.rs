// SPDX-License-Identifier: Apache-2.0
//! Snapshot maps: the serialized form of a block subtree.
//!
//! One JSON object per block. A key's spelling decides its meaning:
//! `~name` stores the binding path of property `name`; a plain key stores
//! either a literal (the property's persisted own value) or a nested object
//! (a child block); the reserved `#flow` key marks a flow block and is never
//! a property. Only own-authority state is saved: transient values,
//! computed outputs, and event tokens never appear, which is what makes
//! `load(save(x))` reproduce `x` up to computed state.
//!
//! Maps serialize with sorted keys (`serde_json`'s default map is ordered),
//! so equal states produce byte-equal documents and equal digests.

use tracing::debug;

use crate::graph::{Graph, GraphError};
use crate::ident::BlockId;
use crate::path::ScopeKind;

/// Serialized block: property name (or `~name`) to JSON value.
pub type SnapshotMap = serde_json::Map<String, serde_json::Value>;

/// Key prefix marking a binding entry.
pub const BINDING_MARKER: char = '~';

/// Reserved key marking a flow block. Present (true) on saved flows so a
/// load recreates the block with flow semantics; never stored as a
/// property.
pub const FLOW_MARKER: &str = "#flow";

/// How one snapshot key is to be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EntryKind<'a> {
    /// Plain literal or nested block for the named property.
    Plain(&'a str),
    /// Binding path for the named property.
    Binding(&'a str),
}

/// Classifies a snapshot key.
pub(crate) fn parse_key(key: &str) -> EntryKind<'_> {
    key.strip_prefix(BINDING_MARKER)
        .map_or(EntryKind::Plain(key), EntryKind::Binding)
}

/// Spells the binding key for a property name.
pub(crate) fn binding_key(name: &str) -> String {
    format!("{BINDING_MARKER}{name}")
}

/// Content digest of a snapshot map (blake3 over the canonical JSON bytes).
#[must_use]
pub fn digest(map: &SnapshotMap) -> String {
    let bytes = serde_json::to_vec(map).unwrap_or_default();
    hex::encode(blake3::hash(&bytes).as_bytes())
}

/// Saves the own-authority state of `block` as a snapshot map.
///
/// The root's scope children are session state, not document state, and are
/// left out of a root save.
pub fn save_block(g: &Graph, block: BlockId) -> Result<SnapshotMap, GraphError> {
    let mut out = SnapshotMap::new();
    let b = g.block(block)?;
    if b.is_flow() {
        out.insert(FLOW_MARKER.to_owned(), serde_json::Value::Bool(true));
    }
    let is_root = block == g.root();
    for (name, prop_id) in &b.props {
        if is_root && ScopeKind::parse(name).is_some() {
            continue;
        }
        let p = g.prop(*prop_id)?;
        if let Some(path) = p.binding_path() {
            out.insert(binding_key(name), serde_json::Value::String(path.to_owned()));
            continue;
        }
        if let Some(child) = p.value.as_block() {
            if g.block(child).is_ok_and(|c| c.owner == Some(*prop_id)) {
                out.insert(
                    name.clone(),
                    serde_json::Value::Object(save_block(g, child)?),
                );
                continue;
            }
        }
        if let Some(v) = &p.persisted {
            if let Some(json) = v.to_json() {
                out.insert(name.clone(), json);
            } else {
                debug!(prop = %name, kind = v.kind(), "skipping non-serializable persisted value");
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockKind;
    use crate::value::Value;

    #[test]
    fn keys_classify_by_marker() {
        assert_eq!(parse_key("x"), EntryKind::Plain("x"));
        assert_eq!(parse_key("~x"), EntryKind::Binding("x"));
        assert_eq!(binding_key("speed"), "~speed");
    }

    #[test]
    fn digest_is_stable_and_content_sensitive() {
        let mut a = SnapshotMap::new();
        a.insert("x".into(), serde_json::json!(1));
        let mut b = SnapshotMap::new();
        b.insert("x".into(), serde_json::json!(1));
        assert_eq!(digest(&a), digest(&b));
        b.insert("y".into(), serde_json::json!(2));
        assert_ne!(digest(&a), digest(&b));
    }

    #[test]
    fn save_captures_only_own_authority() {
        let mut g = Graph::new();
        let root = g.root();
        let owner = g.ensure_prop(root, "b").unwrap();
        let b = g.create_block(owner, BlockKind::Plain).unwrap();
        g.prop_mut(owner).unwrap().value = Value::Block(b);

        // Persisted own value.
        let x = g.ensure_prop(b, "x").unwrap();
        g.prop_mut(x).unwrap().value = Value::Int(5);
        g.prop_mut(x).unwrap().persisted = Some(Value::Int(5));
        // Transient value: present live, absent from the save.
        let t = g.ensure_prop(b, "t").unwrap();
        g.prop_mut(t).unwrap().value = Value::Int(9);

        let map = save_block(&g, b).unwrap();
        assert_eq!(map.get("x"), Some(&serde_json::json!(5)));
        assert!(!map.contains_key("t"), "transient state must not save");
    }

    #[test]
    fn save_marks_flows() {
        let mut g = Graph::new();
        let root = g.root();
        let owner = g.ensure_prop(root, "f").unwrap();
        let f = g
            .create_block(owner, BlockKind::Flow(crate::flow::FlowState::new()))
            .unwrap();
        g.prop_mut(owner).unwrap().value = Value::Block(f);

        let map = save_block(&g, f).unwrap();
        assert_eq!(map.get(FLOW_MARKER), Some(&serde_json::json!(true)));

        let plain_owner = g.ensure_prop(root, "p").unwrap();
        let p = g.create_block(plain_owner, BlockKind::Plain).unwrap();
        g.prop_mut(plain_owner).unwrap().value = Value::Block(p);
        let map = save_block(&g, p).unwrap();
        assert!(!map.contains_key(FLOW_MARKER));
    }

    #[test]
    fn root_saves_skip_scope_children() {
        let mut g = Graph::new();
        let root = g.root();
        let x = g.ensure_prop(root, "x").unwrap();
        g.prop_mut(x).unwrap().value = Value::Int(1);
        g.prop_mut(x).unwrap().persisted = Some(Value::Int(1));

        let map = save_block(&g, root).unwrap();
        assert_eq!(map.get("x"), Some(&serde_json::json!(1)));
        for key in ["#global", "#shared", "#temp"] {
            assert!(!map.contains_key(key), "scope `{key}` must not save");
        }
    }

    #[test]
    fn save_nests_owned_children() {
        let mut g = Graph::new();
        let root = g.root();
        let owner = g.ensure_prop(root, "outer").unwrap();
        let outer = g.create_block(owner, BlockKind::Plain).unwrap();
        g.prop_mut(owner).unwrap().value = Value::Block(outer);
        let inner_prop = g.ensure_prop(outer, "inner").unwrap();
        let inner = g.create_block(inner_prop, BlockKind::Plain).unwrap();
        g.prop_mut(inner_prop).unwrap().value = Value::Block(inner);

        let map = save_block(&g, outer).unwrap();
        assert!(
            matches!(map.get("inner"), Some(serde_json::Value::Object(_))),
            "owned children save as nested objects"
        );
    }
}
