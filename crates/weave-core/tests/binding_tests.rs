// SPDX-License-Identifier: Apache-2.0
//! Binding behavior through the runtime surface: chain repair across block
//! replacement, ghost targets, scope admission, and chain sharing.

mod common;

use common::rt;
use weave_core::{BindClass, PathError, RuntimeError, Value};

#[test]
fn a_chain_survives_interior_block_replacement() {
    let mut rt = rt();
    rt.create_block("", "box").unwrap();
    rt.create_block("box", "inner").unwrap();
    rt.set_value("box.inner.val", Value::Int(1)).unwrap();
    rt.create_block("", "w").unwrap();
    rt.set_binding("w.in", "##.box.inner.val").unwrap();
    assert_eq!(rt.value("w.in").unwrap(), Value::Int(1));

    rt.remove_block("box.inner").unwrap();
    assert_eq!(rt.value("w.in").unwrap(), Value::Null, "a broken chain reads Null");

    rt.create_block("box", "inner").unwrap();
    rt.set_value("box.inner.val", Value::Int(2)).unwrap();
    assert_eq!(
        rt.value("w.in").unwrap(),
        Value::Int(2),
        "the tail must re-resolve onto the replacement block"
    );

    // Exactly one watcher on the new target, none leaked on the old.
    let val = rt.graph().prop_at("box.inner.val").unwrap();
    assert_eq!(rt.graph().listener_count(val).unwrap(), 1);
    assert_eq!(
        rt.binding_of("w.in").unwrap().as_deref(),
        Some("##.box.inner.val"),
        "the spelling never changes while the chain repairs itself"
    );
}

#[test]
fn a_binding_to_nowhere_reads_null_until_the_target_appears() {
    let mut rt = rt();
    rt.create_block("", "w").unwrap();
    rt.set_binding("w.in", "##.hub.v").unwrap();
    assert_eq!(rt.value("w.in").unwrap(), Value::Null);
    assert!(rt.has_prop("hub"), "the walk creates the missing hop empty");

    rt.create_block("", "hub").unwrap();
    rt.set_value("hub.v", Value::Int(4)).unwrap();
    assert_eq!(rt.value("w.in").unwrap(), Value::Int(4), "delivery starts when the target exists");
}

#[test]
fn scope_rules_gate_binding_admission() {
    let mut rt = rt();
    rt.create_block("", "a").unwrap();
    rt.set_value("a.x", Value::Int(1)).unwrap();

    // Nothing in #global may hold a binding.
    let err = rt.set_binding("#global.env", "##.a.x").unwrap_err();
    assert!(matches!(err, RuntimeError::ReadOnlyScope { .. }), "got {err}");

    // Reading from #global is ordinary.
    rt.seed_global("user", Value::Str("ada".into())).unwrap();
    assert_eq!(rt.set_binding("a.gx", "#global.user").unwrap(), BindClass::Local);
    assert_eq!(rt.value("a.gx").unwrap(), Value::Str("ada".into()));

    // #temp is never a data source, not even for other #temp state.
    let err = rt.set_binding("a.tx", "#temp.audit.log").unwrap_err();
    assert!(
        matches!(err, RuntimeError::Path(PathError::InvalidBindingPath { .. })),
        "got {err}"
    );
    rt.create_block("#temp", "mine").unwrap();
    let err = rt.set_binding("#temp.mine.v", "#temp.audit.log").unwrap_err();
    assert!(
        matches!(err, RuntimeError::Path(PathError::InvalidBindingPath { .. })),
        "got {err}"
    );

    // A #temp holder may still reach the #global environment.
    assert_eq!(rt.set_binding("#temp.mine.g", "#global.user").unwrap(), BindClass::Local);
    assert_eq!(rt.value("#temp.mine.g").unwrap(), Value::Str("ada".into()));

    // A #shared holder may not depend on local state.
    rt.create_block("#shared", "stats").unwrap();
    let err = rt.set_binding("#shared.stats.v", "##.##.a.x").unwrap_err();
    assert!(
        matches!(err, RuntimeError::Path(PathError::InvalidBindingPath { .. })),
        "got {err}"
    );

    // Local state reading out of #shared is the sync-relevant class.
    rt.set_value("#shared.stats.hits", Value::Int(3)).unwrap();
    assert_eq!(
        rt.set_binding("a.sx", "#shared.stats.hits").unwrap(),
        BindClass::Shared
    );
    assert_eq!(rt.value("a.sx").unwrap(), Value::Int(3));
}

#[test]
fn a_rejected_binding_leaves_the_previous_one_in_place() {
    let mut rt = rt();
    rt.create_block("", "a").unwrap();
    rt.create_block("", "b").unwrap();
    rt.set_value("b.y", Value::Int(5)).unwrap();
    rt.set_binding("a.in", "##.b.y").unwrap();

    rt.set_binding("a.in", "#temp.audit.log").unwrap_err();

    assert_eq!(rt.binding_of("a.in").unwrap().as_deref(), Some("##.b.y"));
    assert_eq!(rt.value("a.in").unwrap(), Value::Int(5));
}

#[test]
fn a_temp_holder_rejects_flow_sources_and_keeps_its_binding() {
    let mut rt = rt();
    rt.create_block("", "main").unwrap();
    rt.set_value("main.x", Value::Int(7)).unwrap();
    rt.seed_global("session", Value::Str("s1".into())).unwrap();
    rt.create_block("#temp", "scratch").unwrap();
    rt.set_binding("#temp.scratch.v", "#global.session").unwrap();

    let err = rt.set_binding("#temp.scratch.v", "##.##.main.x").unwrap_err();
    assert!(
        matches!(err, RuntimeError::Path(PathError::InvalidBindingPath { .. })),
        "got {err}"
    );
    assert_eq!(
        rt.binding_of("#temp.scratch.v").unwrap().as_deref(),
        Some("#global.session"),
        "the rejected bind must not disturb the held one"
    );
    assert_eq!(rt.value("#temp.scratch.v").unwrap(), Value::Str("s1".into()));
}

#[test]
fn clearing_a_binding_restores_the_persisted_value() {
    let mut rt = rt();
    rt.create_block("", "a").unwrap();
    rt.create_block("", "b").unwrap();
    rt.set_value("a.v", Value::Int(1)).unwrap();
    rt.set_value("b.src", Value::Int(9)).unwrap();

    rt.set_binding("a.v", "##.b.src").unwrap();
    assert_eq!(rt.value("a.v").unwrap(), Value::Int(9), "delivery overlays, never overwrites");

    rt.clear_binding("a.v").unwrap();
    assert_eq!(rt.value("a.v").unwrap(), Value::Int(1), "own authority returns");
    assert_eq!(rt.binding_of("a.v").unwrap(), None);
}

#[test]
fn two_consumers_of_one_path_share_the_chain() {
    let mut rt = rt();
    rt.create_block("", "hub").unwrap();
    rt.set_value("hub.v", Value::Int(1)).unwrap();
    rt.create_block("", "x").unwrap();
    rt.set_binding("x.p", "##.hub.v").unwrap();
    rt.set_binding("x.q", "##.hub.v").unwrap();

    let v = rt.graph().prop_at("hub.v").unwrap();
    assert_eq!(rt.graph().listener_count(v).unwrap(), 1, "one terminal for one spelling");

    rt.clear_binding("x.p").unwrap();
    assert_eq!(
        rt.graph().listener_count(v).unwrap(),
        1,
        "the surviving consumer keeps the chain alive"
    );

    rt.clear_binding("x.q").unwrap();
    assert_eq!(rt.graph().listener_count(v).unwrap(), 0, "last consumer prunes the chain");
}
