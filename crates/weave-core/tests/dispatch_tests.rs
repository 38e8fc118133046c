// SPDX-License-Identifier: Apache-2.0
//! Trigger handling and fault paths: error tokens skipping units, stale
//! tokens, panic isolation, binding echo suppression, and the subscriber
//! change feed.

mod common;

use common::{attach, log, probe_block, rt, settle, FAULT_NAME, GRENADE_NAME, TALLY_NAME};
use weave_core::{units::COUNTER_UNIT_NAME, BindClass, Change, Runtime, Value};

fn counter_block(rt: &mut Runtime, name: &str) {
    rt.create_block("", name).unwrap();
    attach(rt, name, COUNTER_UNIT_NAME);
}

#[test]
fn an_error_token_skips_units_and_travels_the_chain() {
    let mut rt = rt();
    rt.create_block("", "f").unwrap();
    rt.create_block("", "t").unwrap();
    attach(&mut rt, "f", FAULT_NAME);
    counter_block(&mut rt, "c");
    attach(&mut rt, "t", TALLY_NAME);
    rt.set_binding("c.#call", "##.f.#emit").unwrap();
    rt.set_binding("t.#call", "##.c.#emit").unwrap();
    settle(&mut rt);

    rt.call("f").unwrap();
    rt.run_until_idle().unwrap();

    // Neither downstream unit ran: their state props were never created.
    assert!(!rt.has_prop("c.count"), "counter must not run on an error token");
    assert!(!rt.has_prop("t.runs"), "tally must not run on an error token");

    // The counter forwarded the token; the payload survives re-stamping.
    match rt.value("c.#emit").unwrap() {
        Value::Event(e) => {
            let err = e.error.expect("forwarded token keeps its error payload");
            assert_eq!(err.origin, "f");
            assert_eq!(err.message, "fault unit tripped");
        }
        other => panic!("expected an event on c.#emit, got {other:?}"),
    }
    // The tally swallows errors, so the chain ends there.
    assert!(!rt.has_prop("t.#emit"));

    // A direct call still works end to end.
    rt.call("c").unwrap();
    rt.run_until_idle().unwrap();
    assert_eq!(rt.value("c.count").unwrap(), Value::Int(1));
    assert_eq!(rt.value("t.runs").unwrap(), Value::Int(1), "the counter's own emit chains");
}

#[test]
fn a_stale_call_token_is_consumed_without_a_run() {
    let mut rt = rt();
    counter_block(&mut rt, "c");
    settle(&mut rt);

    rt.call("c").unwrap();
    rt.run_until_idle().unwrap();
    assert_eq!(rt.value("c.count").unwrap(), Value::Int(1));

    // Mint now, deliver after a pass boundary: the token is stale by the
    // time the counter would consume it.
    let stale = rt.mint_event();
    rt.run_pass().unwrap();
    rt.send_call("c", stale).unwrap();
    rt.run_until_idle().unwrap();

    assert_eq!(rt.value("c.count").unwrap(), Value::Int(1), "stale tokens never count");
    assert_eq!(rt.value("c.#call").unwrap(), Value::Null, "the token is still consumed");
}

#[test]
fn a_panicking_unit_is_contained_and_the_pass_continues() {
    let mut rt = rt();
    rt.create_block("", "g").unwrap();
    attach(&mut rt, "g", GRENADE_NAME);
    probe_block(&mut rt, "p");
    settle(&mut rt);

    rt.set_value("g.armed", Value::Bool(true)).unwrap();
    rt.set_value("g.in", Value::Int(7)).unwrap();
    rt.set_value("p.in", Value::Int(1)).unwrap();
    rt.run_pass().unwrap();

    assert_eq!(log(&rt), "p;", "the probe still runs after the grenade goes off");
    assert_eq!(rt.value("g.#output").unwrap_or(Value::Null), Value::Null);

    // Disarmed, the same block works again.
    rt.set_value("g.armed", Value::Bool(false)).unwrap();
    rt.run_until_idle().unwrap();
    assert_eq!(rt.value("g.#output").unwrap(), Value::Int(7));
}

#[test]
fn mutually_bound_props_settle_by_value_equality() {
    let mut rt = rt();
    rt.create_block("", "a").unwrap();
    rt.create_block("", "b").unwrap();
    rt.set_binding("a.x", "##.b.y").unwrap();
    rt.set_binding("b.y", "##.a.x").unwrap();

    rt.update_value("a.x", Value::Int(5)).unwrap();
    assert_eq!(rt.value("a.x").unwrap(), Value::Int(5));
    assert_eq!(rt.value("b.y").unwrap(), Value::Int(5));

    rt.update_value("b.y", Value::Int(9)).unwrap();
    assert_eq!(rt.value("a.x").unwrap(), Value::Int(9));
    assert_eq!(rt.value("b.y").unwrap(), Value::Int(9));

    // Both bindings survive the ping-pong.
    assert_eq!(rt.binding_of("a.x").unwrap().as_deref(), Some("##.b.y"));
    assert_eq!(rt.binding_of("b.y").unwrap().as_deref(), Some("##.a.x"));
}

#[test]
fn a_self_binding_drops_its_own_echo() {
    let mut rt = rt();
    rt.create_block("", "a").unwrap();
    rt.set_value("a.x", Value::Int(1)).unwrap();
    rt.set_binding("a.x", "#.x").unwrap();

    rt.update_value("a.x", Value::Int(3)).unwrap();

    assert_eq!(rt.value("a.x").unwrap(), Value::Int(3));
    assert_eq!(rt.binding_of("a.x").unwrap().as_deref(), Some("#.x"));
}

#[test]
fn plain_data_on_call_triggers_on_change_only() {
    let mut rt = rt();
    counter_block(&mut rt, "c");
    settle(&mut rt);

    rt.set_value("c.#call", Value::Int(1)).unwrap();
    rt.run_until_idle().unwrap();
    assert_eq!(rt.value("c.count").unwrap(), Value::Int(1));
    assert_eq!(rt.value("c.#call").unwrap(), Value::Int(1), "data triggers are not consumed");

    // The same value again is not a change, so nothing fires.
    rt.set_value("c.#call", Value::Int(1)).unwrap();
    rt.run_until_idle().unwrap();
    assert_eq!(rt.value("c.count").unwrap(), Value::Int(1));

    rt.set_value("c.#call", Value::Int(2)).unwrap();
    rt.run_until_idle().unwrap();
    assert_eq!(rt.value("c.count").unwrap(), Value::Int(2));
}

// ── Change feed ─────────────────────────────────────────────────────

#[test]
fn subscribers_see_value_changes() {
    let mut rt = rt();
    rt.create_block("", "a").unwrap();
    rt.set_value("a.x", Value::Int(1)).unwrap();
    let _sub = rt.subscribe("a.x").unwrap();

    rt.set_value("a.x", Value::Int(2)).unwrap();
    assert_eq!(
        rt.drain_changes(),
        vec![Change::Value {
            path: "a.x".into(),
            value: Value::Int(2),
        }]
    );

    // Writing the held value again is not a change.
    rt.set_value("a.x", Value::Int(2)).unwrap();
    assert_eq!(rt.drain_changes(), vec![]);
}

#[test]
fn binding_attach_and_replace_notify_in_order() {
    let mut rt = rt();
    rt.create_block("", "a").unwrap();
    rt.create_block("", "b").unwrap();
    rt.set_value("a.x", Value::Int(1)).unwrap();
    rt.set_value("b.y", Value::Int(2)).unwrap();
    let _sub = rt.subscribe("a.x").unwrap();

    rt.set_binding("a.x", "##.b.y").unwrap();
    assert_eq!(
        rt.drain_changes(),
        vec![
            Change::Binding {
                path: "a.x".into(),
                target: Some("##.b.y".into()),
            },
            Change::Value {
                path: "a.x".into(),
                value: Value::Int(2),
            },
        ],
        "the binding note lands before the first delivery"
    );

    // An explicit value takes authority back and reports the cleared binding.
    rt.set_value("a.x", Value::Int(7)).unwrap();
    assert_eq!(
        rt.drain_changes(),
        vec![
            Change::Binding {
                path: "a.x".into(),
                target: None,
            },
            Change::Value {
                path: "a.x".into(),
                value: Value::Int(7),
            },
        ]
    );
}

#[test]
fn rebinding_the_current_path_is_a_no_op() {
    let mut rt = rt();
    rt.create_block("", "a").unwrap();
    rt.create_block("", "b").unwrap();
    rt.set_value("a.x", Value::Int(4)).unwrap();
    rt.set_binding("b.y", "##.a.x").unwrap();
    rt.run_until_idle().unwrap();
    let _sub = rt.subscribe("b.y").unwrap();

    let class = rt.set_binding("b.y", "##.a.x").unwrap();
    assert_eq!(class, BindClass::Local);
    assert_eq!(
        rt.drain_changes(),
        vec![],
        "re-binding the held path stays silent"
    );
    rt.run_until_idle().unwrap();
    assert_eq!(rt.value("b.y").unwrap(), Value::Int(4));
}

#[test]
fn child_watchers_see_adds_removes_and_drops() {
    let mut rt = rt();
    let _kids = rt.watch_children("").unwrap();

    rt.create_block("", "kid").unwrap();
    assert_eq!(
        rt.drain_changes(),
        vec![Change::ChildAdded {
            parent: String::new(),
            name: "kid".into(),
        }]
    );

    rt.create_block("", "kid2").unwrap();
    rt.drain_changes();
    rt.set_value("kid2.w", Value::Int(1)).unwrap();
    let sub = rt.subscribe("kid2.w").unwrap();

    rt.remove_block("kid2").unwrap();
    let changes = rt.drain_changes();
    assert!(
        changes.contains(&Change::ChildRemoved {
            parent: String::new(),
            name: "kid2".into(),
        }),
        "missing removal notice in {changes:?}"
    );
    assert!(
        changes.contains(&Change::Dropped {
            sub,
            path: "kid2.w".into(),
        }),
        "missing drop notice in {changes:?}"
    );
}

#[test]
fn unsubscribing_silences_the_feed() {
    let mut rt = rt();
    rt.create_block("", "a").unwrap();
    rt.set_value("a.x", Value::Int(1)).unwrap();
    let sub = rt.subscribe("a.x").unwrap();
    rt.unsubscribe(sub);

    rt.set_value("a.x", Value::Int(2)).unwrap();
    assert_eq!(rt.drain_changes(), vec![]);
}
