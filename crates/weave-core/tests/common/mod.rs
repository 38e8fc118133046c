// SPDX-License-Identifier: Apache-2.0
#![allow(dead_code)]

use std::rc::Rc;

use weave_core::{
    units, Band, RunCtx, RunMode, RunOutcome, Runtime, Unit, UnitDesc, Value, VirtualClock,
};

/// Shared run-order log. Probe units append their tag here, so a test can
/// assert the exact dispatch order of a pass as a single string.
pub const TRACE_LOG: &str = "#temp.audit.log";

/// Fresh runtime on a virtual clock with the built-in and test units
/// registered, plus the `#temp.audit` block backing [`TRACE_LOG`].
pub fn rt() -> Runtime {
    rt_with_clock().0
}

/// Like [`rt`], but hands back the clock for time-dependent tests.
pub fn rt_with_clock() -> (Runtime, Rc<VirtualClock>) {
    let clock = Rc::new(VirtualClock::new());
    let mut rt = Runtime::in_memory(clock.clone());
    units::register_builtins(&mut rt).expect("builtins register");
    rt.register_unit(PROBE).expect("probe registers");
    rt.register_unit(RELAY).expect("relay registers");
    rt.register_unit(FAULT).expect("fault registers");
    rt.register_unit(TALLY).expect("tally registers");
    rt.register_unit(GRENADE).expect("grenade registers");
    rt.create_block("#temp", "audit").expect("audit block");
    (rt, clock)
}

/// Current contents of the run-order log.
pub fn log(rt: &Runtime) -> String {
    rt.value(TRACE_LOG)
        .ok()
        .and_then(|v| v.as_str().map(str::to_owned))
        .unwrap_or_default()
}

/// Clears the run-order log, typically after setup runs.
pub fn reset_log(rt: &mut Runtime) {
    rt.set_value(TRACE_LOG, Value::Str(String::new()))
        .expect("log resets");
}

/// Runs everything queued by setup and clears the log, so assertions see
/// only the dispatches the test itself provokes.
pub fn settle(rt: &mut Runtime) {
    rt.run_until_idle().expect("setup settles");
    reset_log(rt);
}

/// Sets `#type` on the block at `path`.
pub fn attach(rt: &mut Runtime, path: &str, ty: &str) {
    rt.set_value(&format!("{path}.#type"), Value::Str(ty.into()))
        .expect("type attaches");
}

/// Creates a root-level block and attaches a probe unit to it.
pub fn probe_block(rt: &mut Runtime, name: &str) {
    rt.create_block("", name).expect("block creates");
    attach(rt, name, PROBE_NAME);
}

/// `probe`: appends its tag to [`TRACE_LOG`] on every run, mirrors `in` to
/// `#output`, and optionally writes `in` through the path in `poke`.
pub const PROBE_NAME: &str = "probe";

pub const PROBE: UnitDesc = UnitDesc {
    name: PROBE_NAME,
    mode: RunMode::Change,
    band: Band::Normal,
    pure: false,
    ctor: || Box::new(ProbeUnit),
};

struct ProbeUnit;

impl Unit for ProbeUnit {
    fn run(&mut self, ctx: &mut RunCtx<'_>) -> RunOutcome {
        let tag = match ctx.get("tag") {
            Value::Str(s) => s,
            _ => ctx.block_path(),
        };
        let mut entries = match ctx.get_path(TRACE_LOG) {
            Value::Str(s) => s,
            _ => String::new(),
        };
        entries.push_str(&tag);
        entries.push(';');
        let _ = ctx.set_path(TRACE_LOG, Value::Str(entries));
        if let Value::Str(target) = ctx.get("poke") {
            let v = ctx.get("in");
            let _ = ctx.set_path(&target, v);
        }
        let v = ctx.get("in");
        let _ = ctx.output(v);
        RunOutcome::Done
    }
}

/// `relay`: writes `in + 1` through the path in `target`. Two relays aimed
/// at each other grow their values forever, which is how the runaway-cycle
/// tests provoke the budget and depth guards.
pub const RELAY_NAME: &str = "relay";

pub const RELAY: UnitDesc = UnitDesc {
    name: RELAY_NAME,
    mode: RunMode::Change,
    band: Band::Normal,
    pure: false,
    ctor: || Box::new(RelayUnit),
};

struct RelayUnit;

impl Unit for RelayUnit {
    fn run(&mut self, ctx: &mut RunCtx<'_>) -> RunOutcome {
        let n = ctx.get("in").as_int().unwrap_or(0);
        if let Value::Str(target) = ctx.get("target") {
            let _ = ctx.set_path(&target, Value::Int(n + 1));
        }
        RunOutcome::Done
    }
}

/// `fault`: every trigger raises an error token on `#emit`.
pub const FAULT_NAME: &str = "fault";

pub const FAULT: UnitDesc = UnitDesc {
    name: FAULT_NAME,
    mode: RunMode::Call,
    band: Band::Normal,
    pure: false,
    ctor: || Box::new(FaultUnit),
};

struct FaultUnit;

impl Unit for FaultUnit {
    fn run(&mut self, ctx: &mut RunCtx<'_>) -> RunOutcome {
        let _ = ctx.take_call();
        let _ = ctx.emit_error("fault unit tripped");
        RunOutcome::Done
    }
}

/// `tally`: counts its runs in `runs` and swallows error tokens instead of
/// forwarding them, so it marks the end of an error chain.
pub const TALLY_NAME: &str = "tally";

pub const TALLY: UnitDesc = UnitDesc {
    name: TALLY_NAME,
    mode: RunMode::Call,
    band: Band::Normal,
    pure: false,
    ctor: || Box::new(TallyUnit),
};

struct TallyUnit;

impl Unit for TallyUnit {
    fn run(&mut self, ctx: &mut RunCtx<'_>) -> RunOutcome {
        let _ = ctx.take_call();
        let n = ctx.get("runs").as_int().unwrap_or(0);
        let _ = ctx.set("runs", Value::Int(n + 1));
        RunOutcome::Done
    }

    fn forwards_errors(&self) -> bool {
        false
    }
}

/// `grenade`: panics while `armed` is truthy, otherwise mirrors `in` to
/// `#output`. Exercises panic isolation at the run boundary.
pub const GRENADE_NAME: &str = "grenade";

pub const GRENADE: UnitDesc = UnitDesc {
    name: GRENADE_NAME,
    mode: RunMode::Change,
    band: Band::Normal,
    pure: true,
    ctor: || Box::new(GrenadeUnit),
};

struct GrenadeUnit;

impl Unit for GrenadeUnit {
    fn run(&mut self, ctx: &mut RunCtx<'_>) -> RunOutcome {
        assert!(!ctx.get("armed").is_truthy(), "armed grenade");
        let v = ctx.get("in");
        let _ = ctx.output(v);
        RunOutcome::Done
    }
}
