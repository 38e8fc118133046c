// SPDX-License-Identifier: Apache-2.0
//! Routing units: `gate` and `counter`.

use crate::runtime::RunCtx;
use crate::scheduler::Band;
use crate::unit::{RunMode, RunOutcome, Unit, UnitDesc};
use crate::value::Value;

/// Type name of the gating unit.
pub const GATE_UNIT_NAME: &str = "gate";
/// Type name of the counting unit.
pub const COUNTER_UNIT_NAME: &str = "counter";

/// Forwards `in` to `#output` while `open` is truthy; holds the last
/// output while closed.
struct GateUnit;

impl Unit for GateUnit {
    fn run(&mut self, ctx: &mut RunCtx<'_>) -> RunOutcome {
        if ctx.get("open").is_truthy() {
            let v = ctx.get("in");
            let _ = ctx.output(v);
        }
        RunOutcome::Done
    }
}

/// Descriptor for the `gate` unit: band-0, pure, change-driven.
#[must_use]
pub fn gate_unit() -> UnitDesc {
    UnitDesc {
        name: GATE_UNIT_NAME,
        mode: RunMode::Change,
        band: Band::Fast,
        pure: true,
        ctor: || Box::new(GateUnit),
    }
}

/// Counts `#call` triggers into `count`, mirrors the total to `#output`,
/// and emits a fresh token so counters chain through bound `#call`s.
struct CounterUnit;

impl Unit for CounterUnit {
    fn run(&mut self, ctx: &mut RunCtx<'_>) -> RunOutcome {
        let _ = ctx.take_call();
        let n = ctx.get("count").as_int().unwrap_or(0) + 1;
        let _ = ctx.set("count", Value::Int(n));
        let _ = ctx.output(Value::Int(n));
        let _ = ctx.emit();
        RunOutcome::Done
    }
}

/// Descriptor for the `counter` unit: trigger-driven, stateful.
#[must_use]
pub fn counter_unit() -> UnitDesc {
    UnitDesc {
        name: COUNTER_UNIT_NAME,
        mode: RunMode::Call,
        band: Band::Normal,
        pure: false,
        ctor: || Box::new(CounterUnit),
    }
}
