// SPDX-License-Identifier: Apache-2.0
//! Pure arithmetic units: `add` and `const`.

use crate::runtime::RunCtx;
use crate::scheduler::Band;
use crate::unit::{RunMode, RunOutcome, Unit, UnitDesc};
use crate::value::Value;

/// Type name of the summing unit.
pub const ADD_UNIT_NAME: &str = "add";
/// Type name of the constant source unit.
pub const CONST_UNIT_NAME: &str = "const";

/// Sums its numbered inputs into `#output`.
///
/// Integer inputs stay integral; any float input promotes the sum to a
/// float. Non-numeric inputs count as zero.
struct AddUnit;

impl Unit for AddUnit {
    fn run(&mut self, ctx: &mut RunCtx<'_>) -> RunOutcome {
        let mut int_sum: i64 = 0;
        let mut float_sum: f64 = 0.0;
        let mut all_int = true;
        for i in 0..ctx.input_len() {
            match ctx.numbered(i) {
                Value::Int(n) => {
                    int_sum = int_sum.wrapping_add(n);
                    #[allow(clippy::cast_precision_loss)]
                    {
                        float_sum += n as f64;
                    }
                }
                other => {
                    if let Some(f) = other.as_f64() {
                        all_int = false;
                        float_sum += f;
                    }
                }
            }
        }
        let sum = if all_int {
            Value::Int(int_sum)
        } else {
            Value::Float(float_sum)
        };
        let _ = ctx.output(sum);
        RunOutcome::Done
    }
}

/// Descriptor for the `add` unit: band-0, pure, change-driven.
#[must_use]
pub fn add_unit() -> UnitDesc {
    UnitDesc {
        name: ADD_UNIT_NAME,
        mode: RunMode::Change,
        band: Band::Fast,
        pure: true,
        ctor: || Box::new(AddUnit),
    }
}

/// Copies its `value` input to `#output` once, when attached.
struct ConstUnit;

impl Unit for ConstUnit {
    fn run(&mut self, ctx: &mut RunCtx<'_>) -> RunOutcome {
        let v = ctx.get("value");
        let _ = ctx.output(v);
        RunOutcome::Done
    }
}

/// Descriptor for the `const` unit: band-0, pure, runs once at attach.
#[must_use]
pub fn const_unit() -> UnitDesc {
    UnitDesc {
        name: CONST_UNIT_NAME,
        mode: RunMode::Load,
        band: Band::Fast,
        pure: true,
        ctor: || Box::new(ConstUnit),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::VirtualClock;
    use crate::runtime::Runtime;
    use std::rc::Rc;

    fn rt() -> Runtime {
        let mut rt = Runtime::in_memory(Rc::new(VirtualClock::new()));
        rt.register_unit(add_unit()).unwrap();
        rt.register_unit(const_unit()).unwrap();
        rt
    }

    #[test]
    fn add_sums_numbered_inputs() {
        let mut rt = rt();
        rt.create_block("", "sum").unwrap();
        rt.set_value("sum.0", Value::Int(2)).unwrap();
        rt.set_value("sum.1", Value::Int(3)).unwrap();
        rt.set_value("sum.#type", Value::Str("add".into())).unwrap();
        rt.run_until_idle().unwrap();
        assert_eq!(rt.value("sum.#output").unwrap(), Value::Int(5));

        rt.set_value("sum.0", Value::Int(4)).unwrap();
        rt.run_until_idle().unwrap();
        assert_eq!(rt.value("sum.#output").unwrap(), Value::Int(7));
    }

    #[test]
    fn add_promotes_to_float_on_any_float_input() {
        let mut rt = rt();
        rt.create_block("", "sum").unwrap();
        rt.set_value("sum.0", Value::Int(1)).unwrap();
        rt.set_value("sum.1", Value::Float(0.5)).unwrap();
        rt.set_value("sum.#type", Value::Str("add".into())).unwrap();
        rt.run_until_idle().unwrap();
        assert_eq!(rt.value("sum.#output").unwrap(), Value::Float(1.5));
    }

    #[test]
    fn add_respects_declared_length() {
        let mut rt = rt();
        rt.create_block("", "sum").unwrap();
        rt.set_value("sum.0", Value::Int(1)).unwrap();
        rt.set_value("sum.1", Value::Int(2)).unwrap();
        rt.set_value("sum.2", Value::Int(4)).unwrap();
        rt.set_value("sum.#length", Value::Int(2)).unwrap();
        rt.set_value("sum.#type", Value::Str("add".into())).unwrap();
        rt.run_until_idle().unwrap();
        assert_eq!(
            rt.value("sum.#output").unwrap(),
            Value::Int(3),
            "#length caps the numbered inputs"
        );
    }

    #[test]
    fn const_emits_once_at_attach() {
        let mut rt = rt();
        rt.create_block("", "c").unwrap();
        rt.set_value("c.value", Value::Str("hi".into())).unwrap();
        rt.set_value("c.#type", Value::Str("const".into())).unwrap();
        rt.run_until_idle().unwrap();
        assert_eq!(rt.value("c.#output").unwrap(), Value::Str("hi".into()));

        // Load mode: later input changes do not re-run the unit.
        rt.set_value("c.value", Value::Str("later".into())).unwrap();
        rt.run_until_idle().unwrap();
        assert_eq!(rt.value("c.#output").unwrap(), Value::Str("hi".into()));
    }
}
