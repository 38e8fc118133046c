// SPDX-License-Identifier: Apache-2.0
//! Timer unit: `delay`.

use crate::runtime::RunCtx;
use crate::scheduler::Band;
use crate::unit::{RunMode, RunOutcome, Unit, UnitDesc};

/// Type name of the delay unit.
pub const DELAY_UNIT_NAME: &str = "delay";

/// Emits on `#emit` once `ms` milliseconds of runtime-clock time have
/// passed since the trigger.
///
/// A trigger arms the timer and parks the block (`Pending`); each poll
/// re-runs it until the deadline passes. Triggers arriving while armed are
/// absorbed.
#[derive(Default)]
struct DelayUnit {
    deadline: Option<u64>,
}

impl Unit for DelayUnit {
    fn run(&mut self, ctx: &mut RunCtx<'_>) -> RunOutcome {
        let now = ctx.now_ms();
        match self.deadline {
            None => {
                let _ = ctx.take_call();
                let ms = ctx.get("ms").as_f64().unwrap_or(0.0).max(0.0);
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                let ms = ms as u64;
                self.deadline = Some(now.saturating_add(ms));
                RunOutcome::Pending
            }
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                let _ = ctx.emit();
                RunOutcome::Done
            }
            Some(_) => RunOutcome::Pending,
        }
    }

    fn cleanup(&mut self) {
        self.deadline = None;
    }
}

/// Descriptor for the `delay` unit: trigger-driven, band-2 (may stay
/// pending across passes).
#[must_use]
pub fn delay_unit() -> UnitDesc {
    UnitDesc {
        name: DELAY_UNIT_NAME,
        mode: RunMode::Call,
        band: Band::Deferred,
        pure: false,
        ctor: || Box::<DelayUnit>::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::VirtualClock;
    use crate::runtime::Runtime;
    use crate::value::Value;
    use std::rc::Rc;

    #[test]
    fn delay_fires_after_virtual_time_passes() {
        let clock = VirtualClock::new();
        let mut rt = Runtime::in_memory(Rc::new(clock.clone()));
        rt.register_unit(delay_unit()).unwrap();
        rt.create_block("", "d").unwrap();
        rt.set_value("d.ms", Value::Int(100)).unwrap();
        rt.set_value("d.#type", Value::Str("delay".into())).unwrap();
        rt.run_until_idle().unwrap();

        rt.call("d").unwrap();
        rt.run_until_idle().unwrap();
        assert_eq!(rt.parked_len(), 1, "armed timer parks the block");

        clock.advance(50);
        rt.poll_pending();
        rt.run_until_idle().unwrap();
        assert_eq!(rt.parked_len(), 1, "not due yet");

        clock.advance(60);
        rt.poll_pending();
        rt.run_until_idle().unwrap();
        assert_eq!(rt.parked_len(), 0);
        assert!(
            matches!(rt.value("d.#emit").unwrap(), Value::Event(_)),
            "expiry must emit a token"
        );
    }

    #[test]
    fn untriggered_delay_stays_idle() {
        let clock = VirtualClock::new();
        let mut rt = Runtime::in_memory(Rc::new(clock.clone()));
        rt.register_unit(delay_unit()).unwrap();
        rt.create_block("", "d").unwrap();
        rt.set_value("d.ms", Value::Int(10)).unwrap();
        rt.set_value("d.#type", Value::Str("delay".into())).unwrap();
        rt.run_until_idle().unwrap();
        clock.advance(1000);
        rt.poll_pending();
        rt.run_until_idle().unwrap();
        assert_eq!(rt.parked_len(), 0);
        assert!(!rt.has_prop("d.#emit"), "nothing may emit without a trigger");
    }
}
