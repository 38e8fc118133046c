// SPDX-License-Identifier: Apache-2.0
//! Built-in demo units.
//!
//! These are not a function library; they are the handful of units the
//! engine needs to be testable end-to-end: pure arithmetic (`add`,
//! `const`), routing (`gate`, `counter`), and a timer (`delay`) driven by
//! the runtime's injected clock. Register them with [`register_builtins`]
//! or pick individual descriptors.

mod arith;
mod control;
mod timing;

pub use arith::{add_unit, const_unit, ADD_UNIT_NAME, CONST_UNIT_NAME};
pub use control::{counter_unit, gate_unit, COUNTER_UNIT_NAME, GATE_UNIT_NAME};
pub use timing::{delay_unit, DELAY_UNIT_NAME};

use crate::runtime::{Runtime, RuntimeError};

/// Registers every built-in unit type on `rt`.
pub fn register_builtins(rt: &mut Runtime) -> Result<(), RuntimeError> {
    rt.register_unit(add_unit())?;
    rt.register_unit(const_unit())?;
    rt.register_unit(gate_unit())?;
    rt.register_unit(counter_unit())?;
    rt.register_unit(delay_unit())?;
    Ok(())
}
