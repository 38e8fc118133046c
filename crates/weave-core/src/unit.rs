// SPDX-License-Identifier: Apache-2.0
//! The logic-unit plugin contract and the type registry.
//!
//! Units are closed plugins: a unit type is a descriptor (default run mode,
//! scheduler band, purity) plus a constructor function, registered under a
//! type name. A block's `#type` control selects a registered type; the
//! runtime constructs the instance, routes property changes into it, and
//! calls `run` when the scheduler dispatches the block.
//!
//! Replacing a registration bumps the registry revision. Live blocks notice
//! the stale revision and are re-attached with fresh instances, which is
//! how hot swapping works.

use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::runtime::RunCtx;
use crate::scheduler::Band;
use crate::value::Value;

/// When a unit's `run` is invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunMode {
    /// Once, when the unit is attached.
    Load,
    /// Whenever an accepted input change arrives.
    #[default]
    Change,
    /// Only on an explicit `#call` trigger.
    Call,
    /// Immediately on accepted change, bypassing the queue.
    Sync,
}

impl RunMode {
    /// Parses a `#mode` property value.
    #[must_use]
    pub fn parse(value: &Value) -> Option<Self> {
        match value.as_str()? {
            "load" => Some(Self::Load),
            "change" => Some(Self::Change),
            "call" => Some(Self::Call),
            "sync" => Some(Self::Sync),
            _ => None,
        }
    }
}

/// Result of a `run` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The unit finished its work for this trigger.
    Done,
    /// The unit is waiting (timer, external resource). The block is parked
    /// and re-enters the queue when the runtime polls pending work; normal
    /// re-queuing rules do not apply while parked.
    Pending,
}

/// The plugin contract every logic unit satisfies.
///
/// All hooks run on the runtime thread. `input_changed`/`config_changed`
/// return whether the change should make the block eligible to run.
/// `cleanup` is invalidation that keeps the block alive (type or config
/// change); `destroy` is block teardown.
pub trait Unit {
    /// A plain input property changed. Returning true schedules the block
    /// according to its effective mode.
    fn input_changed(&mut self, name: &str, value: &Value) -> bool {
        let _ = (name, value);
        true
    }

    /// A configuration control (an uninterpreted `#` property) changed.
    fn config_changed(&mut self, name: &str, value: &Value) -> bool {
        let _ = (name, value);
        false
    }

    /// Performs the unit's work.
    fn run(&mut self, ctx: &mut RunCtx<'_>) -> RunOutcome;

    /// Invalidation that keeps the block alive; release derived state here.
    fn cleanup(&mut self) {}

    /// The block is being torn down; release external resources here.
    fn destroy(&mut self) {}

    /// Whether error events delivered to this unit's `#call` are forwarded
    /// to `#emit`. Units that handle failures themselves return false.
    fn forwards_errors(&self) -> bool {
        true
    }
}

/// Constructor for unit instances. Plain function pointer: unit types are
/// closed definitions, not captured state.
pub type UnitCtor = fn() -> Box<dyn Unit>;

/// Registered unit type.
#[derive(Clone, Copy)]
pub struct UnitDesc {
    /// Type name selected by `#type`.
    pub name: &'static str,
    /// Default run mode (a block's `#mode` overrides it).
    pub mode: RunMode,
    /// Default scheduler band (a block's `#priority` overrides it).
    pub band: Band,
    /// Declared purity: a pure unit reads only its inputs and writes only
    /// its outputs. Advisory; band-0 units are expected to be pure.
    pub pure: bool,
    /// Instance constructor.
    pub ctor: UnitCtor,
}

impl core::fmt::Debug for UnitDesc {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("UnitDesc")
            .field("name", &self.name)
            .field("mode", &self.mode)
            .field("band", &self.band)
            .field("pure", &self.pure)
            .finish()
    }
}

/// Registration failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// The type name is already registered. Use
    /// [`UnitRegistry::register_replacing`] for hot swap.
    #[error("unit type `{name}` is already registered")]
    DuplicateUnitType {
        /// The contested name.
        name: String,
    },
}

/// Table of registered unit types.
#[derive(Debug, Default)]
pub struct UnitRegistry {
    by_name: FxHashMap<&'static str, UnitDesc>,
    revision: u64,
}

impl UnitRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new unit type. Duplicate names are an error.
    pub fn register(&mut self, desc: UnitDesc) -> Result<(), RegistryError> {
        if self.by_name.contains_key(desc.name) {
            return Err(RegistryError::DuplicateUnitType {
                name: desc.name.to_owned(),
            });
        }
        self.by_name.insert(desc.name, desc);
        Ok(())
    }

    /// Registers or replaces a unit type and bumps the revision, marking
    /// live instances of the type for re-attachment.
    pub fn register_replacing(&mut self, desc: UnitDesc) {
        self.by_name.insert(desc.name, desc);
        self.revision += 1;
    }

    /// Looks up a type by name.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<&UnitDesc> {
        self.by_name.get(name)
    }

    /// Current hot-swap revision.
    #[must_use]
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Registered type names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.by_name.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::RunCtx;

    struct Nop;
    impl Unit for Nop {
        fn run(&mut self, _ctx: &mut RunCtx<'_>) -> RunOutcome {
            RunOutcome::Done
        }
    }

    fn nop_desc() -> UnitDesc {
        UnitDesc {
            name: "nop",
            mode: RunMode::Change,
            band: Band::Normal,
            pure: true,
            ctor: || Box::new(Nop),
        }
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut reg = UnitRegistry::new();
        reg.register(nop_desc()).unwrap();
        assert_eq!(
            reg.register(nop_desc()),
            Err(RegistryError::DuplicateUnitType { name: "nop".into() })
        );
    }

    #[test]
    fn replacing_bumps_the_revision() {
        let mut reg = UnitRegistry::new();
        reg.register(nop_desc()).unwrap();
        assert_eq!(reg.revision(), 0);
        reg.register_replacing(nop_desc());
        assert_eq!(reg.revision(), 1);
        assert!(reg.lookup("nop").is_some());
    }

    #[test]
    fn mode_parses_from_property_values() {
        assert_eq!(RunMode::parse(&Value::Str("call".into())), Some(RunMode::Call));
        assert_eq!(RunMode::parse(&Value::Str("sync".into())), Some(RunMode::Sync));
        assert_eq!(RunMode::parse(&Value::Str("nope".into())), None);
        assert_eq!(RunMode::parse(&Value::Int(1)), None);
    }
}
