// SPDX-License-Identifier: Apache-2.0
//! weave-core: reactive block/property dataflow runtime.
//!
//! A graph of named blocks whose properties hold literal values or bind to
//! other properties by dotted path; a cooperative three-band scheduler
//! re-runs affected blocks when upstream values change. Logic units attach
//! to blocks through a closed plugin trait and registry. The runtime is an
//! explicit context object: construct one per engine (or per test), no
//! global state.
//!
//! ```
//! use std::rc::Rc;
//! use weave_core::{units, Runtime, Value, VirtualClock};
//!
//! # fn main() -> Result<(), weave_core::RuntimeError> {
//! let mut rt = Runtime::in_memory(Rc::new(VirtualClock::new()));
//! units::register_builtins(&mut rt)?;
//! rt.create_block("", "sum")?;
//! rt.set_value("sum.0", Value::Int(2))?;
//! rt.set_value("sum.1", Value::Int(3))?;
//! rt.set_value("sum.#type", Value::Str("add".into()))?;
//! rt.run_until_idle()?;
//! assert_eq!(rt.value("sum.#output")?, Value::Int(5));
//! # Ok(())
//! # }
//! ```
#![forbid(unsafe_code)]
#![deny(missing_docs, rust_2018_idioms, unused_must_use)]
#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    clippy::cargo,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::dbg_macro,
    clippy::print_stdout,
    clippy::print_stderr
)]
#![allow(
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::too_many_lines,
    clippy::doc_markdown,
    clippy::similar_names,
    clippy::module_name_repetitions,
    clippy::use_self,
    clippy::cognitive_complexity,
    clippy::option_if_let_else,
    clippy::significant_drop_tightening,
    clippy::manual_let_else,
    clippy::needless_pass_by_value,
    clippy::unreadable_literal,
    clippy::missing_const_for_fn,
    clippy::redundant_pub_crate,
    clippy::return_self_not_must_use,
    clippy::too_long_first_doc_paragraph
)]

mod arena;
mod binding;
mod block;
mod clock;
mod event;
mod flow;
mod graph;
mod history;
mod ident;
mod path;
mod prop;
mod runtime;
mod scheduler;
mod snapshot;
mod store;
mod unit;
/// Built-in demo units exercised by tests and the CLI.
pub mod units;
mod value;

// Re-exports for the stable public API
/// Block node and its structural role.
pub use block::{Block, BlockKind};
/// Injected time sources.
pub use clock::{Clock, SystemClock, VirtualClock};
/// Tick-stamped trigger tokens and their error payloads.
pub use event::{Event, EventError};
/// Flow-block state (enablement, history, provenance).
pub use flow::FlowState;
/// Structural graph store and its errors.
pub use graph::{Graph, GraphError};
/// Per-flow checkpoint history.
pub use history::History;
/// Generational ids for graph objects, subscriptions, and the pass tick.
pub use ident::{BindingId, BlockId, PropId, SubId, Tick};
/// Path grammar: resolution, admission, and the fixed scopes.
pub use path::{
    bindability, is_valid_name, relative_path, resolve, scope_of, segments, BindClass, PathError,
    Resolved, ScopeKind, SCOPE_GLOBAL, SCOPE_SHARED, SCOPE_TEMP, SEG_FLOW_ROOT, SEG_HERE,
    SEG_PARENT,
};
/// Property cell, name-role classification, and the interpreted controls.
pub use prop::{
    classify, ControlKind, PropKind, Property, CTRL_CALL, CTRL_EMIT, CTRL_ENABLED, CTRL_LENGTH,
    CTRL_MODE, CTRL_OUTPUT, CTRL_PRIORITY, CTRL_TYPE,
};
/// The runtime context, its change feed, and the unit-facing run context.
pub use runtime::{Change, RunCtx, Runtime, RuntimeError};
/// Scheduler bands, limits, and errors.
pub use scheduler::{Band, SchedError, PASS_BUDGET, SYNC_DEPTH_LIMIT};
/// Snapshot map format, markers, and digests.
pub use snapshot::{digest, save_block, SnapshotMap, BINDING_MARKER, FLOW_MARKER};
/// Flow-definition storage port and in-crate backends.
pub use store::{DirStore, FlowStore, MemoryStore, StoreError};
/// Logic-unit contract, descriptors, and the type registry.
pub use unit::{RegistryError, RunMode, RunOutcome, Unit, UnitCtor, UnitDesc, UnitRegistry};
/// Property value type.
pub use value::Value;
