// SPDX-License-Identifier: Apache-2.0
//! The runtime: write path, change dispatch, scheduling, and persistence.
//!
//! Every mutation funnels through one write path that enforces value
//! authority: a persisted write records the own value, a transient write
//! does not survive a save, and a binding forward never takes authority at
//! all. Event tokens are never persisted regardless of how they arrive.
//!
//! Dispatch is queued, not recursive. A write enqueues a note; draining the
//! note queue notifies binding chains, external subscribers, and the owning
//! block's unit in that order. A property being mid-notification rejects
//! runtime writes and drops binding forwards, which breaks notification
//! cycles that value deduplication alone cannot catch.
//!
//! Units run when the scheduler dispatches their block. The `#call` prelude
//! consumes the trigger token, discards stale ones, and short-circuits
//! error tokens into `#emit` so failures travel down call chains without
//! running the code in between.

use std::collections::VecDeque;
use std::mem;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;

use rustc_hash::{FxHashMap, FxHashSet};
use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

use crate::binding::{self, Segment};
use crate::block::BlockKind;
use crate::clock::Clock;
use crate::event::{Event, EventError};
use crate::flow::FlowState;
use crate::graph::{Graph, GraphError};
use crate::ident::{BlockId, PropId, SubId, Tick};
use crate::path::{self, BindClass, PathError, Resolved, ScopeKind};
use crate::prop::{
    classify, BindingRef, ControlKind, PropKind, CTRL_CALL, CTRL_EMIT, CTRL_ENABLED, CTRL_LENGTH,
    CTRL_MODE, CTRL_OUTPUT, CTRL_PRIORITY, CTRL_TYPE,
};
use crate::scheduler::{Band, SchedError, Scheduler, SYNC_DEPTH_LIMIT};
use crate::snapshot::{self, EntryKind, SnapshotMap};
use crate::store::{FlowStore, MemoryStore, StoreError};
use crate::unit::{RegistryError, RunMode, RunOutcome, Unit, UnitDesc, UnitRegistry};
use crate::value::Value;

/// Errors surfaced by runtime operations.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Path parsing or admission failure.
    #[error(transparent)]
    Path(#[from] PathError),
    /// Graph lookup or structure failure.
    #[error(transparent)]
    Graph(#[from] GraphError),
    /// Scheduler budget or depth failure.
    #[error(transparent)]
    Sched(#[from] SchedError),
    /// Unit registry failure.
    #[error(transparent)]
    Registry(#[from] RegistryError),
    /// Flow store failure.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// A write targeted a property that is mid-notification.
    #[error("write rejected: `{path}` is mid-notification")]
    ReentrantWrite {
        /// Absolute path of the rejected property.
        path: String,
    },
    /// A write targeted the read-only scope.
    #[error("scope `{scope}` is read-only")]
    ReadOnlyScope {
        /// Scope anchor spelling.
        scope: String,
    },
    /// A flow operation targeted a block that is not a flow.
    #[error("`{path}` is not a flow")]
    NotAFlow {
        /// Absolute path of the offending block.
        path: String,
    },
    /// The root or a scope block cannot be removed or replaced.
    #[error("`{path}` is structural and cannot be removed")]
    Permanent {
        /// Absolute path of the protected block.
        path: String,
    },
    /// A snapshot could not be applied.
    #[error("cannot apply snapshot at `{path}`: {reason}")]
    BadSnapshot {
        /// Target path of the failed load.
        path: String,
        /// What was wrong with the document.
        reason: String,
    },
}

/// One externally observable change, delivered through
/// [`Runtime::drain_changes`].
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    /// A watched property's value changed.
    Value {
        /// Absolute property path.
        path: String,
        /// The new value.
        value: Value,
    },
    /// A watched property's binding changed.
    Binding {
        /// Absolute property path.
        path: String,
        /// New binding path, `None` when the binding was cleared.
        target: Option<String>,
    },
    /// A child block appeared under a watched block.
    ChildAdded {
        /// Absolute path of the parent block.
        parent: String,
        /// Property name the child hangs off.
        name: String,
    },
    /// A child block disappeared from under a watched block.
    ChildRemoved {
        /// Absolute path of the parent block.
        parent: String,
        /// Property name the child hung off.
        name: String,
    },
    /// A subscription's target was destroyed; the subscription is gone.
    Dropped {
        /// The dead subscription.
        sub: SubId,
        /// Former absolute path of the target.
        path: String,
    },
}

/// Queued notification.
enum Note {
    /// A property's value changed (or a forced re-notify was requested).
    Value { prop: PropId },
    /// A property's binding changed.
    Binding { prop: PropId },
}

/// Authority class of a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteKind {
    /// Own value; recorded as persisted state.
    Persist,
    /// Own value for this session only; never saved.
    Transient,
    /// Delivery from a binding chain or an internal restore; takes no
    /// authority.
    Forward,
}

enum SubTarget {
    Prop(PropId),
    Children(BlockId),
}

/// External subscription records.
#[derive(Default)]
struct SubTable {
    next: u64,
    props: FxHashMap<PropId, Vec<SubId>>,
    children: FxHashMap<BlockId, Vec<SubId>>,
    index: FxHashMap<SubId, SubTarget>,
}

impl SubTable {
    fn add_prop(&mut self, prop: PropId) -> SubId {
        self.next += 1;
        let id = SubId(self.next);
        self.props.entry(prop).or_default().push(id);
        self.index.insert(id, SubTarget::Prop(prop));
        id
    }

    fn add_children(&mut self, block: BlockId) -> SubId {
        self.next += 1;
        let id = SubId(self.next);
        self.children.entry(block).or_default().push(id);
        self.index.insert(id, SubTarget::Children(block));
        id
    }

    fn remove(&mut self, id: SubId) {
        match self.index.remove(&id) {
            Some(SubTarget::Prop(p)) => {
                if let Some(v) = self.props.get_mut(&p) {
                    v.retain(|s| *s != id);
                    if v.is_empty() {
                        self.props.remove(&p);
                    }
                }
            }
            Some(SubTarget::Children(b)) => {
                if let Some(v) = self.children.get_mut(&b) {
                    v.retain(|s| *s != id);
                    if v.is_empty() {
                        self.children.remove(&b);
                    }
                }
            }
            None => {}
        }
    }

    fn has_prop_watch(&self, prop: PropId) -> bool {
        self.props.contains_key(&prop)
    }

    fn has_children_watch(&self, block: BlockId) -> bool {
        self.children.contains_key(&block)
    }

    fn drop_prop(&mut self, prop: PropId) -> Vec<SubId> {
        let ids = self.props.remove(&prop).unwrap_or_default();
        for id in &ids {
            self.index.remove(id);
        }
        ids
    }

    fn drop_children(&mut self, block: BlockId) -> Vec<SubId> {
        let ids = self.children.remove(&block).unwrap_or_default();
        for id in &ids {
            self.index.remove(id);
        }
        ids
    }
}

/// The reactive runtime over one [`Graph`].
pub struct Runtime {
    graph: Graph,
    sched: Scheduler,
    registry: UnitRegistry,
    clock: Rc<dyn Clock>,
    store: Box<dyn FlowStore>,
    subs: SubTable,
    outbox: VecDeque<Change>,
    notes: VecDeque<Note>,
    draining: bool,
    sync_depth: u8,
    /// Sync runs triggered within the current notification cascade. A sync
    /// cycle flattens through the note queue instead of recursing, so the
    /// depth counter alone cannot catch it.
    cascade_syncs: u8,
    event_seq: u64,
    load_depth: u32,
    /// Blocks whose `#type` arrived during a load; attached when the
    /// outermost load finishes so configuration lands before construction.
    pending_attach: Vec<BlockId>,
    /// Parked blocks re-admitted by the last poll; their next run waives
    /// the call-token requirement.
    resuming: FxHashSet<BlockId>,
}

impl Runtime {
    /// Creates a runtime over a fresh graph.
    #[must_use]
    pub fn new(store: Box<dyn FlowStore>, clock: Rc<dyn Clock>) -> Self {
        Self {
            graph: Graph::new(),
            sched: Scheduler::new(),
            registry: UnitRegistry::new(),
            clock,
            store,
            subs: SubTable::default(),
            outbox: VecDeque::new(),
            notes: VecDeque::new(),
            draining: false,
            sync_depth: 0,
            cascade_syncs: 0,
            event_seq: 0,
            load_depth: 0,
            pending_attach: Vec::new(),
            resuming: FxHashSet::default(),
        }
    }

    /// Creates a runtime with an in-memory flow store.
    #[must_use]
    pub fn in_memory(clock: Rc<dyn Clock>) -> Self {
        Self::new(Box::new(MemoryStore::new()), clock)
    }

    /// The underlying graph, for traversal and inspection.
    #[must_use]
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// The unit type registry.
    #[must_use]
    pub fn registry(&self) -> &UnitRegistry {
        &self.registry
    }

    /// Current scheduler tick.
    #[must_use]
    pub fn tick(&self) -> Tick {
        self.sched.tick()
    }

    /// Milliseconds on the injected clock.
    #[must_use]
    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    /// Number of blocks parked on pending work.
    #[must_use]
    pub fn parked_len(&self) -> usize {
        self.sched.parked_len()
    }

    // ── Unit registration ───────────────────────────────────────────

    /// Registers a unit type. Fails on a duplicate name.
    pub fn register_unit(&mut self, desc: UnitDesc) -> Result<(), RuntimeError> {
        self.registry.register(desc)?;
        Ok(())
    }

    /// Registers or replaces a unit type and re-attaches every live block
    /// of that type with a fresh instance.
    pub fn register_unit_replacing(&mut self, desc: UnitDesc) -> Result<(), RuntimeError> {
        let name = desc.name;
        self.registry.register_replacing(desc);
        let stale: Vec<BlockId> = self
            .graph
            .blocks
            .iter()
            .filter(|(_, b)| b.unit.type_name.as_deref() == Some(name))
            .map(|(id, _)| id)
            .collect();
        for block in stale {
            debug!(block = %block, unit = name, "re-attaching after registration swap");
            self.apply_type(block)?;
        }
        self.drain()
    }

    // ── Values ──────────────────────────────────────────────────────

    /// Current value of the property at `path`.
    pub fn value(&self, path: &str) -> Result<Value, RuntimeError> {
        let prop = self.graph.prop_at(path)?;
        Ok(self.graph.prop(prop)?.value().clone())
    }

    /// True when a property exists at `path`.
    #[must_use]
    pub fn has_prop(&self, path: &str) -> bool {
        self.graph.prop_at(path).is_ok()
    }

    /// Sets the own (persisted) value of the property at `path`, creating
    /// the property if needed. Replaces any binding: an explicit value is a
    /// new authority.
    pub fn set_value(&mut self, path: &str, value: Value) -> Result<(), RuntimeError> {
        let prop = self.ensure_prop_at(path)?;
        self.check_writable(prop)?;
        if let Some(bref) = self.graph.prop(prop)?.binding.clone() {
            binding::detach(&mut self.graph, bref.node, prop);
            self.graph.prop_mut(prop)?.binding = None;
            self.notes.push_back(Note::Binding { prop });
        }
        self.write_prop(prop, value, WriteKind::Persist, false)?;
        self.drain()
    }

    /// Sets a transient value: visible live, absent from saves, and
    /// overwritten by the next binding delivery or restore.
    pub fn update_value(&mut self, path: &str, value: Value) -> Result<(), RuntimeError> {
        let prop = self.ensure_prop_at(path)?;
        self.check_writable(prop)?;
        self.write_prop(prop, value, WriteKind::Transient, false)?;
        self.drain()
    }

    /// Restores the property at `path` to its persisted value (`Null` when
    /// none). No-op for bound properties; the binding keeps authority.
    pub fn restore_value(&mut self, path: &str) -> Result<(), RuntimeError> {
        let prop = self.graph.prop_at(path)?;
        if self.graph.prop(prop)?.binding.is_some() {
            return Ok(());
        }
        let restored = self
            .graph
            .prop(prop)?
            .persisted()
            .cloned()
            .unwrap_or(Value::Null);
        self.write_prop(prop, restored, WriteKind::Forward, false)?;
        self.drain()
    }

    /// Writes a host-sourced value into the read-only `#global` scope.
    pub fn seed_global(&mut self, name: &str, value: Value) -> Result<(), RuntimeError> {
        let global = self.graph.scope_block(ScopeKind::Global);
        let prop = self.graph.ensure_prop(global, name)?;
        self.write_prop(prop, value, WriteKind::Persist, false)?;
        self.drain()
    }

    // ── Bindings ────────────────────────────────────────────────────

    /// Binds the property at `from` to the path `to` (relative to the
    /// property's block). Returns the binding's class. Admission failures
    /// leave any existing binding untouched.
    pub fn set_binding(&mut self, from: &str, to: &str) -> Result<BindClass, RuntimeError> {
        let prop = self.ensure_prop_at(from)?;
        self.check_writable(prop)?;
        let class = self.bind_prop(prop, to)?;
        self.drain()?;
        Ok(class)
    }

    /// Removes the binding of the property at `path` and restores its
    /// persisted value. Observers are notified exactly once even when the
    /// restored value equals the last delivered one.
    pub fn clear_binding(&mut self, path: &str) -> Result<(), RuntimeError> {
        let prop = self.graph.prop_at(path)?;
        self.unbind_prop(prop)?;
        self.drain()
    }

    /// Binding path of the property at `path`, if bound.
    pub fn binding_of(&self, path: &str) -> Result<Option<String>, RuntimeError> {
        let prop = self.graph.prop_at(path)?;
        Ok(self.graph.prop(prop)?.binding_path().map(str::to_owned))
    }

    fn bind_prop(&mut self, prop: PropId, to: &str) -> Result<BindClass, RuntimeError> {
        let (owner, from_abs, current) = {
            let p = self.graph.prop(prop)?;
            (
                p.owner(),
                self.graph.prop_path(prop)?,
                p.binding_path().map(str::to_owned),
            )
        };
        // Admission happens before any mutation, so a rejected binding
        // leaves the previous one in place.
        let owner_path = self.graph.block_path(owner)?;
        let to_abs = match path::resolve(&owner_path, to)? {
            Resolved::Absolute(p) => p,
            Resolved::Dynamic(_) => {
                warn!(path = to, "path is textually irresolvable; walking the live graph");
                self.peek_abs(owner, to)?
            }
        };
        let class = path::bindability(&to_abs, &from_abs)?;
        if current.as_deref() == Some(to) {
            return Ok(class);
        }
        if let Some(old) = self.graph.prop(prop)?.binding.clone() {
            binding::detach(&mut self.graph, old.node, prop);
            self.graph.prop_mut(prop)?.binding = None;
        }
        // The persisted value stays: delivery overlays own authority, and
        // unbinding or an explicit restore brings it back.
        let segments = binding::parse_segments(to)?;
        let (terminal, initial) = binding::attach(&mut self.graph, owner, to, &segments, prop)?;
        self.graph.prop_mut(prop)?.binding = Some(BindingRef {
            path: to.to_owned(),
            node: terminal,
        });
        self.notes.push_back(Note::Binding { prop });
        self.write_prop(prop, initial, WriteKind::Forward, false)?;
        info!(from = %from_abs, to, ?class, "binding set");
        Ok(class)
    }

    fn unbind_prop(&mut self, prop: PropId) -> Result<(), RuntimeError> {
        let Some(bref) = self.graph.prop(prop)?.binding.clone() else {
            return Ok(());
        };
        binding::detach(&mut self.graph, bref.node, prop);
        let restored = {
            let p = self.graph.prop_mut(prop)?;
            p.binding = None;
            p.persisted.clone().unwrap_or(Value::Null)
        };
        self.notes.push_back(Note::Binding { prop });
        // Forced: removal notifies once even when the value is unchanged.
        self.write_prop(prop, restored, WriteKind::Forward, true)?;
        Ok(())
    }

    /// Structural resolution of a path whose textual form is dynamic
    /// (`###` or similar). Walks the live graph without creating anything;
    /// where structure runs out, the remainder stays textual. The result is
    /// only used for scope classification.
    fn peek_abs(&self, from: BlockId, rel: &str) -> Result<String, RuntimeError> {
        let segments = binding::parse_segments(rel)?;
        let mut cursor = Some(from);
        let mut tail: Vec<&str> = Vec::new();
        for seg in &segments {
            if !tail.is_empty() {
                if let Segment::Name(name) = seg {
                    tail.push(name);
                    continue;
                }
                return Err(PathError::InvalidBindingPath {
                    to: rel.to_owned(),
                    from: self.graph.block_path(from)?,
                }
                .into());
            }
            let Some(cur) = cursor else {
                return Err(PathError::EscapesRoot {
                    path: rel.to_owned(),
                }
                .into());
            };
            match seg {
                Segment::Here => {}
                Segment::Parent => cursor = self.graph.parent_block(cur)?,
                Segment::FlowRoot => cursor = Some(self.graph.enclosing_flow(cur)?),
                Segment::Scope(k) => cursor = Some(self.graph.scope_block(*k)),
                Segment::Name(name) => {
                    let next = self
                        .graph
                        .find_prop(cur, name)?
                        .and_then(|pid| self.graph.props.get(pid))
                        .and_then(|p| p.value().as_block())
                        .filter(|b| self.graph.blocks.contains(*b));
                    match next {
                        Some(b) => cursor = Some(b),
                        None => tail.push(name),
                    }
                }
            }
        }
        let Some(base) = cursor else {
            return Err(PathError::EscapesRoot {
                path: rel.to_owned(),
            }
            .into());
        };
        let mut out = self.graph.block_path(base)?;
        for name in tail {
            if !out.is_empty() {
                out.push('.');
            }
            out.push_str(name);
        }
        Ok(out)
    }

    // ── Structure ───────────────────────────────────────────────────

    /// Creates a plain block named `name` under the block at `parent`.
    /// No-op when the property already owns a block.
    pub fn create_block(&mut self, parent: &str, name: &str) -> Result<(), RuntimeError> {
        self.create_block_kind(parent, name, BlockKind::Plain)
    }

    /// Creates a flow named `name` under the block at `parent`.
    pub fn create_flow(&mut self, parent: &str, name: &str) -> Result<(), RuntimeError> {
        self.create_block_kind(parent, name, BlockKind::Flow(FlowState::new()))
    }

    fn create_block_kind(
        &mut self,
        parent: &str,
        name: &str,
        kind: BlockKind,
    ) -> Result<(), RuntimeError> {
        let parent_id = self.graph.block_at(parent)?;
        let prop = self.graph.ensure_prop(parent_id, name)?;
        self.check_writable(prop)?;
        {
            let p = self.graph.prop(prop)?;
            if let Some(existing) = p.value().as_block() {
                if self
                    .graph
                    .blocks
                    .get(existing)
                    .is_some_and(|b| b.owner == Some(prop))
                {
                    return Ok(());
                }
            }
        }
        if let Some(old) = self.graph.prop(prop)?.binding.clone() {
            binding::detach(&mut self.graph, old.node, prop);
            self.graph.prop_mut(prop)?.binding = None;
            self.notes.push_back(Note::Binding { prop });
        }
        let child = self.graph.create_block(prop, kind)?;
        self.graph.prop_mut(prop)?.persisted = None;
        self.write_prop(prop, Value::Block(child), WriteKind::Forward, false)?;
        self.note_child_added(parent_id, name)?;
        self.drain()
    }

    /// Destroys the block at `path` and everything it owns. Bindings that
    /// watched destroyed properties re-resolve; subscriptions on destroyed
    /// objects are dropped with notice.
    pub fn remove_block(&mut self, path: &str) -> Result<(), RuntimeError> {
        let block = self.graph.block_at(path)?;
        if self.is_structural(block) {
            return Err(RuntimeError::Permanent {
                path: path.to_owned(),
            });
        }
        let Some(owner_prop) = self.graph.block(block)?.owner else {
            return Err(RuntimeError::Permanent {
                path: path.to_owned(),
            });
        };
        self.check_writable(owner_prop)?;
        self.graph.prop_mut(owner_prop)?.persisted = None;
        // The write path handles the owned-child teardown.
        self.write_prop(owner_prop, Value::Null, WriteKind::Forward, false)?;
        self.drain()
    }

    /// Child block names under the block at `path`, in property order.
    pub fn children_of(&self, path: &str) -> Result<Vec<String>, RuntimeError> {
        let block = self.block_at(path)?;
        let b = self.graph.block(block)?;
        let mut out = Vec::new();
        for (name, pid) in &b.props {
            if let Some(child) = self.graph.prop(*pid)?.value().as_block() {
                if self
                    .graph
                    .blocks
                    .get(child)
                    .is_some_and(|c| c.owner == Some(*pid))
                {
                    out.push(name.clone());
                }
            }
        }
        Ok(out)
    }

    fn is_structural(&self, block: BlockId) -> bool {
        block == self.graph.root()
            || [ScopeKind::Global, ScopeKind::Shared, ScopeKind::Temp]
                .iter()
                .any(|k| self.graph.scope_block(*k) == block)
    }

    // ── Calls and enablement ────────────────────────────────────────

    /// Triggers the block at `path` with a fresh call token.
    pub fn call(&mut self, path: &str) -> Result<(), RuntimeError> {
        let token = self.mint_event();
        self.send_call(path, token)
    }

    /// Delivers a specific call token to the block at `path`. Freshness is
    /// judged when the block runs, not now.
    pub fn send_call(&mut self, path: &str, token: Event) -> Result<(), RuntimeError> {
        let block = self.block_at(path)?;
        let prop = self.graph.ensure_prop(block, CTRL_CALL)?;
        self.write_prop(prop, Value::Event(token), WriteKind::Transient, false)?;
        self.drain()
    }

    /// Mints a trigger token stamped with the current tick.
    pub fn mint_event(&mut self) -> Event {
        self.event_seq += 1;
        Event {
            tick: self.sched.tick(),
            seq: self.event_seq,
            error: None,
        }
    }

    /// Enables or disables the flow at `path`.
    pub fn set_enabled(&mut self, path: &str, on: bool) -> Result<(), RuntimeError> {
        let flow = self.flow_at(path)?;
        let prop = self.graph.ensure_prop(flow, CTRL_ENABLED)?;
        self.write_prop(prop, Value::Bool(on), WriteKind::Persist, false)?;
        self.drain()
    }

    /// True when the block at `path` and every flow above it are enabled.
    pub fn is_enabled(&self, path: &str) -> Result<bool, RuntimeError> {
        Ok(self.graph.effectively_enabled(self.block_at(path)?)?)
    }

    // ── Scheduling ──────────────────────────────────────────────────

    /// Runs one scheduler pass to completion and advances the tick.
    pub fn run_pass(&mut self) -> Result<Tick, RuntimeError> {
        self.drain()?;
        while let Some((block, band)) = self.sched.pop_next()? {
            self.run_block(block, band)?;
        }
        self.sched.pass_done();
        Ok(self.sched.tick())
    }

    /// Runs passes until no block is queued. Parked blocks do not keep the
    /// runtime busy; re-admit them with [`Self::poll_pending`].
    pub fn run_until_idle(&mut self) -> Result<Tick, RuntimeError> {
        self.drain()?;
        while !self.sched.is_idle() {
            self.run_pass()?;
        }
        Ok(self.sched.tick())
    }

    /// Re-admits every parked block to the queue. Their next run skips the
    /// call-token requirement, since the original trigger was already
    /// consumed.
    pub fn poll_pending(&mut self) {
        for (block, band) in self.sched.take_parked() {
            self.resuming.insert(block);
            self.sched.re_arm(block);
            self.sched.schedule(block, band);
        }
    }

    // ── Snapshots, loading, history ─────────────────────────────────

    /// Saves the own-authority state of the block at `path` (the root when
    /// empty).
    pub fn save_block(&self, path: &str) -> Result<SnapshotMap, RuntimeError> {
        Ok(snapshot::save_block(&self.graph, self.block_at(path)?)?)
    }

    /// Applies a JSON value at `path`: objects create (or replace) a child
    /// block, everything else is a persisted literal.
    pub fn set_json(&mut self, path: &str, json: &serde_json::Value) -> Result<(), RuntimeError> {
        match json {
            serde_json::Value::Object(map) => {
                let prop = self.ensure_prop_at(path)?;
                self.check_writable(prop)?;
                self.with_load(|rt| rt.load_into_prop(prop, map))
            }
            other => {
                let value = Value::from_json(other).ok_or_else(|| RuntimeError::BadSnapshot {
                    path: path.to_owned(),
                    reason: "unsupported JSON value".to_owned(),
                })?;
                self.set_value(path, value)
            }
        }
    }

    /// Diffs the block at `path` against `map` and applies the difference
    /// in place: removed keys are cleared, changed literals rewritten,
    /// children of unchanged type updated recursively, everything else
    /// replaced. Block identity survives wherever the shape allows, so
    /// bindings into the subtree keep working.
    pub fn live_update(&mut self, path: &str, map: &SnapshotMap) -> Result<(), RuntimeError> {
        let block = self.block_at(path)?;
        self.with_load(|rt| rt.live_update_block(block, map))
    }

    /// Records a checkpoint of the flow at `path` into its history.
    /// Returns false when the state is unchanged since the last checkpoint.
    pub fn checkpoint(&mut self, path: &str) -> Result<bool, RuntimeError> {
        let flow = self.flow_at(path)?;
        let map = snapshot::save_block(&self.graph, flow)?;
        let fs = self.flow_state_mut(flow, path)?;
        Ok(fs.history.record(map))
    }

    /// Steps the flow at `path` back one checkpoint. Returns false when
    /// there is nothing to undo.
    pub fn undo(&mut self, path: &str) -> Result<bool, RuntimeError> {
        let flow = self.flow_at(path)?;
        let map = self.flow_state_mut(flow, path)?.history.undo().cloned();
        match map {
            Some(m) => {
                self.with_load(|rt| rt.live_update_block(flow, &m))?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Steps the flow at `path` forward one checkpoint. Returns false when
    /// there is nothing to redo.
    pub fn redo(&mut self, path: &str) -> Result<bool, RuntimeError> {
        let flow = self.flow_at(path)?;
        let map = self.flow_state_mut(flow, path)?.history.redo().cloned();
        match map {
            Some(m) => {
                self.with_load(|rt| rt.live_update_block(flow, &m))?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Materializes a new flow named `name` under `parent` from the stored
    /// definition `definition`. A missing or unreadable definition degrades
    /// to an empty flow that still remembers where it came from.
    pub fn instantiate(
        &mut self,
        parent: &str,
        name: &str,
        definition: &str,
    ) -> Result<(), RuntimeError> {
        let loaded = match self.store.load(definition) {
            Ok(v) => v,
            Err(e) => {
                warn!(definition, error = %e, "definition failed to load; instantiating empty");
                None
            }
        };
        self.create_flow(parent, name)?;
        let flow_path = join_path(parent, name);
        let flow = self.graph.block_at(&flow_path)?;
        if let Some(fs) = self.graph.block_mut(flow)?.flow_state_mut() {
            fs.loaded_from = Some(definition.to_owned());
        }
        if let Some(map) = loaded {
            self.with_load(|rt| rt.load_block_inner(flow, &map))?;
        }
        info!(path = %flow_path, definition, "flow instantiated");
        Ok(())
    }

    /// Saves the flow at `path` to the store under `name`.
    pub fn save_flow(&mut self, path: &str, name: &str) -> Result<(), RuntimeError> {
        let flow = self.flow_at(path)?;
        let map = snapshot::save_block(&self.graph, flow)?;
        self.store.save(name, &map)?;
        info!(path, name, "flow definition saved");
        Ok(())
    }

    /// Deletes a stored flow definition. Missing definitions are fine.
    pub fn delete_definition(&mut self, name: &str) -> Result<(), RuntimeError> {
        Ok(self.store.delete(name)?)
    }

    /// Names of stored flow definitions, sorted.
    pub fn list_definitions(&self) -> Result<Vec<String>, RuntimeError> {
        Ok(self.store.list()?)
    }

    /// Store name the flow at `path` was instantiated from, if any.
    pub fn loaded_from(&self, path: &str) -> Result<Option<String>, RuntimeError> {
        let flow = self.flow_at(path)?;
        Ok(self
            .graph
            .block(flow)?
            .flow_state()
            .and_then(|fs| fs.loaded_from().map(str::to_owned)))
    }

    // ── Subscriptions ───────────────────────────────────────────────

    /// Watches the property at `path` for value and binding changes.
    pub fn subscribe(&mut self, path: &str) -> Result<SubId, RuntimeError> {
        let prop = self.ensure_prop_at(path)?;
        Ok(self.subs.add_prop(prop))
    }

    /// Watches the block at `path` for child additions and removals.
    pub fn watch_children(&mut self, path: &str) -> Result<SubId, RuntimeError> {
        let block = self.block_at(path)?;
        Ok(self.subs.add_children(block))
    }

    /// Cancels a subscription. Unknown ids are ignored.
    pub fn unsubscribe(&mut self, sub: SubId) {
        self.subs.remove(sub);
    }

    /// Takes every change recorded since the last drain, in order.
    pub fn drain_changes(&mut self) -> Vec<Change> {
        self.outbox.drain(..).collect()
    }

    // ── Write path ──────────────────────────────────────────────────

    /// The single mutation funnel. Returns whether a notification was
    /// queued.
    fn write_prop(
        &mut self,
        prop: PropId,
        value: Value,
        kind: WriteKind,
        forced: bool,
    ) -> Result<bool, RuntimeError> {
        let (notifying, changed, owned_child) = {
            let p = self.graph.prop(prop)?;
            let changed = p.value != value;
            let owned = p.value.as_block().filter(|b| {
                self.graph
                    .blocks
                    .get(*b)
                    .is_some_and(|c| c.owner == Some(prop))
            });
            (p.notifying, changed, if changed { owned } else { None })
        };
        if notifying {
            let path = self.graph.prop_path(prop)?;
            if kind == WriteKind::Forward {
                warn!(%path, "dropped forward into a property mid-notification");
                return Ok(false);
            }
            return Err(RuntimeError::ReentrantWrite { path });
        }
        let kind = if kind == WriteKind::Persist && matches!(value, Value::Event(_)) {
            // Tokens are per-pass; persisting one would replay a trigger.
            WriteKind::Transient
        } else {
            kind
        };
        if let Some(child) = owned_child {
            if self.is_structural(child) {
                return Err(RuntimeError::Permanent {
                    path: self.graph.block_path(child)?,
                });
            }
            self.destroy_owned_child(prop, child)?;
        }
        {
            let p = self.graph.prop_mut(prop)?;
            p.value = value;
            if kind == WriteKind::Persist {
                p.persisted = Some(p.value.clone());
            }
        }
        if changed || forced {
            self.notes.push_back(Note::Value { prop });
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn drain(&mut self) -> Result<(), RuntimeError> {
        if self.draining {
            return Ok(());
        }
        self.draining = true;
        self.cascade_syncs = 0;
        let out = self.drain_notes();
        self.draining = false;
        out
    }

    fn drain_notes(&mut self) -> Result<(), RuntimeError> {
        while let Some(note) = self.notes.pop_front() {
            match note {
                Note::Value { prop } => self.dispatch_value(prop)?,
                Note::Binding { prop } => self.dispatch_binding(prop)?,
            }
        }
        Ok(())
    }

    fn dispatch_value(&mut self, prop: PropId) -> Result<(), RuntimeError> {
        let Some(p) = self.graph.props.get(prop) else {
            return Ok(()); // destroyed while queued
        };
        debug_assert!(!p.notifying, "notes never target a mid-notification property");
        let name = p.name().to_owned();
        let owner = p.owner();
        let value = p.value().clone();
        let listeners = p.listeners.clone();
        self.graph.prop_mut(prop)?.notifying = true;
        let out = self.dispatch_value_inner(prop, owner, &name, &value, listeners);
        if let Ok(p) = self.graph.prop_mut(prop) {
            p.notifying = false;
        }
        out
    }

    fn dispatch_value_inner(
        &mut self,
        prop: PropId,
        owner: BlockId,
        name: &str,
        value: &Value,
        listeners: Vec<crate::ident::BindingId>,
    ) -> Result<(), RuntimeError> {
        trace!(%prop, name, kind = value.kind(), "value dispatch");
        for node in listeners {
            let forwards = binding::on_target_changed(&mut self.graph, node);
            self.apply_forwards(forwards)?;
        }
        if self.subs.has_prop_watch(prop) {
            let path = self.graph.prop_path(prop)?;
            self.outbox.push_back(Change::Value {
                path,
                value: value.clone(),
            });
        }
        self.interpret(owner, name, value)
    }

    fn dispatch_binding(&mut self, prop: PropId) -> Result<(), RuntimeError> {
        if !self.subs.has_prop_watch(prop) || !self.graph.props.contains(prop) {
            return Ok(());
        }
        let path = self.graph.prop_path(prop)?;
        let target = self.graph.prop(prop)?.binding_path().map(str::to_owned);
        self.outbox.push_back(Change::Binding { path, target });
        Ok(())
    }

    fn apply_forwards(&mut self, forwards: Vec<binding::Forward>) -> Result<(), RuntimeError> {
        for f in forwards {
            if !self.graph.props.contains(f.consumer) {
                continue;
            }
            self.write_prop(f.consumer, f.value, WriteKind::Forward, false)?;
        }
        Ok(())
    }

    // ── Change interpretation ───────────────────────────────────────

    fn interpret(&mut self, owner: BlockId, name: &str, value: &Value) -> Result<(), RuntimeError> {
        match classify(name) {
            PropKind::Attr | PropKind::Control(ControlKind::Emit | ControlKind::Output) => Ok(()),
            PropKind::Input => self.input_changed(owner, name, value),
            PropKind::Control(ControlKind::Type) => {
                if self.load_depth > 0 {
                    if !self.pending_attach.contains(&owner) {
                        self.pending_attach.push(owner);
                    }
                    Ok(())
                } else {
                    self.apply_type(owner)
                }
            }
            PropKind::Control(ControlKind::Call) => self.call_trigger(owner, value),
            PropKind::Control(ControlKind::Enabled) => self.enabled_changed(owner, value),
            PropKind::Control(_) => self.config_changed(owner, name, value),
        }
    }

    fn input_changed(
        &mut self,
        owner: BlockId,
        name: &str,
        value: &Value,
    ) -> Result<(), RuntimeError> {
        if !self.graph.blocks.contains(owner) || !self.graph.effectively_enabled(owner)? {
            return Ok(());
        }
        let Ok(b) = self.graph.block_mut(owner) else {
            return Ok(());
        };
        if b.unit.running {
            // A unit's writes to its own block never re-trigger it.
            return Ok(());
        }
        let Some(mut unit) = b.unit.instance.take() else {
            return Ok(());
        };
        let accept = unit.input_changed(name, value);
        if let Ok(b) = self.graph.block_mut(owner) {
            b.unit.instance = Some(unit);
        }
        if accept {
            self.sched.re_arm(owner);
            self.mode_schedule(owner)?;
        }
        Ok(())
    }

    fn config_changed(
        &mut self,
        owner: BlockId,
        name: &str,
        value: &Value,
    ) -> Result<(), RuntimeError> {
        if !self.graph.blocks.contains(owner) || !self.graph.effectively_enabled(owner)? {
            return Ok(());
        }
        let Ok(b) = self.graph.block_mut(owner) else {
            return Ok(());
        };
        if b.unit.running {
            return Ok(());
        }
        let Some(mut unit) = b.unit.instance.take() else {
            return Ok(());
        };
        let accept = unit.config_changed(name, value);
        if let Ok(b) = self.graph.block_mut(owner) {
            b.unit.instance = Some(unit);
        }
        if accept {
            self.sched.re_arm(owner);
            self.mode_schedule(owner)?;
        }
        Ok(())
    }

    fn call_trigger(&mut self, owner: BlockId, value: &Value) -> Result<(), RuntimeError> {
        if matches!(value, Value::Null) {
            return Ok(()); // token consumption, not a trigger
        }
        if !self.graph.blocks.contains(owner) || !self.graph.effectively_enabled(owner)? {
            return Ok(());
        }
        let (mode, band) = self.effective_mode_band(owner)?;
        self.sched.re_arm(owner);
        if mode == RunMode::Sync {
            self.run_sync(owner, band)
        } else {
            self.sched.schedule(owner, band);
            Ok(())
        }
    }

    fn enabled_changed(&mut self, owner: BlockId, value: &Value) -> Result<(), RuntimeError> {
        let on = value.is_truthy();
        let Ok(b) = self.graph.block_mut(owner) else {
            return Ok(());
        };
        match b.flow_state_mut() {
            Some(fs) => {
                if fs.enabled == on {
                    return Ok(());
                }
                fs.enabled = on;
                debug!(flow = %owner, enabled = on, "flow enablement changed");
                if on {
                    self.wake_subtree(owner)?;
                }
                Ok(())
            }
            // On a plain block `#enabled` is an ordinary config control.
            None => self.config_changed(owner, CTRL_ENABLED, value),
        }
    }

    /// Catch-up after re-enabling a flow: change-driven units below it get
    /// one run so state settles to what the inputs now say.
    fn wake_subtree(&mut self, flow: BlockId) -> Result<(), RuntimeError> {
        let mut stack = vec![flow];
        while let Some(block) = stack.pop() {
            if !self.graph.effectively_enabled(block)? {
                continue; // nested disabled flows stay dark
            }
            let has_unit = self.graph.block(block)?.unit.instance.is_some();
            if has_unit {
                let (mode, band) = self.effective_mode_band(block)?;
                if mode == RunMode::Change {
                    self.sched.re_arm(block);
                    self.sched.schedule(block, band);
                }
            }
            stack.extend(self.graph.child_blocks(block)?);
        }
        Ok(())
    }

    // ── Unit lifecycle ──────────────────────────────────────────────

    fn apply_type(&mut self, block: BlockId) -> Result<(), RuntimeError> {
        if !self.graph.blocks.contains(block) {
            return Ok(());
        }
        if self.graph.block(block)?.unit.running {
            // The instance is out of its slot; re-attach when the run ends.
            if !self.pending_attach.contains(&block) {
                self.pending_attach.push(block);
            }
            return Ok(());
        }
        let type_name = self
            .graph
            .block(block)?
            .prop_id(CTRL_TYPE)
            .and_then(|pid| self.graph.props.get(pid))
            .and_then(|p| p.value().as_str().map(str::to_owned));
        {
            // Attach is idempotent per registry revision: the load path can
            // report one type twice (pending flush, then the queued note).
            let b = self.graph.block(block)?;
            if b.unit.type_name == type_name
                && b.unit.instance.is_some()
                && b.unit.revision == self.registry.revision()
            {
                return Ok(());
            }
        }
        let old = {
            let b = self.graph.block_mut(block)?;
            let old = b.unit.instance.take();
            b.unit.type_name.clone_from(&type_name);
            old
        };
        if let Some(mut unit) = old {
            unit.cleanup();
        }
        let desc = type_name
            .as_deref()
            .and_then(|n| self.registry.lookup(n))
            .copied();
        if let Some(d) = desc {
            let rev = self.registry.revision();
            let b = self.graph.block_mut(block)?;
            b.unit.instance = Some((d.ctor)());
            b.unit.revision = rev;
            debug!(block = %block, unit = d.name, "unit attached");
            self.attach_schedule(block)
        } else {
            if let Some(n) = type_name {
                warn!(block = %block, unit = %n, "unknown unit type; block left inert");
            }
            Ok(())
        }
    }

    /// First scheduling decision after attach. Change-driven units get one
    /// run so their outputs reflect inputs that existed before the unit
    /// did; load-driven units get their single run here.
    fn attach_schedule(&mut self, block: BlockId) -> Result<(), RuntimeError> {
        if !self.graph.effectively_enabled(block)? {
            return Ok(());
        }
        let (mode, band) = self.effective_mode_band(block)?;
        self.sched.re_arm(block);
        match mode {
            RunMode::Load | RunMode::Change => {
                self.sched.schedule(block, band);
                Ok(())
            }
            RunMode::Sync => self.run_sync(block, band),
            RunMode::Call => Ok(()),
        }
    }

    fn mode_schedule(&mut self, block: BlockId) -> Result<(), RuntimeError> {
        let (mode, band) = self.effective_mode_band(block)?;
        match mode {
            RunMode::Change => {
                self.sched.schedule(block, band);
                Ok(())
            }
            RunMode::Sync => self.run_sync(block, band),
            // Load runs only at attach; Call waits for its trigger.
            RunMode::Load | RunMode::Call => Ok(()),
        }
    }

    fn effective_mode_band(&self, block: BlockId) -> Result<(RunMode, Band), RuntimeError> {
        let b = self.graph.block(block)?;
        let desc = b
            .unit
            .type_name
            .as_deref()
            .and_then(|n| self.registry.lookup(n));
        let mut mode = desc.map_or_else(RunMode::default, |d| d.mode);
        let mut band = desc.map_or_else(Band::default, |d| d.band);
        if let Some(pid) = b.prop_id(CTRL_MODE) {
            if let Some(m) = RunMode::parse(self.graph.prop(pid)?.value()) {
                mode = m;
            }
        }
        if let Some(pid) = b.prop_id(CTRL_PRIORITY) {
            if let Some(i) = self.graph.prop(pid)?.value().as_int() {
                band = Band::from_priority(i);
            }
        }
        Ok((mode, band))
    }

    fn run_sync(&mut self, block: BlockId, band: Band) -> Result<(), RuntimeError> {
        if self.sync_depth >= SYNC_DEPTH_LIMIT || self.cascade_syncs >= SYNC_DEPTH_LIMIT {
            return Err(SchedError::SyncDepthExceeded {
                limit: SYNC_DEPTH_LIMIT,
            }
            .into());
        }
        self.sync_depth += 1;
        self.cascade_syncs = self.cascade_syncs.saturating_add(1);
        let out = self.run_block(block, band);
        self.sync_depth -= 1;
        out
    }

    fn run_block(&mut self, block: BlockId, band: Band) -> Result<(), RuntimeError> {
        if !self.graph.blocks.contains(block)
            || !self.graph.effectively_enabled(block)?
            || self.sched.ran_this_pass(block)
        {
            return Ok(());
        }
        let resumed = self.resuming.remove(&block);
        let (mode, _) = self.effective_mode_band(block)?;

        // Call-token prelude: consume, judge freshness at consumption, and
        // short-circuit error payloads.
        let mut call: Option<Event> = None;
        if let Some(cp) = self.graph.block(block)?.prop_id(CTRL_CALL) {
            let held = self.graph.prop(cp)?.value().clone();
            match held {
                Value::Event(e) => {
                    // Consumption is silent; it is not a value change.
                    self.graph.prop_mut(cp)?.value = Value::Null;
                    if !e.is_fresh(self.sched.tick()) {
                        debug!(block = %block, token = e.seq, "stale call token ignored");
                    } else if e.is_error() {
                        let forwards = self
                            .graph
                            .block(block)?
                            .unit
                            .instance
                            .as_ref()
                            .is_none_or(|u| u.forwards_errors());
                        if forwards {
                            self.forward_error(block, &e)?;
                        }
                        self.sched.note_ran(block);
                        return Ok(());
                    } else {
                        call = Some(e);
                    }
                }
                Value::Null => {}
                // A non-token trigger value is data; treat it as fresh.
                _ => call = Some(self.mint_event()),
            }
        }
        if mode == RunMode::Call && call.is_none() && !resumed {
            return Ok(());
        }

        let Some(mut unit) = self.graph.block_mut(block)?.unit.instance.take() else {
            return Ok(());
        };
        self.graph.block_mut(block)?.unit.running = true;
        let outcome = {
            let mut ctx = RunCtx {
                rt: self,
                block,
                call,
            };
            catch_unwind(AssertUnwindSafe(|| unit.run(&mut ctx)))
        };
        if let Ok(b) = self.graph.block_mut(block) {
            b.unit.instance = Some(unit);
            b.unit.running = false;
        } else {
            // The run destroyed its own block.
            unit.destroy();
        }
        match outcome {
            Ok(RunOutcome::Done) => self.sched.note_ran(block),
            Ok(RunOutcome::Pending) => {
                self.sched.note_ran(block);
                self.sched.park(block, band);
            }
            Err(payload) => {
                // The pass continues with no emission from this block.
                let message = panic_message(payload.as_ref());
                error!(block = %block, %message, "unit run panicked");
                self.sched.note_ran(block);
            }
        }
        // A type change requested by the unit itself lands now, not while
        // the instance was out of its slot.
        if let Some(pos) = self.pending_attach.iter().position(|b| *b == block) {
            self.pending_attach.remove(pos);
            self.apply_type(block)?;
        }
        self.drain()
    }

    fn forward_error(&mut self, block: BlockId, source: &Event) -> Result<(), RuntimeError> {
        self.event_seq += 1;
        let token = source.forwarded(self.sched.tick(), self.event_seq);
        let emit = self.graph.ensure_prop(block, CTRL_EMIT)?;
        self.write_prop(emit, Value::Event(token), WriteKind::Transient, false)?;
        Ok(())
    }

    fn raise_error(&mut self, block: BlockId, message: String) -> Result<(), RuntimeError> {
        let origin = self.graph.block_path(block)?;
        self.event_seq += 1;
        let token = Event {
            tick: self.sched.tick(),
            seq: self.event_seq,
            error: Some(EventError { message, origin }),
        };
        let emit = self.graph.ensure_prop(block, CTRL_EMIT)?;
        self.write_prop(emit, Value::Event(token), WriteKind::Transient, false)?;
        Ok(())
    }

    // ── Teardown ────────────────────────────────────────────────────

    fn destroy_owned_child(&mut self, prop: PropId, child: BlockId) -> Result<(), RuntimeError> {
        let (parent, name) = {
            let p = self.graph.prop(prop)?;
            (p.owner(), p.name().to_owned())
        };
        self.destroy_subtree(child)?;
        if self.subs.has_children_watch(parent) {
            let path = self.graph.block_path(parent)?;
            self.outbox.push_back(Change::ChildRemoved { parent: path, name });
        }
        Ok(())
    }

    fn destroy_subtree(&mut self, block: BlockId) -> Result<(), RuntimeError> {
        let report = self.graph.destroy_block(block)?;
        for (id, mut unit) in report.units {
            trace!(block = %id, "unit destroyed with its block");
            unit.destroy();
        }
        // Surviving chains that watched a removed property re-resolve; the
        // lazy walk recreates the path if it becomes reachable again.
        for node in report.orphaned_watchers {
            let forwards = binding::re_resolve_collect(&mut self.graph, node);
            self.apply_forwards(forwards)?;
        }
        for (pid, path) in report.removed_props {
            for sub in self.subs.drop_prop(pid) {
                self.outbox.push_back(Change::Dropped {
                    sub,
                    path: path.clone(),
                });
            }
        }
        for (bid, path) in &report.removed_blocks {
            for sub in self.subs.drop_children(*bid) {
                self.outbox.push_back(Change::Dropped {
                    sub,
                    path: path.clone(),
                });
            }
            self.sched.forget(*bid);
            self.resuming.remove(bid);
            self.pending_attach.retain(|b| b != bid);
        }
        for (parent, parent_path, name) in report.removed_children {
            if self.graph.blocks.contains(parent) && self.subs.has_children_watch(parent) {
                self.outbox.push_back(Change::ChildRemoved {
                    parent: parent_path,
                    name,
                });
            }
        }
        Ok(())
    }

    // ── Loading ─────────────────────────────────────────────────────

    fn with_load<F>(&mut self, f: F) -> Result<(), RuntimeError>
    where
        F: FnOnce(&mut Self) -> Result<(), RuntimeError>,
    {
        self.load_depth += 1;
        let out = f(self);
        self.load_depth -= 1;
        out?;
        if self.load_depth == 0 {
            self.flush_pending_types()?;
            self.drain()?;
        }
        Ok(())
    }

    fn flush_pending_types(&mut self) -> Result<(), RuntimeError> {
        loop {
            let pending = mem::take(&mut self.pending_attach);
            if pending.is_empty() {
                return Ok(());
            }
            for block in pending {
                if self.graph.blocks.contains(block) {
                    self.apply_type(block)?;
                }
            }
        }
    }

    /// Creates a fresh child block for `prop` from a snapshot object,
    /// replacing whatever the property held.
    fn load_into_prop(&mut self, prop: PropId, map: &SnapshotMap) -> Result<(), RuntimeError> {
        if let Some(old) = self.graph.prop(prop)?.binding.clone() {
            binding::detach(&mut self.graph, old.node, prop);
            self.graph.prop_mut(prop)?.binding = None;
            self.notes.push_back(Note::Binding { prop });
        }
        let is_flow = map
            .get(snapshot::FLOW_MARKER)
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false);
        let kind = if is_flow {
            BlockKind::Flow(FlowState::new())
        } else {
            BlockKind::Plain
        };
        let parent = self.graph.prop(prop)?.owner();
        let name = self.graph.prop(prop)?.name().to_owned();
        let child = self.graph.create_block(prop, kind)?;
        self.graph.prop_mut(prop)?.persisted = None;
        // The write destroys any previously owned block.
        self.write_prop(prop, Value::Block(child), WriteKind::Forward, false)?;
        self.note_child_added(parent, &name)?;
        self.load_block_inner(child, map)
    }

    fn load_block_inner(&mut self, block: BlockId, map: &SnapshotMap) -> Result<(), RuntimeError> {
        for (key, json) in map {
            if key == snapshot::FLOW_MARKER {
                continue;
            }
            match snapshot::parse_key(key) {
                EntryKind::Binding(name) => {
                    let Some(target) = json.as_str() else {
                        warn!(key, "binding entry must be a string path; skipped");
                        continue;
                    };
                    let prop = self.graph.ensure_prop(block, name)?;
                    self.bind_prop(prop, target)?;
                }
                EntryKind::Plain(name) => match json {
                    serde_json::Value::Object(child_map) => {
                        let prop = self.graph.ensure_prop(block, name)?;
                        self.load_into_prop(prop, child_map)?;
                    }
                    other => {
                        let Some(value) = Value::from_json(other) else {
                            continue;
                        };
                        let prop = self.graph.ensure_prop(block, name)?;
                        self.write_prop(prop, value, WriteKind::Persist, false)?;
                    }
                },
            }
        }
        Ok(())
    }

    fn live_update_block(&mut self, block: BlockId, map: &SnapshotMap) -> Result<(), RuntimeError> {
        let current = snapshot::save_block(&self.graph, block)?;
        // Removals first so renames don't transiently collide.
        for key in current.keys() {
            if map.contains_key(key) || key == snapshot::FLOW_MARKER {
                continue;
            }
            match snapshot::parse_key(key) {
                EntryKind::Binding(name) => {
                    if let Some(pid) = self.graph.block(block)?.prop_id(name) {
                        self.unbind_prop(pid)?;
                    }
                }
                EntryKind::Plain(name) => {
                    if let Some(pid) = self.graph.block(block)?.prop_id(name) {
                        self.graph.prop_mut(pid)?.persisted = None;
                        self.write_prop(pid, Value::Null, WriteKind::Forward, false)?;
                    }
                }
            }
        }
        for (key, json) in map {
            if key == snapshot::FLOW_MARKER {
                continue;
            }
            match snapshot::parse_key(key) {
                EntryKind::Binding(name) => {
                    let Some(target) = json.as_str() else {
                        continue;
                    };
                    let prop = self.graph.ensure_prop(block, name)?;
                    if self.graph.prop(prop)?.binding_path() != Some(target) {
                        self.bind_prop(prop, target)?;
                    }
                }
                EntryKind::Plain(name) => match json {
                    serde_json::Value::Object(child_map) => {
                        let prop = self.graph.ensure_prop(block, name)?;
                        let existing = self.graph.prop(prop)?.value().as_block().filter(|b| {
                            self.graph
                                .blocks
                                .get(*b)
                                .is_some_and(|c| c.owner == Some(prop))
                        });
                        match existing {
                            Some(child) if self.same_shape(child, child_map) => {
                                self.live_update_block(child, child_map)?;
                            }
                            _ => self.load_into_prop(prop, child_map)?,
                        }
                    }
                    other => {
                        if current.get(key) == Some(other) {
                            continue;
                        }
                        let Some(value) = Value::from_json(other) else {
                            continue;
                        };
                        let prop = self.graph.ensure_prop(block, name)?;
                        self.write_prop(prop, value, WriteKind::Persist, false)?;
                    }
                },
            }
        }
        Ok(())
    }

    /// Whether a live child block can absorb a snapshot in place: same
    /// flowness and same unit type.
    fn same_shape(&self, child: BlockId, map: &SnapshotMap) -> bool {
        let Ok(b) = self.graph.block(child) else {
            return false;
        };
        let want_flow = map
            .get(snapshot::FLOW_MARKER)
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false);
        if b.is_flow() != want_flow {
            return false;
        }
        let want_type = map.get(CTRL_TYPE).and_then(serde_json::Value::as_str);
        b.unit_type() == want_type
    }

    // ── Helpers ─────────────────────────────────────────────────────

    fn block_at(&self, path: &str) -> Result<BlockId, RuntimeError> {
        if path.is_empty() {
            return Ok(self.graph.root());
        }
        Ok(self.graph.block_at(path)?)
    }

    fn flow_at(&self, path: &str) -> Result<BlockId, RuntimeError> {
        let block = self.block_at(path)?;
        if self.graph.block(block)?.is_flow() {
            Ok(block)
        } else {
            Err(RuntimeError::NotAFlow {
                path: path.to_owned(),
            })
        }
    }

    fn flow_state_mut(
        &mut self,
        flow: BlockId,
        path: &str,
    ) -> Result<&mut FlowState, RuntimeError> {
        self.graph
            .block_mut(flow)?
            .flow_state_mut()
            .ok_or_else(|| RuntimeError::NotAFlow {
                path: path.to_owned(),
            })
    }

    fn ensure_prop_at(&mut self, abs: &str) -> Result<PropId, RuntimeError> {
        let mut segs: Vec<&str> = path::segments(abs).collect();
        let Some(last) = segs.pop() else {
            return Err(PathError::Empty.into());
        };
        let block_path = segs.join(".");
        let block = self.block_at(&block_path)?;
        Ok(self.graph.ensure_prop(block, last)?)
    }

    fn check_writable(&self, prop: PropId) -> Result<(), RuntimeError> {
        let owner = self.graph.prop(prop)?.owner();
        if self.graph.scope_containing(owner)? == Some(ScopeKind::Global) {
            return Err(RuntimeError::ReadOnlyScope {
                scope: path::SCOPE_GLOBAL.to_owned(),
            });
        }
        Ok(())
    }

    fn note_child_added(&mut self, parent: BlockId, name: &str) -> Result<(), RuntimeError> {
        if self.subs.has_children_watch(parent) {
            let path = self.graph.block_path(parent)?;
            self.outbox.push_back(Change::ChildAdded {
                parent: path,
                name: name.to_owned(),
            });
        }
        Ok(())
    }

    /// Structural walk from `from` to the property named by the final
    /// segment, creating only that property. Interior segments must
    /// resolve through existing blocks.
    fn reach_prop(&mut self, from: BlockId, rel: &str) -> Result<PropId, RuntimeError> {
        let segments = binding::parse_segments(rel)?;
        let mut cursor = from;
        let last = segments.len() - 1;
        for (i, seg) in segments.iter().enumerate() {
            if i == last {
                return match seg {
                    Segment::Name(name) => Ok(self.graph.ensure_prop(cursor, name)?),
                    _ => Err(GraphError::NoSuchProperty {
                        path: rel.to_owned(),
                    }
                    .into()),
                };
            }
            match seg {
                Segment::Here => {}
                Segment::Parent => {
                    cursor = self.graph.parent_block(cursor)?.ok_or_else(|| {
                        PathError::EscapesRoot {
                            path: rel.to_owned(),
                        }
                    })?;
                }
                Segment::FlowRoot => cursor = self.graph.enclosing_flow(cursor)?,
                Segment::Scope(k) => cursor = self.graph.scope_block(*k),
                Segment::Name(name) => {
                    cursor = self
                        .graph
                        .find_prop(cursor, name)?
                        .and_then(|pid| self.graph.props.get(pid))
                        .and_then(|p| p.value().as_block())
                        .filter(|b| self.graph.blocks.contains(*b))
                        .ok_or_else(|| GraphError::NoSuchBlock {
                            path: rel.to_owned(),
                        })?;
                }
            }
        }
        Err(GraphError::NoSuchProperty {
            path: rel.to_owned(),
        }
        .into())
    }

    /// Read-only version of [`Self::reach_prop`]: anything missing along
    /// the way reads as `Null`.
    fn peek_value(&self, from: BlockId, rel: &str) -> Value {
        let Ok(segments) = binding::parse_segments(rel) else {
            return Value::Null;
        };
        let mut cursor = from;
        let last = segments.len() - 1;
        for (i, seg) in segments.iter().enumerate() {
            if i == last {
                if let Segment::Name(name) = seg {
                    return self
                        .graph
                        .find_prop(cursor, name)
                        .ok()
                        .flatten()
                        .and_then(|pid| self.graph.props.get(pid))
                        .map_or(Value::Null, |p| p.value().clone());
                }
                return Value::Null;
            }
            let next = match seg {
                Segment::Here => Some(cursor),
                Segment::Parent => self.graph.parent_block(cursor).ok().flatten(),
                Segment::FlowRoot => self.graph.enclosing_flow(cursor).ok(),
                Segment::Scope(k) => Some(self.graph.scope_block(*k)),
                Segment::Name(name) => self
                    .graph
                    .find_prop(cursor, name)
                    .ok()
                    .flatten()
                    .and_then(|pid| self.graph.props.get(pid))
                    .and_then(|p| p.value().as_block())
                    .filter(|b| self.graph.blocks.contains(*b)),
            };
            match next {
                Some(b) => cursor = b,
                None => return Value::Null,
            }
        }
        Value::Null
    }
}

fn join_path(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_owned()
    } else {
        format!("{parent}.{name}")
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload.downcast_ref::<&str>().map_or_else(
        || {
            payload
                .downcast_ref::<String>()
                .cloned()
                .unwrap_or_else(|| "non-string panic payload".to_owned())
        },
        |s| (*s).to_owned(),
    )
}

/// What a unit sees while running: its block's properties, the consumed
/// call token, and the injected clock.
pub struct RunCtx<'rt> {
    rt: &'rt mut Runtime,
    block: BlockId,
    call: Option<Event>,
}

impl RunCtx<'_> {
    /// Value of the named property on this block (`Null` when absent).
    #[must_use]
    pub fn get(&self, name: &str) -> Value {
        self.rt
            .graph
            .block(self.block)
            .ok()
            .and_then(|b| b.prop_id(name))
            .and_then(|pid| self.rt.graph.props.get(pid))
            .map_or(Value::Null, |p| p.value().clone())
    }

    /// Writes a transient value to the named property on this block.
    pub fn set(&mut self, name: &str, value: Value) -> Result<(), RuntimeError> {
        let prop = self.rt.graph.ensure_prop(self.block, name)?;
        self.rt.write_prop(prop, value, WriteKind::Transient, false)?;
        self.rt.drain()
    }

    /// Writes the unit's result to `#output`.
    pub fn output(&mut self, value: Value) -> Result<(), RuntimeError> {
        self.set(CTRL_OUTPUT, value)
    }

    /// Emits a fresh trigger token on `#emit`.
    pub fn emit(&mut self) -> Result<(), RuntimeError> {
        let token = self.rt.mint_event();
        let prop = self.rt.graph.ensure_prop(self.block, CTRL_EMIT)?;
        self.rt
            .write_prop(prop, Value::Event(token), WriteKind::Transient, false)?;
        self.rt.drain()
    }

    /// Emits an error token on `#emit`; downstream call chains observe the
    /// failure without running.
    pub fn emit_error(&mut self, message: impl Into<String>) -> Result<(), RuntimeError> {
        self.rt.raise_error(self.block, message.into())?;
        self.rt.drain()
    }

    /// Takes the call token that triggered this run, if any.
    pub fn take_call(&mut self) -> Option<Event> {
        self.call.take()
    }

    /// Value of the numbered input `index`.
    #[must_use]
    pub fn numbered(&self, index: usize) -> Value {
        self.get(&index.to_string())
    }

    /// Number of numbered inputs: the `#length` control when set, else one
    /// past the highest numbered property present.
    #[must_use]
    pub fn input_len(&self) -> usize {
        if let Some(n) = self.get(CTRL_LENGTH).as_int() {
            return usize::try_from(n).unwrap_or(0);
        }
        self.rt.graph.block(self.block).map_or(0, |b| {
            b.prop_names()
                .filter_map(|n| n.parse::<usize>().ok())
                .map(|i| i + 1)
                .max()
                .unwrap_or(0)
        })
    }

    /// Plain input names on this block, in property order.
    #[must_use]
    pub fn field_names(&self) -> Vec<String> {
        self.rt.graph.block(self.block).map_or_else(
            |_| Vec::new(),
            |b| {
                b.prop_names()
                    .filter(|n| matches!(classify(n), PropKind::Input))
                    .map(str::to_owned)
                    .collect()
            },
        )
    }

    /// Reads through a relative path; anything missing reads as `Null`.
    #[must_use]
    pub fn get_path(&self, rel: &str) -> Value {
        self.rt.peek_value(self.block, rel)
    }

    /// Writes a transient value through a relative path. Interior segments
    /// must resolve; the final property is created if missing.
    pub fn set_path(&mut self, rel: &str, value: Value) -> Result<(), RuntimeError> {
        let prop = self.rt.reach_prop(self.block, rel)?;
        self.rt.write_prop(prop, value, WriteKind::Transient, false)?;
        self.rt.drain()
    }

    /// Milliseconds on the runtime's clock.
    #[must_use]
    pub fn now_ms(&self) -> u64 {
        self.rt.clock.now_ms()
    }

    /// Current scheduler tick.
    #[must_use]
    pub fn tick(&self) -> Tick {
        self.rt.sched.tick()
    }

    /// Absolute path of the running block.
    #[must_use]
    pub fn block_path(&self) -> String {
        self.rt.graph.block_path(self.block).unwrap_or_default()
    }
}
