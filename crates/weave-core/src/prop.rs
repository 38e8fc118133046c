// SPDX-License-Identifier: Apache-2.0
//! Properties: the atomic observable cells of the graph.
//!
//! A property's role is encoded in its name. Plain names are unit I/O and
//! feed `input_changed`; `#`-prefixed names are controls interpreted by the
//! runtime itself; `@`-prefixed names are inert editor metadata.
//!
//! A property holds up to three layers of state whose authority is strictly
//! ordered: a binding (if present, the live value mirrors the binding
//! target), else the persisted own value, else whatever transient value was
//! last written. Persisted value and binding are mutually exclusive as the
//! saved authority.

use crate::ident::{BindingId, BlockId};
use crate::value::Value;

/// `#type` control: unit type selector.
pub const CTRL_TYPE: &str = "#type";
/// `#mode` control: overrides the unit's default run mode.
pub const CTRL_MODE: &str = "#mode";
/// `#call` control: trigger input consuming event tokens.
pub const CTRL_CALL: &str = "#call";
/// `#emit` control: trigger output minting event tokens.
pub const CTRL_EMIT: &str = "#emit";
/// `#output` control: the unit's primary data output.
pub const CTRL_OUTPUT: &str = "#output";
/// `#priority` control: overrides the unit's scheduler band.
pub const CTRL_PRIORITY: &str = "#priority";
/// `#length` control: declared count of numbered inputs.
pub const CTRL_LENGTH: &str = "#length";
/// `#enabled` control: flow enable flag.
pub const CTRL_ENABLED: &str = "#enabled";

/// Role of a property, derived from its name prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropKind {
    /// Plain unit input/state, fed to `input_changed`.
    Input,
    /// `#`-prefixed control interpreted by the runtime.
    Control(ControlKind),
    /// `@`-prefixed inert metadata.
    Attr,
}

/// The controls the runtime interprets. Unknown `#` names are configuration
/// for the unit and reach `config_changed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlKind {
    /// `#type`
    Type,
    /// `#mode`
    Mode,
    /// `#call`
    Call,
    /// `#emit`
    Emit,
    /// `#output`
    Output,
    /// `#priority`
    Priority,
    /// `#length`
    Length,
    /// `#enabled`
    Enabled,
    /// Any other `#` name.
    Other,
}

/// Classifies a property name into its role.
#[must_use]
pub fn classify(name: &str) -> PropKind {
    if name.starts_with('@') {
        return PropKind::Attr;
    }
    if !name.starts_with('#') {
        return PropKind::Input;
    }
    PropKind::Control(match name {
        CTRL_TYPE => ControlKind::Type,
        CTRL_MODE => ControlKind::Mode,
        CTRL_CALL => ControlKind::Call,
        CTRL_EMIT => ControlKind::Emit,
        CTRL_OUTPUT => ControlKind::Output,
        CTRL_PRIORITY => ControlKind::Priority,
        CTRL_LENGTH => ControlKind::Length,
        CTRL_ENABLED => ControlKind::Enabled,
        _ => ControlKind::Other,
    })
}

/// Reference from a bound property to the terminal node of its chain.
#[derive(Debug, Clone)]
pub(crate) struct BindingRef {
    /// Path string as the caller wrote it.
    pub(crate) path: String,
    /// Terminal chain node feeding this property.
    pub(crate) node: BindingId,
}

/// One observable cell.
#[derive(Debug)]
pub struct Property {
    pub(crate) name: String,
    pub(crate) owner: BlockId,
    pub(crate) value: Value,
    pub(crate) persisted: Option<Value>,
    pub(crate) binding: Option<BindingRef>,
    /// Binding-chain nodes watching this property. Snapshotted before
    /// dispatch, so listeners may detach or attach during fan-out.
    pub(crate) listeners: Vec<BindingId>,
    /// Set while this property's own fan-out is being serviced; writes
    /// arriving in that window are re-entrant and rejected.
    pub(crate) notifying: bool,
}

impl Property {
    pub(crate) fn new(name: String, owner: BlockId) -> Self {
        Self {
            name,
            owner,
            value: Value::Null,
            persisted: None,
            binding: None,
            listeners: Vec::new(),
            notifying: false,
        }
    }

    /// Property name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Owning block.
    #[must_use]
    pub fn owner(&self) -> BlockId {
        self.owner
    }

    /// Current live value.
    #[must_use]
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Persisted own value, if any.
    #[must_use]
    pub fn persisted(&self) -> Option<&Value> {
        self.persisted.as_ref()
    }

    /// Binding path, if the property is bound.
    #[must_use]
    pub fn binding_path(&self) -> Option<&str> {
        self.binding.as_ref().map(|b| b.path.as_str())
    }

    /// Role derived from the name.
    #[must_use]
    pub fn kind(&self) -> PropKind {
        classify(&self.name)
    }

    pub(crate) fn add_listener(&mut self, node: BindingId) {
        if !self.listeners.contains(&node) {
            self.listeners.push(node);
        }
    }

    pub(crate) fn remove_listener(&mut self, node: BindingId) {
        self.listeners.retain(|l| *l != node);
    }
}
