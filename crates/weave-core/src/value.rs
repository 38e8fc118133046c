// SPDX-License-Identifier: Apache-2.0
//! Runtime value type held by properties.
//!
//! `Value` is the in-graph representation; `serde_json::Value` appears only
//! at the snapshot boundary. Two variants never cross that boundary:
//! [`Value::Block`] (serialized as a nested snapshot map by the snapshot
//! module) and [`Value::Event`] (transient by definition, dropped on save).

use crate::event::Event;
use crate::ident::BlockId;

/// Value held by a property.
#[derive(Clone, PartialEq, Debug, Default)]
pub enum Value {
    /// Absent / cleared.
    #[default]
    Null,
    /// Boolean.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Double-precision float.
    Float(f64),
    /// UTF-8 string.
    Str(String),
    /// Ordered list of values.
    List(Vec<Value>),
    /// A child block owned by the property holding this value.
    Block(BlockId),
    /// A trigger token.
    Event(Event),
}

impl Value {
    /// Numeric view: `Int` and `Float` coerce to `f64`, `Bool` to 0/1,
    /// everything else to `None`.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => {
                // Lossy above 2^53, which numeric block inputs never reach.
                #[allow(clippy::cast_precision_loss)]
                Some(*i as f64)
            }
            Self::Float(f) => Some(*f),
            Self::Bool(b) => Some(f64::from(u8::from(*b))),
            _ => None,
        }
    }

    /// Integer view of `Int` values.
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// String view of `Str` values.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// List view of `List` values.
    #[must_use]
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    /// Child block id, when this value holds one.
    #[must_use]
    pub fn as_block(&self) -> Option<BlockId> {
        match self {
            Self::Block(id) => Some(*id),
            _ => None,
        }
    }

    /// Event token, when this value holds one.
    #[must_use]
    pub fn as_event(&self) -> Option<&Event> {
        match self {
            Self::Event(e) => Some(e),
            _ => None,
        }
    }

    /// Truthiness used by `#enabled` and gate-style controls: `Null`,
    /// `false`, `0`, `0.0`, and `""` are false; everything else is true.
    #[must_use]
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Null => false,
            Self::Bool(b) => *b,
            Self::Int(i) => *i != 0,
            Self::Float(f) => *f != 0.0,
            Self::Str(s) => !s.is_empty(),
            Self::List(_) | Self::Block(_) | Self::Event(_) => true,
        }
    }

    /// Identity comparison used by binding re-resolution: block values
    /// compare by id (replacement changes identity even if contents match),
    /// all other variants compare structurally.
    #[must_use]
    pub fn same_identity(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Block(a), Self::Block(b)) => a == b,
            (a, b) => a == b,
        }
    }

    /// Variant name for diagnostics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "str",
            Self::List(_) => "list",
            Self::Block(_) => "block",
            Self::Event(_) => "event",
        }
    }

    /// Converts a JSON literal into a runtime value.
    ///
    /// Objects are not literals (they describe child blocks and are handled
    /// by the snapshot loader); passing one yields `None`.
    #[must_use]
    pub fn from_json(json: &serde_json::Value) -> Option<Self> {
        match json {
            serde_json::Value::Null => Some(Self::Null),
            serde_json::Value::Bool(b) => Some(Self::Bool(*b)),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Some(Self::Int(i))
                } else {
                    n.as_f64().map(Self::Float)
                }
            }
            serde_json::Value::String(s) => Some(Self::Str(s.clone())),
            serde_json::Value::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(Self::from_json(item)?);
                }
                Some(Self::List(out))
            }
            serde_json::Value::Object(_) => None,
        }
    }

    /// Converts a runtime literal into JSON.
    ///
    /// `Block` and `Event` values are not literals; they yield `None` and
    /// are handled (or skipped) by the snapshot writer.
    #[must_use]
    pub fn to_json(&self) -> Option<serde_json::Value> {
        match self {
            Self::Null => Some(serde_json::Value::Null),
            Self::Bool(b) => Some(serde_json::Value::Bool(*b)),
            Self::Int(i) => Some(serde_json::Value::from(*i)),
            Self::Float(f) => serde_json::Number::from_f64(*f).map(serde_json::Value::Number),
            Self::Str(s) => Some(serde_json::Value::String(s.clone())),
            Self::List(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(item.to_json()?);
                }
                Some(serde_json::Value::Array(out))
            }
            Self::Block(_) | Self::Event(_) => None,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}
