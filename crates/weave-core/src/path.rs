// SPDX-License-Identifier: Apache-2.0
//! Path grammar: dotted, prefix-qualified property and block paths.
//!
//! Absolute paths are dotted segment lists rooted at the root flow, whose
//! own path is the empty string. Relative paths may start with a fixed scope
//! name and may contain the operator segments:
//!
//! * `#`   consumed without effect (the block itself)
//! * `##`  pop one segment (the parent block)
//! * `###` jump to the enclosing flow's root block
//! * `#global` / `#shared` / `#temp` (first segment only) anchor at a scope
//!
//! `###` depends on which ancestor is a flow, which a path string alone
//! cannot know, so textual resolution returns such paths as [`Resolved::Dynamic`]
//! and leaves the jump to the structural walk in the binding layer.

use thiserror::Error;

/// Name of the read-only environment scope.
pub const SCOPE_GLOBAL: &str = "#global";
/// Name of the cross-session shared scope.
pub const SCOPE_SHARED: &str = "#shared";
/// Name of the session-local scratch scope.
pub const SCOPE_TEMP: &str = "#temp";

/// Segment that pops to the parent block.
pub const SEG_PARENT: &str = "##";
/// Segment that jumps to the enclosing flow root.
pub const SEG_FLOW_ROOT: &str = "###";
/// Segment consumed without effect.
pub const SEG_HERE: &str = "#";

/// Errors raised by path parsing and binding admission.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PathError {
    /// The path string was empty.
    #[error("empty path")]
    Empty,
    /// A `..` or leading/trailing dot produced an empty segment.
    #[error("empty segment in path `{path}`")]
    EmptySegment {
        /// Offending path.
        path: String,
    },
    /// `##` popped past the root block.
    #[error("path `{path}` escapes the root")]
    EscapesRoot {
        /// Offending path.
        path: String,
    },
    /// The binding violates the scope rules.
    #[error("invalid binding path: `{from}` may not bind to `{to}`")]
    InvalidBindingPath {
        /// Data source path.
        to: String,
        /// Path of the property that would hold the binding.
        from: String,
    },
}

/// Outcome of textual resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolved {
    /// Fully resolved absolute path.
    Absolute(String),
    /// The path contains `###` and must be walked structurally; the input
    /// is returned unchanged.
    Dynamic(String),
}

/// The three fixed scopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    /// `#global`: runtime-provided environment, read-only to callers.
    Global,
    /// `#shared`: state shared across sessions.
    Shared,
    /// `#temp`: session-local scratch, never persisted.
    Temp,
}

impl ScopeKind {
    /// The scope's path segment name.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Global => SCOPE_GLOBAL,
            Self::Shared => SCOPE_SHARED,
            Self::Temp => SCOPE_TEMP,
        }
    }

    /// Parses a scope segment name.
    #[must_use]
    pub fn parse(segment: &str) -> Option<Self> {
        match segment {
            SCOPE_GLOBAL => Some(Self::Global),
            SCOPE_SHARED => Some(Self::Shared),
            SCOPE_TEMP => Some(Self::Temp),
            _ => None,
        }
    }
}

/// Bindability class of an admitted binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindClass {
    /// Ordinary binding inside one session's state.
    Local,
    /// Binding that reads into a `#shared` region from outside it; the
    /// connection layer treats these as sync-relevant.
    Shared,
}

/// Splits an absolute path into segments. The root path (empty string)
/// yields no segments.
pub fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('.').filter(|s| !s.is_empty())
}

/// True for names a property or block may carry: non-empty, no dots, no
/// operator spelling, and not starting with the snapshot binding marker.
#[must_use]
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && !name.contains('.')
        && !name.starts_with('~')
        && name != SEG_HERE
        && name != SEG_PARENT
        && name != SEG_FLOW_ROOT
}

/// Resolves `path` against the absolute path `base`.
///
/// Scope names anchor only in first position; elsewhere they are ordinary
/// segments. Any `###` makes the result [`Resolved::Dynamic`].
pub fn resolve(base: &str, path: &str) -> Result<Resolved, PathError> {
    if path.is_empty() {
        return Err(PathError::Empty);
    }
    let mut out: Vec<&str> = segments(base).collect();
    for (i, seg) in path.split('.').enumerate() {
        if seg.is_empty() {
            return Err(PathError::EmptySegment {
                path: path.to_owned(),
            });
        }
        if i == 0 {
            if let Some(scope) = ScopeKind::parse(seg) {
                out.clear();
                out.push(scope.name());
                continue;
            }
        }
        match seg {
            SEG_HERE => {}
            SEG_PARENT => {
                if out.pop().is_none() {
                    return Err(PathError::EscapesRoot {
                        path: path.to_owned(),
                    });
                }
            }
            SEG_FLOW_ROOT => return Ok(Resolved::Dynamic(path.to_owned())),
            _ => out.push(seg),
        }
    }
    Ok(Resolved::Absolute(out.join(".")))
}

/// Shortest relative path that reaches absolute `target` from absolute
/// `base`. Scope-rooted targets stay scope-rooted; identical paths yield
/// `#`.
#[must_use]
pub fn relative_path(base: &str, target: &str) -> String {
    if segments(target)
        .next()
        .is_some_and(|s| ScopeKind::parse(s).is_some())
    {
        return target.to_owned();
    }
    let base_segs: Vec<&str> = segments(base).collect();
    let target_segs: Vec<&str> = segments(target).collect();
    let common = base_segs
        .iter()
        .zip(&target_segs)
        .take_while(|(a, b)| a == b)
        .count();
    let mut parts: Vec<&str> = Vec::new();
    for _ in common..base_segs.len() {
        parts.push(SEG_PARENT);
    }
    parts.extend(&target_segs[common..]);
    if parts.is_empty() {
        return SEG_HERE.to_owned();
    }
    parts.join(".")
}

/// Scope containing an absolute path, or `None` for ordinary local state.
#[must_use]
pub fn scope_of(path: &str) -> Option<ScopeKind> {
    segments(path).next().and_then(ScopeKind::parse)
}

/// Admission check for a binding: `to` is the absolute path of the data
/// source, `from` the absolute path of the property that will hold the
/// binding.
///
/// Rules: nothing in `#global` may hold a binding; `#temp` is never a data
/// source, and a `#temp` holder may reach only the `#global` environment;
/// `#shared` state may depend only on shared or global state; reading into
/// `#shared` from outside classifies as [`BindClass::Shared`].
pub fn bindability(to: &str, from: &str) -> Result<BindClass, PathError> {
    let to_scope = scope_of(to);
    let from_scope = scope_of(from);
    let reject = || PathError::InvalidBindingPath {
        to: to_owned_path(to),
        from: to_owned_path(from),
    };
    if from_scope == Some(ScopeKind::Global) {
        return Err(reject());
    }
    if to_scope == Some(ScopeKind::Temp) {
        return Err(reject());
    }
    if from_scope == Some(ScopeKind::Temp) && to_scope != Some(ScopeKind::Global) {
        return Err(reject());
    }
    if from_scope == Some(ScopeKind::Shared)
        && !matches!(to_scope, Some(ScopeKind::Shared | ScopeKind::Global))
    {
        return Err(reject());
    }
    if to_scope == Some(ScopeKind::Shared) && from_scope != Some(ScopeKind::Shared) {
        return Ok(BindClass::Shared);
    }
    Ok(BindClass::Local)
}

fn to_owned_path(p: &str) -> String {
    p.to_owned()
}
