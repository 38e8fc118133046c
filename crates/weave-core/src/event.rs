// SPDX-License-Identifier: Apache-2.0
//! Tick-stamped event tokens.
//!
//! A token proves that a trigger originated in the current scheduler pass.
//! Consumers check freshness at consumption time, never at creation time:
//! a token that crosses a pass boundary (stored in a property, replayed, or
//! delivered to a parked block) is stale and is ignored without error.
//!
//! Tokens may carry an error payload. An error token short-circuits the unit
//! it triggers and, unless the unit opts out, is forwarded downstream so a
//! whole call chain observes the failure.

use crate::ident::Tick;

/// Error payload carried by a failed event token.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct EventError {
    /// Human-readable description of the failure.
    pub message: String,
    /// Absolute path of the block that raised the error.
    pub origin: String,
}

/// Trigger token stamped with the tick of the pass that minted it.
///
/// `seq` disambiguates tokens minted within the same pass; it is unique for
/// the lifetime of a runtime.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Event {
    /// Tick of the pass this token was minted in.
    pub tick: Tick,
    /// Runtime-wide mint sequence number.
    pub seq: u64,
    /// Error payload, if this token records a failure.
    pub error: Option<EventError>,
}

impl Event {
    /// True when the token was minted in the pass identified by `now`.
    #[must_use]
    pub fn is_fresh(&self, now: Tick) -> bool {
        self.tick == now
    }

    /// True when the token carries an error payload.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Copy of this token carrying the same error but re-stamped for the
    /// pass `now` with mint number `seq`. Used when forwarding an error
    /// through a call chain, so each hop passes the freshness check.
    #[must_use]
    pub fn forwarded(&self, now: Tick, seq: u64) -> Self {
        Self {
            tick: now,
            seq,
            error: self.error.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_is_fresh_only_in_its_own_pass() {
        let e = Event {
            tick: Tick(3),
            seq: 0,
            error: None,
        };
        assert!(e.is_fresh(Tick(3)));
        assert!(!e.is_fresh(Tick(4)), "a later pass must see the token stale");
        assert!(!e.is_fresh(Tick(2)));
    }

    #[test]
    fn forwarded_token_keeps_error_and_restamps() {
        let e = Event {
            tick: Tick(1),
            seq: 9,
            error: Some(EventError {
                message: "boom".into(),
                origin: "main.a".into(),
            }),
        };
        let f = e.forwarded(Tick(2), 10);
        assert!(f.is_fresh(Tick(2)));
        assert_eq!(f.seq, 10);
        assert_eq!(f.error, e.error, "forwarding must preserve the payload");
    }
}
