// SPDX-License-Identifier: Apache-2.0
//! Injected time source.
//!
//! Units never read wall-clock time directly; they go through the runtime's
//! [`Clock`] so timer behavior is reproducible under test with a
//! [`VirtualClock`].

use core::cell::Cell;
use core::fmt;
use std::rc::Rc;
use std::time::Instant;

/// Monotonic millisecond time source.
pub trait Clock: fmt::Debug {
    /// Milliseconds elapsed since the clock's origin.
    fn now_ms(&self) -> u64;
}

/// Wall-clock backed [`Clock`], anchored at construction.
#[derive(Debug)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    /// Creates a clock whose origin is now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

/// Manually advanced clock for tests and deterministic replay.
///
/// Cloning shares the underlying counter, so a test can keep a handle while
/// the runtime owns another.
#[derive(Debug, Clone, Default)]
pub struct VirtualClock {
    ms: Rc<Cell<u64>>,
}

impl VirtualClock {
    /// Creates a clock at time zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves time forward by `ms` milliseconds.
    pub fn advance(&self, ms: u64) {
        self.ms.set(self.ms.get().saturating_add(ms));
    }

    /// Sets the absolute time. Never moves backwards.
    pub fn set(&self, ms: u64) {
        if ms > self.ms.get() {
            self.ms.set(ms);
        }
    }
}

impl Clock for VirtualClock {
    fn now_ms(&self) -> u64 {
        self.ms.get()
    }
}
