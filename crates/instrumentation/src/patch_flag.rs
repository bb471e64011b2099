//! Process-wide "already patched" state.
//!
//! Some hosts hand out several distinct references to the same loaded module,
//! so a marker on the module object alone cannot prevent double wrapping. The
//! process flag is written only by patch (true) and unpatch (false) and read
//! without locking everywhere else.

use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Default)]
pub struct PatchFlag(AtomicBool);

impl PatchFlag {
    pub const fn new() -> Self {
        Self(AtomicBool::new(false))
    }

    pub fn get(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub(crate) fn set(&self, value: bool) {
        self.0.store(value, Ordering::Release);
    }
}

pub(crate) static PROCESS_PATCHED: PatchFlag = PatchFlag::new();

/// Whether the callback library is currently instrumented in this process.
pub fn is_patched() -> bool {
    PROCESS_PATCHED.get()
}
