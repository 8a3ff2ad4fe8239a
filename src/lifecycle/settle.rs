//! Settle-once guard.

use std::sync::atomic::{AtomicBool, Ordering};

/// Ensures an outcome is committed at most once, however many paths race
/// to commit it.
#[derive(Debug, Default)]
pub struct SettleOnce {
    settled: AtomicBool,
}

impl SettleOnce {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the right to settle. Returns `true` for exactly one caller.
    pub fn try_settle(&self) -> bool {
        self.settled
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_settled(&self) -> bool {
        self.settled.load(Ordering::Acquire)
    }
}
