//! Dirty tracking for the external snapshot mechanism.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Shared "state changed since the last snapshot" flag.
///
/// Cloning shares the underlying flag. Components call [`DirtyFlag::mark`]
/// after every mutation of pending, deferred or session state; the
/// persistence collaborator calls [`DirtyFlag::take`] before snapshotting.
#[derive(Clone, Debug, Default)]
pub struct DirtyFlag(Arc<AtomicBool>);

impl DirtyFlag {
    /// Create a clean flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that state changed.
    pub fn mark(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Whether state changed since the last [`take`](Self::take).
    pub fn is_dirty(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Clear the flag, returning whether it was set.
    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_clean() {
        assert!(!DirtyFlag::new().is_dirty());
    }

    #[test]
    fn take_clears() {
        let flag = DirtyFlag::new();
        flag.mark();
        assert!(flag.take());
        assert!(!flag.take());
    }

    #[test]
    fn clones_share_state() {
        let a = DirtyFlag::new();
        let b = a.clone();
        b.mark();
        assert!(a.is_dirty());
    }
}
