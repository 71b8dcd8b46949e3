//! The single durable handler slot.

use std::sync::Arc;

use arc_swap::ArcSwapOption;

use crate::handler::FrameHandler;

/// Holds at most one installed frame handler behind an atomically swappable
/// reference.
///
/// The delivery path reads the slot lock-free and sees a value that is
/// stale-but-valid or empty, never torn. Writes are expected to arrive
/// serialized from one control thread; concurrent writers degrade to
/// last-write-wins, never to corruption or a double release.
pub struct CallbackRegistry {
    slot: ArcSwapOption<Box<dyn FrameHandler>>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self {
            slot: ArcSwapOption::new(None),
        }
    }

    /// Install, replace, or (with `None`) clear the handler.
    ///
    /// The previous occupant's durable reference is released when the last
    /// in-flight borrow of it ends, exactly once, via `Drop`.
    pub fn install(&self, handler: Option<Box<dyn FrameHandler>>) {
        self.slot.store(handler.map(Arc::new));
    }

    /// Clear the slot. Safe to call any number of times.
    pub fn teardown(&self) {
        self.slot.store(None);
    }

    /// Lock-free snapshot for the delivery path.
    ///
    /// The returned clone keeps the handler alive through an in-flight call even
    /// if a writer swaps the slot mid-delivery.
    pub fn current(&self) -> Option<Arc<Box<dyn FrameHandler>>> {
        self.slot.load_full()
    }

    pub fn is_installed(&self) -> bool {
        self.slot.load().is_some()
    }
}

impl Default for CallbackRegistry {
    fn default() -> Self {
        Self::new()
    }
}
