//! Attachable-object lifecycle.
//!
//! Every resource that owns arena ranges tied to rendering (camera
//! uniform blocks, mesh vertex/index ranges, material instance blocks)
//! follows the same protocol: allocate on attach to a scene, release
//! exactly once on detach, and never run init/cleanup concurrently with
//! the periodic update hook. [`AttachState`] is that protocol's lock:
//! one internal mutex held across whichever of the three phases is
//! running.

use parking_lot::Mutex;

/// Lifecycle hooks for resources that allocate arena ranges.
///
/// `attach` and `detach` must be idempotent: repeating either is a
/// reported no-op, never a crash.
pub trait Attachable: Send + Sync {
    /// Allocate rendering resources. Returns `false` if already attached.
    fn attach(&self) -> bool;

    /// Release rendering resources. Returns `false` if not attached.
    fn detach(&self) -> bool;

    /// Periodic per-tick update (upload current state to the arena).
    /// A no-op while detached.
    fn update(&self);
}

/// Attachment flag plus the lock serializing init/cleanup against update.
///
/// # Example
///
/// ```ignore
/// fn attach(&self) -> bool {
///     self.state.try_attach(|| {
///         *self.block.lock() = self.arena.allocate(SIZE);
///         true
///     })
/// }
/// ```
#[derive(Debug, Default)]
pub struct AttachState {
    attached: Mutex<bool>,
}

impl AttachState {
    /// Create in the detached state.
    pub fn new() -> Self {
        Self::default()
    }

    /// True if currently attached.
    pub fn is_attached(&self) -> bool {
        *self.attached.lock()
    }

    /// Run `init` under the lifecycle lock and mark attached.
    ///
    /// Returns `false` without running `init` if already attached, or if
    /// `init` itself returns `false` (the object stays detached).
    pub fn try_attach(&self, init: impl FnOnce() -> bool) -> bool {
        let mut attached = self.attached.lock();
        if *attached {
            log::warn!("Attachable: attach while already attached, ignoring");
            return false;
        }
        if !init() {
            return false;
        }
        *attached = true;
        true
    }

    /// Run `cleanup` under the lifecycle lock and mark detached.
    ///
    /// Returns `false` without running `cleanup` if not attached.
    pub fn try_detach(&self, cleanup: impl FnOnce()) -> bool {
        let mut attached = self.attached.lock();
        if !*attached {
            log::warn!("Attachable: detach while not attached, ignoring");
            return false;
        }
        cleanup();
        *attached = false;
        true
    }

    /// Run `update` under the lifecycle lock if attached.
    ///
    /// Holding the lock here is what keeps a concurrent detach from
    /// releasing ranges out from under a mid-flight update.
    pub fn if_attached(&self, update: impl FnOnce()) {
        let attached = self.attached.lock();
        if *attached {
            update();
        }
    }
}
