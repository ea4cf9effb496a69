//! Render target handles.
//!
//! A [`RenderTarget`] is a lightweight, clonable handle to a surface the
//! pipeline can draw into: a window back buffer or an offscreen target.
//! The concrete surface lives in the backend; the core only needs an
//! identity, a size, and liveness. A closed target makes any stage that
//! references it a reported no-op rather than a crash.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// Kind of render target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetKind {
    /// A window back buffer; stages using it need a current context.
    Window,
    /// An offscreen color target.
    Offscreen,
}

#[derive(Debug)]
struct TargetInner {
    id: u64,
    kind: TargetKind,
    size: Mutex<(u32, u32)>,
    alive: AtomicBool,
}

/// Handle to a window or offscreen surface.
///
/// Clones share identity; equality is identity. Created by
/// [`RenderInstance`](crate::instance::RenderInstance) so identifiers are
/// unique per instance rather than process-global.
#[derive(Debug, Clone)]
pub struct RenderTarget {
    inner: Arc<TargetInner>,
}

impl RenderTarget {
    pub(crate) fn new(id: u64, kind: TargetKind, width: u32, height: u32) -> Self {
        Self {
            inner: Arc::new(TargetInner {
                id,
                kind,
                size: Mutex::new((width, height)),
                alive: AtomicBool::new(true),
            }),
        }
    }

    /// Target identifier, unique within the owning instance.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Target kind.
    pub fn kind(&self) -> TargetKind {
        self.inner.kind
    }

    /// True if this target refers to a window.
    pub fn is_window(&self) -> bool {
        self.inner.kind == TargetKind::Window
    }

    /// Current size in pixels.
    pub fn size(&self) -> (u32, u32) {
        *self.inner.size.lock()
    }

    /// Record a new size (called when a resize stage executes).
    pub fn set_size(&self, width: u32, height: u32) {
        *self.inner.size.lock() = (width, height);
    }

    /// True until [`close`](Self::close) is called.
    pub fn is_alive(&self) -> bool {
        self.inner.alive.load(Ordering::Acquire)
    }

    /// Mark the target destroyed.
    ///
    /// Stages referencing a closed target are skipped with a warning.
    pub fn close(&self) {
        self.inner.alive.store(false, Ordering::Release);
    }
}

impl PartialEq for RenderTarget {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for RenderTarget {}

// Ensure RenderTarget is Send + Sync
static_assertions::assert_impl_all!(RenderTarget: Send, Sync);
