//! Render instance.
//!
//! The [`RenderInstance`] is the top-level entry point for the rendering
//! core. It owns the one active backend, tracks every live arena and
//! command buffer, and is the object that resolves "which thread may
//! touch the graphics context": whichever thread calls
//! [`play_filled`](RenderInstance::play_filled) is acting as the device
//! thread, and that is the only place queued commands execute.

use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use crate::arena::{ArenaDescriptor, MemoryArena};
use crate::backend::{self, RenderBackend};
use crate::command::CommandBuffer;
use crate::error::RenderError;
use crate::target::{RenderTarget, TargetKind};

/// The render instance manages the backend and live resources.
///
/// # Thread Safety
///
/// `RenderInstance` is `Send + Sync`. Resource creation may happen from
/// any thread; command execution must be funneled through one device
/// thread by convention (the instance cannot know which thread owns the
/// context, it only guarantees each buffer's playback is exclusive).
///
/// # Example
///
/// ```ignore
/// let instance = RenderInstance::new()?;
/// let arena = instance.create_arena(&ArenaDescriptor::new(4096, ArenaUsage::VERTEX))?;
/// let buffer = instance.create_command_buffer();
/// ```
pub struct RenderInstance {
    /// Weak self-reference handed to created resources.
    self_ref: RwLock<Weak<RenderInstance>>,
    /// The one active backend for this instance.
    backend: Arc<dyn RenderBackend>,
    /// Live arenas (weak, for diagnostics).
    arenas: RwLock<Vec<Weak<MemoryArena>>>,
    /// Live command buffers, in registration order. `play_filled` drains
    /// them in this order, which is what makes cross-buffer draining
    /// stable.
    command_buffers: RwLock<Vec<Weak<CommandBuffer>>>,
    /// Target identifiers, unique per instance.
    next_target_id: std::sync::atomic::AtomicU64,
}

impl RenderInstance {
    /// Create a new instance with the default backend.
    ///
    /// # Errors
    ///
    /// Backend initialization failure is the one fatal startup error.
    pub fn new() -> Result<Arc<Self>, RenderError> {
        let backend = backend::create_backend()?;
        log::info!("RenderInstance: using backend {}", backend.name());
        Ok(Self::with_backend(backend))
    }

    /// Create an instance around a specific backend.
    pub fn with_backend(backend: Arc<dyn RenderBackend>) -> Arc<Self> {
        let instance = Arc::new(Self {
            self_ref: RwLock::new(Weak::new()),
            backend,
            arenas: RwLock::new(Vec::new()),
            command_buffers: RwLock::new(Vec::new()),
            next_target_id: std::sync::atomic::AtomicU64::new(0),
        });
        *instance.self_ref.write() = Arc::downgrade(&instance);
        instance
    }

    /// The active backend.
    pub fn backend(&self) -> &Arc<dyn RenderBackend> {
        &self.backend
    }

    fn arc_self(&self) -> Weak<RenderInstance> {
        self.self_ref.read().clone()
    }

    /// Create a memory arena.
    ///
    /// # Errors
    ///
    /// Returns an error if the host mirror cannot be allocated.
    pub fn create_arena(&self, descriptor: &ArenaDescriptor) -> Result<Arc<MemoryArena>, RenderError> {
        let arena = Arc::new(MemoryArena::new(descriptor, self.backend.clone())?);
        self.arenas.write().push(Arc::downgrade(&arena));
        log::trace!(
            "RenderInstance: created arena {:?}, size={}",
            descriptor.label,
            descriptor.size
        );
        Ok(arena)
    }

    /// Create a command buffer registered with this instance.
    pub fn create_command_buffer(&self) -> Arc<CommandBuffer> {
        let buffer = Arc::new(CommandBuffer::new(self.arc_self()));
        self.command_buffers.write().push(Arc::downgrade(&buffer));
        log::trace!("RenderInstance: created command buffer");
        buffer
    }

    /// Create a window render target.
    pub fn create_window_target(&self, width: u32, height: u32) -> RenderTarget {
        RenderTarget::new(self.next_target_id(), TargetKind::Window, width, height)
    }

    /// Create an offscreen render target.
    pub fn create_offscreen_target(&self, width: u32, height: u32) -> RenderTarget {
        RenderTarget::new(self.next_target_id(), TargetKind::Offscreen, width, height)
    }

    fn next_target_id(&self) -> u64 {
        self.next_target_id
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed)
    }

    /// Drain every live, filled command buffer.
    ///
    /// This is the device-thread entry point: call it periodically from
    /// the one thread that owns the graphics context. Buffers are played
    /// in registration order. Returns how many buffers were played.
    pub fn play_filled(&self) -> usize {
        let buffers: Vec<_> = self
            .command_buffers
            .read()
            .iter()
            .filter_map(Weak::upgrade)
            .collect();

        let mut played = 0;
        for buffer in buffers {
            if buffer.is_filled() && buffer.play() {
                played += 1;
            }
        }
        played
    }

    /// Number of live arenas.
    pub fn arena_count(&self) -> usize {
        self.arenas
            .read()
            .iter()
            .filter(|w| w.strong_count() > 0)
            .count()
    }

    /// Number of live command buffers.
    pub fn command_buffer_count(&self) -> usize {
        self.command_buffers
            .read()
            .iter()
            .filter(|w| w.strong_count() > 0)
            .count()
    }

    /// Drop dead weak references to released resources.
    pub fn cleanup_dead_resources(&self) {
        self.arenas.write().retain(|w| w.strong_count() > 0);
        self.command_buffers.write().retain(|w| w.strong_count() > 0);
    }
}

impl std::fmt::Debug for RenderInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderInstance")
            .field("backend", &self.backend.name())
            .field("arena_count", &self.arena_count())
            .field("command_buffer_count", &self.command_buffer_count())
            .finish()
    }
}

// Ensure RenderInstance is Send + Sync
static_assertions::assert_impl_all!(RenderInstance: Send, Sync);
