//! Rendering backend abstraction.
//!
//! The core never calls a graphics API directly. Everything device-side
//! goes through the [`RenderBackend`] trait: arena lifecycle hooks,
//! command buffer replay, window activation and presentation, and the
//! per-stage execution hooks. A concrete backend (OpenGL, software
//! rasterizer, ...) implements this trait once; the allocator, command
//! buffer, and pipeline logic never change when a backend is added.
//!
//! The built-in [`NullBackend`] performs no device work but records every
//! hook invocation, which is what the test suite asserts against.

mod null;

pub use null::{BackendOp, NullBackend};

use std::collections::VecDeque;
use std::sync::Arc;

use crate::arena::{ArenaDescriptor, ArenaPointer};
use crate::command::Command;
use crate::error::RenderError;
use crate::scene::{MaterialState, MeshRange};
use crate::target::RenderTarget;

/// Backend-owned handle to a device-side arena buffer.
///
/// Created lazily by [`RenderBackend::create_arena`] on the first bind;
/// the core treats it as opaque.
#[derive(Debug)]
pub enum BackendArena {
    /// Null backend handle (no device allocation).
    Null {
        /// Identifier assigned by the null backend.
        id: u64,
    },
}

impl BackendArena {
    /// Identifier for logging and tests.
    pub fn id(&self) -> u64 {
        match self {
            Self::Null { id } => *id,
        }
    }
}

/// Hooks a graphics backend implements for the rendering core.
///
/// All methods must be callable from the device thread; the arena hooks
/// may additionally be invoked from worker threads while the arena lock
/// is held, so implementations must not call back into the same arena.
pub trait RenderBackend: Send + Sync + 'static {
    /// Backend name.
    fn name(&self) -> &'static str;

    /// Create the device-side buffer for an arena.
    fn create_arena(&self, descriptor: &ArenaDescriptor) -> Result<BackendArena, RenderError>;

    /// Tear down the device-side buffer. Called from the arena's drop.
    fn destroy_arena(&self, handle: &BackendArena);

    /// The arena grew; the device buffer must be recreated at `new_size`.
    fn arena_resized(&self, handle: &BackendArena, new_size: u64);

    /// A range of the host mirror changed and needs a device sync.
    fn arena_contents_changed(&self, handle: &BackendArena, range: ArenaPointer);

    /// Bind the arena for use by subsequent draws.
    fn bind_arena(&self, handle: &BackendArena);

    /// Replay a command buffer's queue.
    ///
    /// Must pop and execute commands strictly in FIFO order until the
    /// queue is empty.
    fn replay(&self, commands: &mut VecDeque<Command>);

    /// Make a window's context current on the calling (device) thread.
    fn window_make_current(&self, target: &RenderTarget);

    /// Present a window's back buffer.
    fn window_swap(&self, target: &RenderTarget);

    /// Execute an opaque pipeline stage by index (compute, overlays).
    fn execute_stage(&self, index: usize);

    /// Clear a render target to a color.
    fn clear_target(&self, target: &RenderTarget, color: [f32; 4]);

    /// Resize a render target.
    fn resize_target(&self, target: &RenderTarget, width: u32, height: u32);

    /// Copy between two render targets (either side may be a window).
    fn copy_target(&self, source: &RenderTarget, destination: &RenderTarget);

    /// Apply per-material device state (culling, depth mode, shader).
    fn apply_material(&self, state: &MaterialState);

    /// Draw one object: a mesh range plus its transform-buffer index.
    fn draw(&self, mesh: &MeshRange, transform_index: u32);
}

/// Pop and execute commands in FIFO order.
///
/// Backends that have no extra bookkeeping to do per replay can delegate
/// to this.
pub fn replay_fifo(backend: &dyn RenderBackend, commands: &mut VecDeque<Command>) {
    while let Some(command) = commands.pop_front() {
        log::trace!("replay: command {}", command.id());
        command.execute(backend);
    }
}

/// Create the backend for a new instance.
///
/// One active backend per running instance; with no graphics API compiled
/// in, this is the null backend.
pub fn create_backend() -> Result<Arc<dyn RenderBackend>, RenderError> {
    log::info!("Using null backend");
    Ok(Arc::new(NullBackend::new()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_backend() {
        let backend = create_backend().unwrap();
        assert_eq!(backend.name(), "Null");
    }

    #[test]
    fn test_replay_fifo_order() {
        let backend = NullBackend::new();
        let mut commands = VecDeque::new();
        for i in 0..3usize {
            commands.push_back(Command::new(i as u64, move |b: &dyn RenderBackend| {
                b.execute_stage(i);
            }));
        }

        replay_fifo(&backend, &mut commands);
        assert!(commands.is_empty());

        let stages: Vec<_> = backend
            .operations()
            .into_iter()
            .filter_map(|op| match op {
                BackendOp::ExecuteStage { index } => Some(index),
                _ => None,
            })
            .collect();
        assert_eq!(stages, vec![0, 1, 2]);
    }
}
