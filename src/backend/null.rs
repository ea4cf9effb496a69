//! Null rendering backend.
//!
//! Performs no device work, but assigns handles and records every hook
//! invocation so tests (and headless tools) can assert on the exact
//! sequence of device-side operations the core emits.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::arena::{ArenaDescriptor, ArenaPointer};
use crate::command::Command;
use crate::error::RenderError;
use crate::scene::{MaterialState, MeshRange};
use crate::target::RenderTarget;

use super::{replay_fifo, BackendArena, RenderBackend};

/// One recorded backend hook invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendOp {
    /// `create_arena` was called.
    CreateArena { id: u64, size: u64 },
    /// `destroy_arena` was called.
    DestroyArena { id: u64 },
    /// `arena_resized` was called.
    ArenaResized { id: u64, new_size: u64 },
    /// `arena_contents_changed` was called.
    ArenaContentsChanged { id: u64, range: ArenaPointer },
    /// `bind_arena` was called.
    BindArena { id: u64 },
    /// `replay` drained a command queue.
    Replay { count: usize },
    /// `window_make_current` was called.
    MakeCurrent { target: u64 },
    /// `window_swap` was called.
    Swap { target: u64 },
    /// `execute_stage` was called.
    ExecuteStage { index: usize },
    /// `clear_target` was called.
    Clear { target: u64, color: [f32; 4] },
    /// `resize_target` was called.
    Resize { target: u64, width: u32, height: u32 },
    /// `copy_target` was called.
    Copy { source: u64, destination: u64 },
    /// `apply_material` was called.
    ApplyMaterial { material: u64 },
    /// `draw` was called.
    Draw { transform_index: u32 },
}

/// Null backend: no device, full operation log.
#[derive(Debug, Default)]
pub struct NullBackend {
    next_arena_id: AtomicU64,
    operations: Mutex<Vec<BackendOp>>,
}

impl NullBackend {
    /// Create a new null backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all recorded operations, in invocation order.
    pub fn operations(&self) -> Vec<BackendOp> {
        self.operations.lock().clone()
    }

    /// Discard the recorded operations.
    pub fn clear_operations(&self) {
        self.operations.lock().clear();
    }

    fn record(&self, op: BackendOp) {
        self.operations.lock().push(op);
    }
}

impl RenderBackend for NullBackend {
    fn name(&self) -> &'static str {
        "Null"
    }

    fn create_arena(&self, descriptor: &ArenaDescriptor) -> Result<BackendArena, RenderError> {
        let id = self.next_arena_id.fetch_add(1, Ordering::Relaxed);
        log::trace!(
            "NullBackend: create arena {} {:?} (size: {})",
            id,
            descriptor.label,
            descriptor.size
        );
        self.record(BackendOp::CreateArena {
            id,
            size: descriptor.size,
        });
        Ok(BackendArena::Null { id })
    }

    fn destroy_arena(&self, handle: &BackendArena) {
        log::trace!("NullBackend: destroy arena {}", handle.id());
        self.record(BackendOp::DestroyArena { id: handle.id() });
    }

    fn arena_resized(&self, handle: &BackendArena, new_size: u64) {
        log::trace!(
            "NullBackend: arena {} resized to {}",
            handle.id(),
            new_size
        );
        self.record(BackendOp::ArenaResized {
            id: handle.id(),
            new_size,
        });
    }

    fn arena_contents_changed(&self, handle: &BackendArena, range: ArenaPointer) {
        log::trace!(
            "NullBackend: arena {} dirty at {:?}",
            handle.id(),
            range
        );
        self.record(BackendOp::ArenaContentsChanged {
            id: handle.id(),
            range,
        });
    }

    fn bind_arena(&self, handle: &BackendArena) {
        self.record(BackendOp::BindArena { id: handle.id() });
    }

    fn replay(&self, commands: &mut VecDeque<Command>) {
        let count = commands.len();
        replay_fifo(self, commands);
        self.record(BackendOp::Replay { count });
    }

    fn window_make_current(&self, target: &RenderTarget) {
        self.record(BackendOp::MakeCurrent { target: target.id() });
    }

    fn window_swap(&self, target: &RenderTarget) {
        self.record(BackendOp::Swap { target: target.id() });
    }

    fn execute_stage(&self, index: usize) {
        self.record(BackendOp::ExecuteStage { index });
    }

    fn clear_target(&self, target: &RenderTarget, color: [f32; 4]) {
        self.record(BackendOp::Clear {
            target: target.id(),
            color,
        });
    }

    fn resize_target(&self, target: &RenderTarget, width: u32, height: u32) {
        self.record(BackendOp::Resize {
            target: target.id(),
            width,
            height,
        });
    }

    fn copy_target(&self, source: &RenderTarget, destination: &RenderTarget) {
        self.record(BackendOp::Copy {
            source: source.id(),
            destination: destination.id(),
        });
    }

    fn apply_material(&self, state: &MaterialState) {
        self.record(BackendOp::ApplyMaterial {
            material: state.id.0,
        });
    }

    fn draw(&self, _mesh: &MeshRange, transform_index: u32) {
        self.record(BackendOp::Draw { transform_index });
    }
}

// Ensure NullBackend is Send + Sync
static_assertions::assert_impl_all!(NullBackend: Send, Sync);
