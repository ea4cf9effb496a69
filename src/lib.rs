//! GPU resource and command scheduling core for a rendering engine.
//!
//! The crate answers three questions for the layers above it:
//!
//! - **Where does GPU-visible data live?** In [`MemoryArena`]s: flat byte
//!   ranges with a host mirror, a free-list sub-allocator, and dirty
//!   tracking toward the device ([`arena`]).
//! - **How does work reach the graphics context?** Through
//!   [`CommandBuffer`]s: any thread records deferred commands, only the
//!   device thread executes them ([`command`]).
//! - **Who produces frames?** [`RenderPipeline`]s: rate-limited worker
//!   threads that translate declarative stages into commands every tick
//!   ([`pipeline`]).
//!
//! Everything device-side funnels through the [`RenderBackend`] trait;
//! the built-in [`NullBackend`] runs the whole core headless, which is
//! how the test suite exercises it. A [`RenderInstance`] is the root
//! object that owns the backend and creates everything else.
//!
//! # Example
//!
//! ```ignore
//! let instance = RenderInstance::new()?;
//! let window = instance.create_window_target(1280, 720);
//!
//! let pipeline = RenderPipeline::new(instance.clone(), &PipelineDescriptor::new(60));
//! pipeline.add_stage(RenderStage::clear(window.clone(), [0.0, 0.0, 0.0, 1.0]));
//! pipeline.add_stage(RenderStage::swap_window(window));
//!
//! // Device thread:
//! loop {
//!     instance.play_filled();
//! }
//! ```

pub mod arena;
pub mod attach;
pub mod backend;
pub mod command;
pub mod error;
pub mod instance;
pub mod limiter;
pub mod pipeline;
pub mod scene;
pub mod target;

pub use arena::{ArenaDescriptor, ArenaPointer, ArenaUsage, MemoryArena};
pub use attach::Attachable;
pub use backend::{NullBackend, RenderBackend};
pub use command::CommandBuffer;
pub use error::RenderError;
pub use instance::RenderInstance;
pub use limiter::FrameLimiter;
pub use pipeline::{PipelineDescriptor, RenderPipeline, RenderStage, StageKind};
pub use scene::{MaterialState, MeshRange, Renderable, SceneSource};
pub use target::{RenderTarget, TargetKind};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    #[test]
    fn test_version_is_set() {
        assert!(!super::VERSION.is_empty());
    }
}
