//! Pipeline stage descriptions.
//!
//! A [`RenderStage`] is declarative: it names what a tick does, not how.
//! The pipeline thread translates each stage into backend commands every
//! tick, so stages can be added or removed while the pipeline runs.

use std::sync::Arc;

use crate::scene::{CameraSource, SceneSource};
use crate::target::RenderTarget;

/// Callback run on the pipeline thread before or after a stage.
pub type StageHook = Box<dyn FnMut() + Send>;

/// What a stage does each tick.
pub enum StageKind {
    /// Placeholder; translates to nothing.
    None,
    /// Clear a target to a color.
    Clear {
        /// Target to clear.
        target: RenderTarget,
        /// RGBA clear color.
        color: [f32; 4],
    },
    /// Resize a target.
    ResizeTarget {
        /// Target to resize.
        target: RenderTarget,
        /// New width in pixels.
        width: u32,
        /// New height in pixels.
        height: u32,
    },
    /// Copy one offscreen target into another.
    CopyTarget {
        /// Source target.
        source: RenderTarget,
        /// Destination target.
        destination: RenderTarget,
    },
    /// Copy an offscreen target into a window's back buffer.
    CopyToWindow {
        /// Source target.
        source: RenderTarget,
        /// Destination window.
        window: RenderTarget,
    },
    /// Copy a window's back buffer into an offscreen target.
    CopyFromWindow {
        /// Source window.
        window: RenderTarget,
        /// Destination target.
        destination: RenderTarget,
    },
    /// Present a window's back buffer.
    SwapWindow {
        /// Window to present.
        window: RenderTarget,
    },
    /// Draw a scene through a camera, batched by material.
    RenderWorld {
        /// Scene to draw.
        scene: Arc<dyn SceneSource>,
        /// Camera to draw through.
        camera: Arc<dyn CameraSource>,
    },
    /// Opaque compute work, dispatched by stage index.
    Compute {
        /// Debug label.
        label: String,
    },
    /// Opaque overlay work (debug UI), dispatched by stage index.
    Overlay {
        /// Debug label.
        label: String,
    },
}

impl std::fmt::Debug for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "None"),
            Self::Clear { target, color } => f
                .debug_struct("Clear")
                .field("target", &target.id())
                .field("color", color)
                .finish(),
            Self::ResizeTarget {
                target,
                width,
                height,
            } => f
                .debug_struct("ResizeTarget")
                .field("target", &target.id())
                .field("width", width)
                .field("height", height)
                .finish(),
            Self::CopyTarget {
                source,
                destination,
            } => f
                .debug_struct("CopyTarget")
                .field("source", &source.id())
                .field("destination", &destination.id())
                .finish(),
            Self::CopyToWindow { source, window } => f
                .debug_struct("CopyToWindow")
                .field("source", &source.id())
                .field("window", &window.id())
                .finish(),
            Self::CopyFromWindow {
                window,
                destination,
            } => f
                .debug_struct("CopyFromWindow")
                .field("window", &window.id())
                .field("destination", &destination.id())
                .finish(),
            Self::SwapWindow { window } => f
                .debug_struct("SwapWindow")
                .field("window", &window.id())
                .finish(),
            Self::RenderWorld { .. } => write!(f, "RenderWorld"),
            Self::Compute { label } => f.debug_struct("Compute").field("label", label).finish(),
            Self::Overlay { label } => f.debug_struct("Overlay").field("label", label).finish(),
        }
    }
}

/// One stage of a render pipeline.
pub struct RenderStage {
    /// What the stage does.
    pub kind: StageKind,
    /// Run on the pipeline thread before the stage is translated.
    pub before: Option<StageHook>,
    /// Run on the pipeline thread after the stage is translated.
    pub after: Option<StageHook>,
}

impl RenderStage {
    /// Create a stage with no hooks.
    pub fn new(kind: StageKind) -> Self {
        Self {
            kind,
            before: None,
            after: None,
        }
    }

    /// Clear stage.
    pub fn clear(target: RenderTarget, color: [f32; 4]) -> Self {
        Self::new(StageKind::Clear { target, color })
    }

    /// Swap stage.
    pub fn swap_window(window: RenderTarget) -> Self {
        Self::new(StageKind::SwapWindow { window })
    }

    /// World-render stage.
    pub fn render_world(scene: Arc<dyn SceneSource>, camera: Arc<dyn CameraSource>) -> Self {
        Self::new(StageKind::RenderWorld { scene, camera })
    }

    /// Set the before hook.
    pub fn with_before(mut self, hook: impl FnMut() + Send + 'static) -> Self {
        self.before = Some(Box::new(hook));
        self
    }

    /// Set the after hook.
    pub fn with_after(mut self, hook: impl FnMut() + Send + 'static) -> Self {
        self.after = Some(Box::new(hook));
        self
    }

    /// All targets this stage touches; a stage with a dead target is
    /// skipped by the pipeline. The world-render target belongs to the
    /// camera and is checked at translation time.
    pub(crate) fn targets(&self) -> Vec<&RenderTarget> {
        match &self.kind {
            StageKind::None
            | StageKind::Compute { .. }
            | StageKind::Overlay { .. }
            | StageKind::RenderWorld { .. } => Vec::new(),
            StageKind::Clear { target, .. } | StageKind::ResizeTarget { target, .. } => {
                vec![target]
            }
            StageKind::CopyTarget {
                source,
                destination,
            } => vec![source, destination],
            StageKind::CopyToWindow { source, window } => vec![source, window],
            StageKind::CopyFromWindow {
                window,
                destination,
            } => vec![window, destination],
            StageKind::SwapWindow { window } => vec![window],
        }
    }
}

impl std::fmt::Debug for RenderStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderStage")
            .field("kind", &self.kind)
            .field("before", &self.before.is_some())
            .field("after", &self.after.is_some())
            .finish()
    }
}
