//! Rate-limited render pipeline.
//!
//! A [`RenderPipeline`] owns a worker thread that, every tick, walks its
//! stage list, translates each stage into backend commands, closes the
//! recording bracket, and waits (bounded) for the device thread to drain
//! the buffer before sleeping out the remainder of the tick period.
//!
//! The pipeline thread never touches the graphics context. It only
//! records; the device thread executes via
//! [`RenderInstance::play_filled`](crate::instance::RenderInstance::play_filled).
//!
//! # Example
//!
//! ```ignore
//! let pipeline = RenderPipeline::new(
//!     instance.clone(),
//!     &PipelineDescriptor::new(60),
//! );
//! pipeline.add_stage(RenderStage::clear(window.clone(), [0.0; 4]));
//! pipeline.add_stage(RenderStage::swap_window(window));
//! pipeline.start();
//! // Device thread: loop { instance.play_filled(); }
//! ```

mod stage;

pub use stage::{RenderStage, StageHook, StageKind};

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;

use crate::command::{CommandBuffer, Recording};
use crate::instance::RenderInstance;
use crate::limiter::FrameLimiter;
use crate::scene::batch_by_material;
use crate::target::RenderTarget;

/// Command kind identifiers, for replay logging.
mod cmd {
    pub const MAKE_CURRENT: u64 = 1;
    pub const CLEAR: u64 = 2;
    pub const RESIZE: u64 = 3;
    pub const COPY: u64 = 4;
    pub const SWAP: u64 = 5;
    pub const STAGE: u64 = 6;
    pub const MATERIAL: u64 = 7;
    pub const DRAW: u64 = 8;
}

/// How long one drain wait lasts before re-checking the stop flag.
const DRAIN_POLL: Duration = Duration::from_millis(2);

/// Configuration for a pipeline.
#[derive(Debug, Clone, Copy)]
pub struct PipelineDescriptor {
    /// Target tick rate; 0 means unlimited.
    pub ticks_per_second: u32,
    /// Start the worker thread from `new`.
    pub start_immediately: bool,
}

impl PipelineDescriptor {
    /// Descriptor for a rate-limited pipeline that starts immediately.
    pub fn new(ticks_per_second: u32) -> Self {
        Self {
            ticks_per_second,
            start_immediately: true,
        }
    }

    /// Do not start the worker thread from `new`.
    pub fn paused(mut self) -> Self {
        self.start_immediately = false;
        self
    }
}

/// Stage list plus the bookkeeping that lets hooks edit it mid-tick.
///
/// While a tick runs, the executing stages are taken out of the list so
/// the lock is free for `add_stage`/`clear_stages` (including calls made
/// from a stage's own hooks). Stages added during a tick take effect on
/// the next one; a clear issued during a tick drops the executing stages
/// instead of being resurrected by the re-install.
#[derive(Default)]
struct StageList {
    stages: Vec<RenderStage>,
    in_tick: bool,
    cleared: bool,
}

/// State shared between the pipeline handle and its worker thread.
struct PipelineShared {
    instance: Arc<RenderInstance>,
    buffer: Arc<CommandBuffer>,
    stages: Mutex<StageList>,
    running: AtomicBool,
    ticks: AtomicU64,
    rate: AtomicU32,
}

impl PipelineShared {
    /// Record one tick's worth of commands.
    fn run_tick(&self) {
        // Another pipeline may have activated a different window since
        // our last tick.
        self.buffer.reset_active_window();

        let mut stages = {
            let mut list = self.stages.lock();
            list.in_tick = true;
            std::mem::take(&mut list.stages)
        };
        let mut rec = self.buffer.begin();

        for (index, stage) in stages.iter_mut().enumerate() {
            if stage.targets().iter().any(|t| !t.is_alive()) {
                log::warn!("RenderPipeline: stage {} references a dead target, skipping", index);
                continue;
            }

            if let Some(hook) = stage.before.as_mut() {
                hook();
            }
            self.translate(&mut rec, index, &stage.kind);
            if let Some(hook) = stage.after.as_mut() {
                hook();
            }
        }
        // Close the bracket, then re-install the executing stages ahead
        // of anything added while the tick ran.
        drop(rec);

        let mut list = self.stages.lock();
        list.in_tick = false;
        if list.cleared {
            list.cleared = false;
        } else {
            let added = std::mem::take(&mut list.stages);
            list.stages = stages;
            list.stages.extend(added);
        }
    }

    /// Emit a make-current command unless this window's context already is.
    fn ensure_window_current(&self, rec: &mut Recording<'_>, window: &RenderTarget) {
        if self.buffer.active_window() == Some(window.id()) {
            return;
        }
        self.buffer.set_active_window(Some(window.id()));
        let window = window.clone();
        rec.add(cmd::MAKE_CURRENT, move |b| b.window_make_current(&window));
    }

    /// Translate one stage into commands.
    fn translate(&self, rec: &mut Recording<'_>, index: usize, kind: &StageKind) {
        match kind {
            StageKind::None => {}
            StageKind::Clear { target, color } => {
                if target.is_window() {
                    self.ensure_window_current(rec, target);
                }
                let target = target.clone();
                let color = *color;
                rec.add(cmd::CLEAR, move |b| b.clear_target(&target, color));
            }
            StageKind::ResizeTarget {
                target,
                width,
                height,
            } => {
                if target.is_window() {
                    self.ensure_window_current(rec, target);
                }
                target.set_size(*width, *height);
                let target = target.clone();
                let (width, height) = (*width, *height);
                rec.add(cmd::RESIZE, move |b| b.resize_target(&target, width, height));
            }
            StageKind::CopyTarget {
                source,
                destination,
            } => {
                let source = source.clone();
                let destination = destination.clone();
                rec.add(cmd::COPY, move |b| b.copy_target(&source, &destination));
            }
            StageKind::CopyToWindow { source, window } => {
                self.ensure_window_current(rec, window);
                let source = source.clone();
                let window = window.clone();
                rec.add(cmd::COPY, move |b| b.copy_target(&source, &window));
            }
            StageKind::CopyFromWindow {
                window,
                destination,
            } => {
                self.ensure_window_current(rec, window);
                let window = window.clone();
                let destination = destination.clone();
                rec.add(cmd::COPY, move |b| b.copy_target(&window, &destination));
            }
            StageKind::SwapWindow { window } => {
                self.ensure_window_current(rec, window);
                let window = window.clone();
                rec.add(cmd::SWAP, move |b| b.window_swap(&window));
            }
            StageKind::RenderWorld { scene, camera } => {
                let target = camera.target();
                if !target.is_alive() {
                    log::warn!(
                        "RenderPipeline: stage {} camera target is dead, skipping",
                        index
                    );
                    return;
                }
                if target.is_window() {
                    self.ensure_window_current(rec, &target);
                }

                // Material state is applied once per batch; per-object
                // variation reduces to a transform index.
                for batch in batch_by_material(&scene.renderables()) {
                    let material = batch.material;
                    rec.add(cmd::MATERIAL, move |b| b.apply_material(&material));
                    for (mesh, transform_index) in batch.draws {
                        rec.add(cmd::DRAW, move |b| b.draw(&mesh, transform_index));
                    }
                }
            }
            StageKind::Compute { .. } | StageKind::Overlay { .. } => {
                rec.add(cmd::STAGE, move |b| b.execute_stage(index));
            }
        }
    }

    /// Worker thread body.
    fn run(&self) {
        log::trace!("RenderPipeline: thread started");
        let mut limiter = FrameLimiter::new(self.rate.load(Ordering::Relaxed));

        while self.running.load(Ordering::Relaxed) {
            limiter.begin_tick();

            self.run_tick();

            // Bounded wait so a stop request is honored even when the
            // device thread has stopped draining.
            while self.running.load(Ordering::Relaxed) && !self.buffer.wait_drained(DRAIN_POLL) {}

            self.ticks.fetch_add(1, Ordering::Relaxed);
            limiter.wait();
        }
        log::trace!("RenderPipeline: thread stopped");
    }
}

/// A threaded, rate-limited command producer.
///
/// Dropping the pipeline stops and joins the worker thread.
pub struct RenderPipeline {
    shared: Arc<PipelineShared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl RenderPipeline {
    /// Create a pipeline with its own command buffer.
    pub fn new(instance: Arc<RenderInstance>, descriptor: &PipelineDescriptor) -> Self {
        let buffer = instance.create_command_buffer();
        let pipeline = Self {
            shared: Arc::new(PipelineShared {
                instance,
                buffer,
                stages: Mutex::new(StageList::default()),
                running: AtomicBool::new(false),
                ticks: AtomicU64::new(0),
                rate: AtomicU32::new(descriptor.ticks_per_second),
            }),
            thread: Mutex::new(None),
        };
        if descriptor.start_immediately {
            pipeline.start();
        }
        pipeline
    }

    /// The instance this pipeline records against.
    pub fn instance(&self) -> &Arc<RenderInstance> {
        &self.shared.instance
    }

    /// The pipeline's command buffer.
    pub fn command_buffer(&self) -> &Arc<CommandBuffer> {
        &self.shared.buffer
    }

    /// Append a stage. Takes effect on the next tick. Safe to call from
    /// a stage hook.
    pub fn add_stage(&self, stage: RenderStage) -> usize {
        let mut list = self.shared.stages.lock();
        list.stages.push(stage);
        list.stages.len() - 1
    }

    /// Number of registered stages. Excludes stages currently executing
    /// a tick.
    pub fn stage_count(&self) -> usize {
        self.shared.stages.lock().stages.len()
    }

    /// Remove all stages. Takes effect on the next tick. From a stage
    /// hook this also drops the stages of the tick in progress.
    pub fn clear_stages(&self) {
        let mut list = self.shared.stages.lock();
        list.stages.clear();
        if list.in_tick {
            list.cleared = true;
        }
    }

    /// Change the tick rate; 0 means unlimited. Takes effect on the next
    /// start.
    pub fn set_rate(&self, ticks_per_second: u32) {
        self.shared.rate.store(ticks_per_second, Ordering::Relaxed);
    }

    /// Start the worker thread. No-op if already running.
    pub fn start(&self) {
        if self.shared.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let shared = self.shared.clone();
        let spawned = std::thread::Builder::new()
            .name("render-pipeline".into())
            .spawn(move || shared.run());
        match spawned {
            Ok(handle) => *self.thread.lock() = Some(handle),
            Err(e) => {
                log::error!("RenderPipeline: failed to spawn thread: {}", e);
                self.shared.running.store(false, Ordering::SeqCst);
            }
        }
    }

    /// Stop and join the worker thread. Idempotent; safe to call again
    /// after the thread is gone.
    pub fn stop(&self) {
        self.shared.running.store(false, Ordering::SeqCst);
        let handle = self.thread.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.join() {
                log::error!("RenderPipeline: worker thread panicked: {:?}", e);
            }
        }
    }

    /// True while the worker thread runs.
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Relaxed)
    }

    /// Completed ticks since creation.
    pub fn tick_count(&self) -> u64 {
        self.shared.ticks.load(Ordering::Relaxed)
    }
}

impl Drop for RenderPipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for RenderPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderPipeline")
            .field("running", &self.is_running())
            .field("ticks", &self.tick_count())
            .field("stages", &self.stage_count())
            .finish()
    }
}

// Ensure RenderPipeline is Send + Sync
static_assertions::assert_impl_all!(RenderPipeline: Send, Sync);
