//! Deferred command buffers.
//!
//! A [`CommandBuffer`] lets any thread describe device work while
//! guaranteeing the work only executes on the thread that owns the
//! graphics context. Producers record commands inside a
//! [`begin`](CommandBuffer::begin)/end bracket (the returned
//! [`Recording`] guard is the bracket, dropping it is `end()`); the
//! device thread drains the queue with [`play`](CommandBuffer::play).
//!
//! # Ordering
//!
//! Commands recorded within one bracket execute in the order they were
//! added. Brackets from different producer threads are never interleaved
//! mid-bracket: the recording mutex makes recording whole-bracket atomic.
//! Nothing is promised about execution scheduling *across* brackets.
//!
//! # Example
//!
//! ```ignore
//! let buffer = instance.create_command_buffer();
//!
//! // Any thread:
//! {
//!     let mut rec = buffer.begin();
//!     rec.add(0, |backend| backend.execute_stage(0));
//! } // end(): bracket closed, buffer marked filled
//!
//! // Device thread only:
//! buffer.play();
//! ```

use std::collections::VecDeque;
use std::sync::Weak;
use std::time::Duration;

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::backend::RenderBackend;
use crate::instance::RenderInstance;

/// One deferred operation.
///
/// The payload is owned by the closure; whatever it captures is dropped
/// when the command executes (or when the queue is cleared without
/// executing).
pub struct Command {
    id: u64,
    op: Box<dyn FnOnce(&dyn RenderBackend) + Send>,
}

impl Command {
    /// Create a command.
    ///
    /// The `id` identifies the command kind for logging; it carries no
    /// execution semantics.
    pub fn new(id: u64, op: impl FnOnce(&dyn RenderBackend) + Send + 'static) -> Self {
        Self {
            id,
            op: Box::new(op),
        }
    }

    /// Command identifier.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Run the command against a backend, consuming it.
    pub fn execute(self, backend: &dyn RenderBackend) {
        (self.op)(backend);
    }
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Command").field("id", &self.id).finish()
    }
}

/// A thread-safe queue of deferred commands.
///
/// Created by [`RenderInstance::create_command_buffer`], which registers
/// the buffer with the instance's live list so the device thread drains
/// it; handing out `Arc`s from the instance is what makes "create twice"
/// a non-event instead of a lifecycle error.
pub struct CommandBuffer {
    instance: Weak<RenderInstance>,
    /// Recording mutex; also guards the queue during replay.
    queue: Mutex<VecDeque<Command>>,
    /// Set by closing a bracket, cleared by `play`/`clear`. Always
    /// acquired after `queue` when both are held, and only while `queue`
    /// is held when the flag and the queue contents must agree.
    filled: Mutex<bool>,
    /// Signaled whenever `filled` transitions to false.
    drained: Condvar,
    /// Excludes concurrent playback.
    in_play: Mutex<()>,
    /// Window whose context is current, to skip redundant make-current
    /// commands. Reset by the pipeline at the top of each tick.
    active_window: Mutex<Option<u64>>,
}

/// An open recording bracket.
///
/// Holds the recording mutex; commands can only be added through this
/// guard, so recording is whole-bracket atomic by construction. Dropping
/// the guard is `end()`: it releases the mutex and marks the buffer
/// filled.
pub struct Recording<'a> {
    buffer: &'a CommandBuffer,
    queue: Option<MutexGuard<'a, VecDeque<Command>>>,
}

impl Recording<'_> {
    /// Append a command to the bracket.
    pub fn add(&mut self, id: u64, op: impl FnOnce(&dyn RenderBackend) + Send + 'static) {
        self.add_command(Command::new(id, op));
    }

    /// Append an already-built command.
    pub fn add_command(&mut self, command: Command) {
        self.queue
            .as_mut()
            .expect("recording bracket already closed")
            .push_back(command);
    }

    /// Number of commands queued so far (including earlier brackets not
    /// yet played).
    pub fn len(&self) -> usize {
        self.queue.as_ref().map_or(0, |q| q.len())
    }

    /// True if no commands are queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for Recording<'_> {
    fn drop(&mut self) {
        // Mark filled while the queue guard is still held. A concurrent
        // play that already drained the queue must not be able to clear
        // the flag for commands it never saw.
        {
            let mut filled = self.buffer.filled.lock();
            *filled = true;
        }
        drop(self.queue.take());
    }
}

impl CommandBuffer {
    /// Create a new command buffer (called by `RenderInstance`).
    pub(crate) fn new(instance: Weak<RenderInstance>) -> Self {
        Self {
            instance,
            queue: Mutex::new(VecDeque::new()),
            filled: Mutex::new(false),
            drained: Condvar::new(),
            in_play: Mutex::new(()),
            active_window: Mutex::new(None),
        }
    }

    /// Open a recording bracket.
    ///
    /// Blocks if another thread is mid-bracket, and while the device
    /// thread is replaying the queue.
    pub fn begin(&self) -> Recording<'_> {
        Recording {
            buffer: self,
            queue: Some(self.queue.lock()),
        }
    }

    /// Drain and execute all queued commands in FIFO order.
    ///
    /// Intended to run only on the device thread. Playback is exclusive:
    /// a concurrent `play` blocks until this one finishes. After the
    /// queue drains, `filled` is cleared and drain waiters are woken.
    ///
    /// Returns `false` (reported, no-op) if the owning instance is gone.
    pub fn play(&self) -> bool {
        let _exclusive = self.in_play.lock();

        let Some(instance) = self.instance.upgrade() else {
            log::warn!("CommandBuffer: play with no owning instance, skipping");
            return false;
        };

        {
            let mut queue = self.queue.lock();
            instance.backend().replay(&mut queue);
            debug_assert!(queue.is_empty(), "backend replay must drain the queue");

            // Clear while still holding the queue lock; a bracket that
            // closes after this drain marks the buffer filled again and
            // that mark must survive.
            let mut filled = self.filled.lock();
            *filled = false;
            self.drained.notify_all();
        }
        true
    }

    /// Discard all queued commands without executing them.
    ///
    /// Used during teardown; also clears `filled` and wakes waiters.
    pub fn clear(&self) {
        let mut queue = self.queue.lock();
        queue.clear();
        let mut filled = self.filled.lock();
        *filled = false;
        self.drained.notify_all();
    }

    /// True between a closed bracket and the drain that consumes it.
    pub fn is_filled(&self) -> bool {
        *self.filled.lock()
    }

    /// Number of queued commands.
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    /// True if the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    /// Wait until the buffer is no longer filled, up to `timeout`.
    ///
    /// Returns `true` if drained. The wait is bounded so a stopping
    /// pipeline can give up promptly instead of blocking forever on a
    /// device thread that is no longer draining.
    pub fn wait_drained(&self, timeout: Duration) -> bool {
        let mut filled = self.filled.lock();
        if !*filled {
            return true;
        }
        self.drained.wait_for(&mut filled, timeout);
        !*filled
    }

    /// Window whose context the queued commands leave current.
    pub fn active_window(&self) -> Option<u64> {
        *self.active_window.lock()
    }

    /// Record which window's context is current.
    pub fn set_active_window(&self, target: Option<u64>) {
        *self.active_window.lock() = target;
    }

    /// Forget the active window. A window activation may have happened
    /// from another pipeline since the last tick.
    pub fn reset_active_window(&self) {
        *self.active_window.lock() = None;
    }
}

impl Drop for CommandBuffer {
    fn drop(&mut self) {
        let pending = self.queue.get_mut().len();
        if pending > 0 {
            log::trace!("CommandBuffer: dropped with {} unplayed commands", pending);
        }
    }
}

impl std::fmt::Debug for CommandBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandBuffer")
            .field("len", &self.len())
            .field("filled", &self.is_filled())
            .finish()
    }
}

// Ensure CommandBuffer is Send + Sync
static_assertions::assert_impl_all!(CommandBuffer: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendOp, NullBackend};
    use crate::instance::RenderInstance;
    use std::sync::Arc;

    fn test_instance() -> (Arc<RenderInstance>, Arc<NullBackend>) {
        let backend = Arc::new(NullBackend::new());
        (RenderInstance::with_backend(backend.clone()), backend)
    }

    #[test]
    fn test_record_and_play_fifo() {
        let (instance, backend) = test_instance();
        let buffer = instance.create_command_buffer();

        {
            let mut rec = buffer.begin();
            for i in 0..3usize {
                rec.add(i as u64, move |b: &dyn RenderBackend| b.execute_stage(i));
            }
        }

        assert!(buffer.is_filled());
        assert_eq!(buffer.len(), 3);

        assert!(buffer.play());
        assert!(!buffer.is_filled());
        assert!(buffer.is_empty());

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

    #[test]
    fn test_clear_discards_without_executing() {
        let (instance, backend) = test_instance();
        let buffer = instance.create_command_buffer();

        {
            let mut rec = buffer.begin();
            rec.add(0, |b: &dyn RenderBackend| b.execute_stage(9));
        }
        buffer.clear();

        assert!(!buffer.is_filled());
        assert!(buffer.is_empty());
        assert!(backend.operations().is_empty());
    }

    #[test]
    fn test_brackets_are_not_interleaved() {
        let (instance, backend) = test_instance();
        let buffer = instance.create_command_buffer();

        // Two threads each record a full bracket; commands from one
        // bracket must stay contiguous.
        let threads: Vec<_> = [10usize, 20]
            .into_iter()
            .map(|base| {
                let buffer = buffer.clone();
                std::thread::spawn(move || {
                    let mut rec = buffer.begin();
                    for i in 0..5 {
                        let stage = base + i;
                        rec.add(stage as u64, move |b: &dyn RenderBackend| {
                            b.execute_stage(stage)
                        });
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        buffer.play();

        let stages: Vec<_> = backend
            .operations()
            .into_iter()
            .filter_map(|op| match op {
                BackendOp::ExecuteStage { index } => Some(index),
                _ => None,
            })
            .collect();
        assert_eq!(stages.len(), 10);
        let first = stages[0] / 10 * 10;
        let second = if first == 10 { 20 } else { 10 };
        assert_eq!(&stages[..5], &[first, first + 1, first + 2, first + 3, first + 4]);
        assert_eq!(
            &stages[5..],
            &[second, second + 1, second + 2, second + 3, second + 4]
        );
    }

    #[test]
    fn test_wait_drained() {
        let (instance, _backend) = test_instance();
        let buffer = instance.create_command_buffer();

        // Not filled: returns immediately.
        assert!(buffer.wait_drained(Duration::from_millis(1)));

        {
            let mut rec = buffer.begin();
            rec.add(0, |b: &dyn RenderBackend| b.execute_stage(0));
        }
        // Filled and nobody draining: times out.
        assert!(!buffer.wait_drained(Duration::from_millis(5)));

        // Drain from another thread; the waiter wakes.
        let drainer = {
            let buffer = buffer.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(10));
                buffer.play();
            })
        };
        assert!(buffer.wait_drained(Duration::from_secs(2)));
        drainer.join().unwrap();
    }

    #[test]
    fn test_play_without_instance_is_reported_noop() {
        let (instance, _backend) = test_instance();
        let buffer = instance.create_command_buffer();
        drop(instance);
        assert!(!buffer.play());
    }

    #[test]
    fn test_active_window_memo() {
        let (instance, _backend) = test_instance();
        let buffer = instance.create_command_buffer();

        assert_eq!(buffer.active_window(), None);
        buffer.set_active_window(Some(7));
        assert_eq!(buffer.active_window(), Some(7));
        buffer.reset_active_window();
        assert_eq!(buffer.active_window(), None);
    }

    #[test]
    fn test_filled_survives_concurrent_play() {
        let (instance, _backend) = test_instance();
        let buffer = instance.create_command_buffer();

        // One thread closes single-command brackets as fast as it can
        // while this thread plays. Commands left in the queue must always
        // leave the buffer marked filled, or a filled-only drain loop
        // would skip them forever.
        let done = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let producer = {
            let buffer = buffer.clone();
            let done = done.clone();
            std::thread::spawn(move || {
                for _ in 0..10_000 {
                    let mut rec = buffer.begin();
                    rec.add(0, |b: &dyn RenderBackend| b.execute_stage(0));
                }
                done.store(true, std::sync::atomic::Ordering::Release);
            })
        };

        while !done.load(std::sync::atomic::Ordering::Acquire) {
            buffer.play();
            if buffer.len() > 0 {
                assert!(
                    buffer.is_filled(),
                    "queued commands with the filled flag cleared"
                );
            }
        }
        producer.join().unwrap();

        buffer.play();
        assert!(buffer.is_empty());
        assert!(!buffer.is_filled());
    }

    #[test]
    fn test_empty_bracket_still_marks_filled() {
        let (instance, _backend) = test_instance();
        let buffer = instance.create_command_buffer();
        drop(buffer.begin());
        assert!(buffer.is_filled());
        buffer.play();
        assert!(!buffer.is_filled());
    }
}
