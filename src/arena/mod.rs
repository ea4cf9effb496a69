//! GPU memory arena.
//!
//! A [`MemoryArena`] is a flat byte range mirrored on the host and lazily
//! materialized on the device through the backend hooks. Application
//! threads carve ranges out of it with [`allocate`](MemoryArena::allocate),
//! write through [`update`](MemoryArena::update), and hand ranges back with
//! [`release`](MemoryArena::release). Dirty tracking records which ranges
//! changed since the last device sync so the backend never re-uploads the
//! whole mirror.
//!
//! # Thread Safety
//!
//! All mutation is guarded by one internal lock, so an arena can be shared
//! freely between worker threads and the device thread. [`MemoryArena::lock`]
//! exposes that lock for callers that must serialize a multi-step sequence
//! (for example reading the mirror while a device sync is pending).
//!
//! # Example
//!
//! ```ignore
//! let arena = instance.create_arena(
//!     &ArenaDescriptor::new(0, ArenaUsage::UNIFORM).with_resize(true),
//! )?;
//!
//! let block = arena.allocate(256);
//! arena.update(block, &data);
//! // ... later ...
//! arena.release(block);
//! ```

mod free_list;

pub use free_list::FreeList;

use std::sync::Arc;

use bitflags::bitflags;
use parking_lot::{Mutex, MutexGuard};

use crate::backend::{BackendArena, RenderBackend};
use crate::error::RenderError;

/// A byte range inside one arena.
///
/// A pointer with `size == 0` is the null pointer. The arena never
/// inspects pointed-to contents, only ranges; ownership of the
/// *allocation* belongs to whichever resource requested it, which must
/// call [`MemoryArena::release`] exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ArenaPointer {
    /// Byte offset into the arena.
    pub offset: u64,
    /// Size of the range in bytes.
    pub size: u64,
}

impl ArenaPointer {
    /// The null pointer.
    pub const NULL: ArenaPointer = ArenaPointer { offset: 0, size: 0 };

    /// Create a new pointer.
    pub fn new(offset: u64, size: u64) -> Self {
        Self { offset, size }
    }

    /// True if this is the null pointer (`size == 0`).
    pub fn is_null(&self) -> bool {
        self.size == 0
    }

    /// End offset (offset + size). Callers validating untrusted pointers
    /// use [`checked_end`](Self::checked_end) instead.
    pub fn end(&self) -> u64 {
        self.offset + self.size
    }

    /// End offset, or `None` when `offset + size` overflows. A pointer
    /// that overflows can never describe a real range and is treated as
    /// out of bounds everywhere.
    pub fn checked_end(&self) -> Option<u64> {
        self.offset.checked_add(self.size)
    }
}

bitflags! {
    /// Usage tag for an arena.
    ///
    /// An empty set means the usage is unknown.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ArenaUsage: u32 {
        /// Device reads the arena contents.
        const READ = 1 << 0;
        /// Device writes the arena contents.
        const WRITE = 1 << 1;
        /// Arena backs uniform blocks.
        const UNIFORM = 1 << 2;
        /// Arena backs vertex data.
        const VERTEX = 1 << 3;
        /// Arena backs index data.
        const INDEX = 1 << 4;
    }
}

/// Descriptor for creating an arena.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct ArenaDescriptor {
    /// Debug label for the arena.
    pub label: Option<String>,
    /// Initial size in bytes. May be 0.
    pub size: u64,
    /// Whether the arena may grow when an allocation does not fit.
    pub allow_resize: bool,
    /// Usage tag.
    pub usage: ArenaUsage,
}

impl ArenaDescriptor {
    /// Create a new descriptor.
    pub fn new(size: u64, usage: ArenaUsage) -> Self {
        Self {
            label: None,
            size,
            allow_resize: false,
            usage,
        }
    }

    /// Set the debug label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Allow or disallow growth.
    pub fn with_resize(mut self, allow: bool) -> Self {
        self.allow_resize = allow;
        self
    }
}

/// State guarded by the arena lock.
#[derive(Debug)]
struct ArenaInner {
    /// Host mirror of the device buffer.
    bytes: Vec<u8>,
    /// Unallocated byte ranges.
    free: FreeList,
    /// Ranges changed since the last device sync. An exact offset/size
    /// pair appears at most once; overlapping-but-different ranges are
    /// tracked independently.
    dirty: Vec<ArenaPointer>,
    /// Backend handle, created lazily on first bind.
    handle: Option<BackendArena>,
}

impl ArenaInner {
    /// Grow the host mirror to `new_size`, zero-filling the new tail.
    ///
    /// Fails without modifying state if the host allocation fails.
    fn grow(&mut self, new_size: u64) -> Result<(), RenderError> {
        debug_assert!(new_size >= self.bytes.len() as u64);

        let additional = (new_size as usize) - self.bytes.len();
        self.bytes
            .try_reserve_exact(additional)
            .map_err(|e| RenderError::HostAllocationFailed(e.to_string()))?;
        self.bytes.resize(new_size as usize, 0);
        Ok(())
    }
}

/// A byte-range allocator over a single logical device buffer.
///
/// Created by [`RenderInstance::create_arena`](crate::instance::RenderInstance::create_arena).
/// Allocation is first-fit over the free list; release coalesces adjacent
/// free regions and rejects double frees. Growth (when enabled) extends
/// the tail free region in place where possible.
pub struct MemoryArena {
    label: Option<String>,
    usage: ArenaUsage,
    allow_resize: bool,
    backend: Arc<dyn RenderBackend>,
    inner: Mutex<ArenaInner>,
}

/// RAII guard over an arena's state.
///
/// While held, no other thread can allocate, release, update, or resize
/// the arena. Dropping the guard unlocks.
pub struct ArenaGuard<'a> {
    inner: MutexGuard<'a, ArenaInner>,
}

impl ArenaGuard<'_> {
    /// The host mirror bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.inner.bytes
    }

    /// Copy the bytes of a range out of the mirror.
    ///
    /// Returns `None` for a null or out-of-range pointer.
    pub fn read(&self, ptr: ArenaPointer) -> Option<Vec<u8>> {
        let end = ptr.checked_end()?;
        if ptr.is_null() || end > self.inner.bytes.len() as u64 {
            return None;
        }
        Some(self.inner.bytes[ptr.offset as usize..end as usize].to_vec())
    }
}

impl MemoryArena {
    /// Create a new arena (called by `RenderInstance`).
    ///
    /// Allocates the host mirror immediately. The backend handle is not
    /// created until the first [`bind`](Self::bind).
    pub(crate) fn new(
        descriptor: &ArenaDescriptor,
        backend: Arc<dyn RenderBackend>,
    ) -> Result<Self, RenderError> {
        let mut bytes = Vec::new();
        bytes
            .try_reserve_exact(descriptor.size as usize)
            .map_err(|e| RenderError::HostAllocationFailed(e.to_string()))?;
        bytes.resize(descriptor.size as usize, 0);

        log::trace!(
            "MemoryArena: created {:?}, size={}, resize={}",
            descriptor.label,
            descriptor.size,
            descriptor.allow_resize
        );

        Ok(Self {
            label: descriptor.label.clone(),
            usage: descriptor.usage,
            allow_resize: descriptor.allow_resize,
            backend,
            inner: Mutex::new(ArenaInner {
                bytes,
                free: FreeList::with_size(descriptor.size),
                dirty: Vec::new(),
                handle: None,
            }),
        })
    }

    /// Debug label, if set.
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// Usage tag.
    pub fn usage(&self) -> ArenaUsage {
        self.usage
    }

    /// Whether the arena may grow.
    pub fn allow_resize(&self) -> bool {
        self.allow_resize
    }

    /// Current total size in bytes.
    pub fn size(&self) -> u64 {
        self.inner.lock().bytes.len() as u64
    }

    /// Snapshot of the free regions (ascending offset order).
    pub fn free_regions(&self) -> Vec<ArenaPointer> {
        self.inner.lock().free.regions().to_vec()
    }

    /// Acquire the arena lock.
    ///
    /// Blocks while any other mutation or device sync holds it.
    pub fn lock(&self) -> ArenaGuard<'_> {
        ArenaGuard {
            inner: self.inner.lock(),
        }
    }

    /// Allocate `size` bytes.
    ///
    /// Scans the free list in ascending offset order and carves the first
    /// region that fits. When nothing fits and growth is allowed, the
    /// arena grows by exactly the bytes needed: the tail free region is
    /// extended in place when it touches the arena end, otherwise a fresh
    /// range is appended at the old end.
    ///
    /// Returns the null pointer on failure (exhaustion with growth
    /// disallowed, or host allocation failure while growing); the failure
    /// is reported, never fatal.
    pub fn allocate(&self, size: u64) -> ArenaPointer {
        if size == 0 {
            return ArenaPointer::NULL;
        }

        let mut inner = self.inner.lock();

        if let Some(offset) = inner.free.take_first_fit(size) {
            return ArenaPointer::new(offset, size);
        }

        if !self.allow_resize {
            log::error!(
                "MemoryArena {:?}: allocation of {} bytes failed, arena is full and resize is disallowed",
                self.label,
                size
            );
            return ArenaPointer::NULL;
        }

        let old_size = inner.bytes.len() as u64;

        // Tail free region touching the arena end grows in place.
        let tail = inner
            .free
            .last()
            .filter(|last| last.end() == old_size);

        let (ptr, new_size) = match tail {
            Some(last) => (
                ArenaPointer::new(last.offset, size),
                last.offset + size,
            ),
            None => (ArenaPointer::new(old_size, size), old_size + size),
        };

        if let Err(e) = inner.grow(new_size) {
            log::error!(
                "MemoryArena {:?}: grow to {} bytes failed: {}",
                self.label,
                new_size,
                e
            );
            return ArenaPointer::NULL;
        }
        if tail.is_some() {
            inner.free.take_last();
        }

        if let Some(handle) = &inner.handle {
            self.backend.arena_resized(handle, new_size);
        }

        log::trace!(
            "MemoryArena {:?}: grew {} -> {} for allocation {:?}",
            self.label,
            old_size,
            new_size,
            ptr
        );

        ptr
    }

    /// Release a previously allocated range.
    ///
    /// Returns `false` (and leaves the free list untouched) if the range
    /// is null, out of bounds, or overlaps any already-free region, so
    /// double frees never corrupt the free list. On success the range is
    /// coalesced with its free neighbors.
    pub fn release(&self, ptr: ArenaPointer) -> bool {
        if ptr.is_null() {
            log::warn!("MemoryArena {:?}: release of null pointer", self.label);
            return false;
        }

        let mut inner = self.inner.lock();

        if ptr
            .checked_end()
            .map_or(true, |end| end > inner.bytes.len() as u64)
        {
            log::error!(
                "MemoryArena {:?}: release of out-of-range pointer {:?}",
                self.label,
                ptr
            );
            return false;
        }

        if !inner.free.insert(ptr) {
            log::error!(
                "MemoryArena {:?}: release of {:?} overlaps a free region (double free?)",
                self.label,
                ptr
            );
            return false;
        }

        true
    }

    /// Copy `data` into the host mirror at `ptr` and mark the range dirty.
    ///
    /// `data.len()` must equal `ptr.size`. The range is appended to the
    /// dirty list (and the backend sync hook invoked) only when an
    /// identical range is not already pending, so repeated updates to the
    /// same range between syncs cost one device trip.
    ///
    /// Returns `false` for a null pointer, an out-of-range pointer, or a
    /// length mismatch.
    pub fn update(&self, ptr: ArenaPointer, data: &[u8]) -> bool {
        if ptr.is_null() {
            log::warn!("MemoryArena {:?}: update through null pointer", self.label);
            return false;
        }
        if data.len() as u64 != ptr.size {
            log::error!(
                "MemoryArena {:?}: update length {} does not match pointer size {}",
                self.label,
                data.len(),
                ptr.size
            );
            return false;
        }

        let mut inner = self.inner.lock();

        let Some(end) = ptr.checked_end().filter(|e| *e <= inner.bytes.len() as u64) else {
            log::error!(
                "MemoryArena {:?}: update through out-of-range pointer {:?}",
                self.label,
                ptr
            );
            return false;
        };

        inner.bytes[ptr.offset as usize..end as usize].copy_from_slice(data);

        if !inner.dirty.contains(&ptr) {
            inner.dirty.push(ptr);
            if let Some(handle) = &inner.handle {
                self.backend.arena_contents_changed(handle, ptr);
            }
        }

        true
    }

    /// Copy the bytes of a range out of the host mirror.
    ///
    /// Returns `None` for a null or out-of-range pointer.
    pub fn read(&self, ptr: ArenaPointer) -> Option<Vec<u8>> {
        self.lock().read(ptr)
    }

    /// Drain the dirty list.
    ///
    /// The device sync consumes this: each returned range must be
    /// re-uploaded from the mirror.
    pub fn take_dirty(&self) -> Vec<ArenaPointer> {
        std::mem::take(&mut self.inner.lock().dirty)
    }

    /// Number of pending dirty ranges.
    pub fn dirty_len(&self) -> usize {
        self.inner.lock().dirty.len()
    }

    /// Grow the arena to `new_size` bytes.
    ///
    /// Growth-only: a smaller size is rejected (`false`), an equal size is
    /// a no-op (`true`). The freed tail `{old_size, new_size - old_size}`
    /// becomes available for allocation. Fails without modifying state if
    /// the host allocation fails.
    pub fn resize(&self, new_size: u64) -> bool {
        let mut inner = self.inner.lock();
        let old_size = inner.bytes.len() as u64;

        if new_size < old_size {
            log::warn!(
                "MemoryArena {:?}: shrink {} -> {} rejected, arenas only grow",
                self.label,
                old_size,
                new_size
            );
            return false;
        }
        if new_size == old_size {
            return true;
        }

        if let Err(e) = inner.grow(new_size) {
            log::error!(
                "MemoryArena {:?}: resize to {} failed: {}",
                self.label,
                new_size,
                e
            );
            return false;
        }

        let freed = ArenaPointer::new(old_size, new_size - old_size);
        let inserted = inner.free.insert(freed);
        debug_assert!(inserted, "new tail cannot overlap existing free regions");

        if let Some(handle) = &inner.handle {
            self.backend.arena_resized(handle, new_size);
        }

        log::trace!(
            "MemoryArena {:?}: resized {} -> {}",
            self.label,
            old_size,
            new_size
        );

        true
    }

    /// Bind the arena for device use.
    ///
    /// Materializes the backend handle on first call, then invokes the
    /// backend bind hook. Returns `false` if the backend refuses to
    /// create the handle; the failure is reported and the arena stays
    /// usable host-side.
    pub fn bind(&self) -> bool {
        let mut inner = self.inner.lock();

        if inner.handle.is_none() {
            let descriptor = ArenaDescriptor {
                label: self.label.clone(),
                size: inner.bytes.len() as u64,
                allow_resize: self.allow_resize,
                usage: self.usage,
            };
            match self.backend.create_arena(&descriptor) {
                Ok(handle) => inner.handle = Some(handle),
                Err(e) => {
                    log::error!(
                        "MemoryArena {:?}: backend arena creation failed: {}",
                        self.label,
                        e
                    );
                    return false;
                }
            }
        }

        if let Some(handle) = &inner.handle {
            self.backend.bind_arena(handle);
        }
        true
    }

    /// True if the backend handle has been materialized.
    pub fn is_bound(&self) -> bool {
        self.inner.lock().handle.is_some()
    }
}

impl Drop for MemoryArena {
    fn drop(&mut self) {
        // Acquire the lock so an in-flight device sync reading the mirror
        // has either completed or is sequenced after.
        let inner = self.inner.lock();

        let size = inner.bytes.len() as u64;
        let pristine = if size == 0 {
            inner.free.is_empty()
        } else {
            inner.free.regions() == [ArenaPointer::new(0, size)]
        };
        if !pristine {
            log::warn!(
                "MemoryArena {:?}: destroyed with outstanding allocations ({} free regions, {} of {} bytes free)",
                self.label,
                inner.free.len(),
                inner.free.total_free(),
                size
            );
        }

        if let Some(handle) = &inner.handle {
            self.backend.destroy_arena(handle);
        }
    }
}

impl std::fmt::Debug for MemoryArena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("MemoryArena")
            .field("label", &self.label)
            .field("size", &inner.bytes.len())
            .field("usage", &self.usage)
            .field("allow_resize", &self.allow_resize)
            .field("free_regions", &inner.free.len())
            .field("dirty", &inner.dirty.len())
            .finish()
    }
}

// Ensure MemoryArena is Send + Sync
static_assertions::assert_impl_all!(MemoryArena: Send, Sync);
