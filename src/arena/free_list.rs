//! Free region tracking for the arena allocator.
//!
//! The free list is an ordered set of byte ranges with two invariants:
//! entries never overlap, and no two entries are adjacent (adjacent
//! regions are always coalesced on insert). First-fit allocation and
//! coalescing release are deliberately explicit here; the policy is part
//! of the allocator's observable contract.

use super::ArenaPointer;

/// Ordered, non-overlapping, non-adjacent set of free byte ranges.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FreeList {
    /// Regions sorted by ascending offset.
    regions: Vec<ArenaPointer>,
}

impl FreeList {
    /// Create an empty free list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a free list covering a single range `{0, size}`.
    ///
    /// An arena of size 0 starts with no free regions.
    pub fn with_size(size: u64) -> Self {
        let regions = if size == 0 {
            Vec::new()
        } else {
            vec![ArenaPointer::new(0, size)]
        };
        Self { regions }
    }

    /// All free regions in ascending offset order.
    pub fn regions(&self) -> &[ArenaPointer] {
        &self.regions
    }

    /// Number of free regions.
    pub fn len(&self) -> usize {
        self.regions.len()
    }

    /// True if there are no free regions.
    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// The highest-offset free region, if any.
    pub fn last(&self) -> Option<ArenaPointer> {
        self.regions.last().copied()
    }

    /// Total free bytes across all regions.
    pub fn total_free(&self) -> u64 {
        self.regions.iter().map(|r| r.size).sum()
    }

    /// Take `size` bytes from the first region that fits (first-fit).
    ///
    /// An exact match removes the region; a larger region is shrunk from
    /// its front. Returns the offset of the carved range, or `None` if no
    /// region is large enough. `size` must be non-zero.
    pub fn take_first_fit(&mut self, size: u64) -> Option<u64> {
        debug_assert!(size > 0, "first-fit of zero bytes");

        let index = self.regions.iter().position(|r| r.size >= size)?;
        let region = self.regions[index];

        if region.size == size {
            self.regions.remove(index);
        } else {
            self.regions[index] = ArenaPointer::new(region.offset + size, region.size - size);
        }

        Some(region.offset)
    }

    /// Remove the highest-offset region entirely.
    ///
    /// Used by the grow path when the tail region is extended in place.
    pub fn take_last(&mut self) -> Option<ArenaPointer> {
        self.regions.pop()
    }

    /// Return a range to the free list.
    ///
    /// Rejects (returns `false`) any range that overlaps an existing free
    /// region; this is the double-free / corrupted-pointer defense and
    /// leaves the list untouched. On success the range is coalesced with
    /// the preceding and/or following region so the non-adjacency
    /// invariant holds. Both sides are always checked; a merge on one
    /// side never skips the other.
    pub fn insert(&mut self, ptr: ArenaPointer) -> bool {
        debug_assert!(!ptr.is_null(), "insert of null pointer");

        // Position of the first region at or after the released range.
        let index = self
            .regions
            .partition_point(|r| r.offset < ptr.offset);

        if let Some(prev) = index.checked_sub(1).map(|i| self.regions[i]) {
            if prev.end() > ptr.offset {
                return false;
            }
        }
        if let Some(next) = self.regions.get(index) {
            if ptr.end() > next.offset {
                return false;
            }
        }

        let merge_prev = index
            .checked_sub(1)
            .is_some_and(|i| self.regions[i].end() == ptr.offset);
        let merge_next = self
            .regions
            .get(index)
            .is_some_and(|next| ptr.end() == next.offset);

        match (merge_prev, merge_next) {
            (true, true) => {
                // The released range bridges two regions: fold all three.
                let next = self.regions.remove(index);
                let prev = &mut self.regions[index - 1];
                prev.size += ptr.size + next.size;
            }
            (true, false) => {
                self.regions[index - 1].size += ptr.size;
            }
            (false, true) => {
                let next = &mut self.regions[index];
                next.offset = ptr.offset;
                next.size += ptr.size;
            }
            (false, false) => {
                self.regions.insert(index, ptr);
            }
        }

        true
    }

    /// Check the ordering, overlap, and non-adjacency invariants.
    #[cfg(test)]
    pub fn check_invariants(&self) {
        for pair in self.regions.windows(2) {
            assert!(
                pair[0].end() < pair[1].offset,
                "free regions must be disjoint and non-adjacent: {:?}",
                pair
            );
        }
        for r in &self.regions {
            assert!(r.size > 0, "zero-size free region");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ptr(offset: u64, size: u64) -> ArenaPointer {
        ArenaPointer::new(offset, size)
    }

    #[test]
    fn test_with_size() {
        let list = FreeList::with_size(256);
        assert_eq!(list.regions(), &[ptr(0, 256)]);

        let empty = FreeList::with_size(0);
        assert!(empty.is_empty());
    }

    #[test]
    fn test_first_fit_exact_removes_region() {
        let mut list = FreeList::with_size(64);
        assert_eq!(list.take_first_fit(64), Some(0));
        assert!(list.is_empty());
    }

    #[test]
    fn test_first_fit_shrinks_front() {
        let mut list = FreeList::with_size(256);
        assert_eq!(list.take_first_fit(64), Some(0));
        assert_eq!(list.regions(), &[ptr(64, 192)]);
        list.check_invariants();
    }

    #[test]
    fn test_first_fit_skips_small_regions() {
        let mut list = FreeList::new();
        assert!(list.insert(ptr(0, 16)));
        assert!(list.insert(ptr(64, 128)));

        // 16-byte hole is too small; allocation comes from the second region.
        assert_eq!(list.take_first_fit(32), Some(64));
        assert_eq!(list.regions(), &[ptr(0, 16), ptr(96, 96)]);
    }

    #[test]
    fn test_first_fit_no_fit() {
        let mut list = FreeList::with_size(32);
        assert_eq!(list.take_first_fit(64), None);
        assert_eq!(list.regions(), &[ptr(0, 32)]);
    }

    #[test]
    fn test_insert_coalesces_with_previous() {
        let mut list = FreeList::new();
        assert!(list.insert(ptr(0, 64)));
        assert!(list.insert(ptr(64, 64)));
        assert_eq!(list.regions(), &[ptr(0, 128)]);
        list.check_invariants();
    }

    #[test]
    fn test_insert_coalesces_with_next() {
        let mut list = FreeList::new();
        assert!(list.insert(ptr(64, 64)));
        assert!(list.insert(ptr(0, 64)));
        assert_eq!(list.regions(), &[ptr(0, 128)]);
        list.check_invariants();
    }

    #[test]
    fn test_insert_bridges_both_sides() {
        let mut list = FreeList::new();
        assert!(list.insert(ptr(0, 32)));
        assert!(list.insert(ptr(64, 32)));
        assert_eq!(list.len(), 2);

        // Releasing the middle range folds everything into one region.
        assert!(list.insert(ptr(32, 32)));
        assert_eq!(list.regions(), &[ptr(0, 96)]);
        list.check_invariants();
    }

    #[test]
    fn test_insert_isolated_region() {
        let mut list = FreeList::new();
        assert!(list.insert(ptr(0, 16)));
        assert!(list.insert(ptr(100, 16)));
        assert_eq!(list.regions(), &[ptr(0, 16), ptr(100, 16)]);
        list.check_invariants();
    }

    #[test]
    fn test_insert_rejects_exact_double_free() {
        let mut list = FreeList::new();
        assert!(list.insert(ptr(0, 64)));
        let before = list.clone();

        assert!(!list.insert(ptr(0, 64)));
        assert_eq!(list, before);
    }

    #[test]
    fn test_insert_rejects_partial_overlap() {
        let mut list = FreeList::new();
        assert!(list.insert(ptr(32, 64)));

        assert!(!list.insert(ptr(0, 48))); // overlaps the front
        assert!(!list.insert(ptr(64, 64))); // overlaps the back
        assert!(!list.insert(ptr(40, 8))); // fully contained
        assert_eq!(list.regions(), &[ptr(32, 64)]);
    }

    #[test]
    fn test_total_free() {
        let mut list = FreeList::new();
        assert!(list.insert(ptr(0, 16)));
        assert!(list.insert(ptr(64, 48)));
        assert_eq!(list.total_free(), 64);
    }

    #[test]
    fn test_alloc_release_churn_keeps_invariants() {
        let mut list = FreeList::with_size(1024);
        let mut live = Vec::new();

        // Deterministic churn: allocate a spread of sizes, release
        // every other one, allocate again.
        for size in [64u64, 32, 128, 16, 256, 8] {
            let offset = list.take_first_fit(size).unwrap();
            live.push(ptr(offset, size));
            list.check_invariants();
        }
        for (i, p) in live.clone().into_iter().enumerate() {
            if i % 2 == 0 {
                assert!(list.insert(p));
                list.check_invariants();
            }
        }
        for size in [48u64, 24] {
            let offset = list.take_first_fit(size).unwrap();
            live.push(ptr(offset, size));
            list.check_invariants();
        }
    }
}
