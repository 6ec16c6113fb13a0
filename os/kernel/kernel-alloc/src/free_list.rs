//! Address-ordered free ranges with first-fit allocation.
//!
//! Bookkeeping lives outside the managed memory, so the ranges may describe
//! memory this code never touches (the kernel heap window of another
//! address space, or memory not yet mapped at all).

use alloc::collections::BTreeMap;
use kernel_memory_addresses::checked_align_up;

/// A set of disjoint free byte ranges, keyed by start address.
///
/// # Invariants
/// - Ranges never overlap and never touch: adjacent ranges are coalesced on
///   insertion.
/// - Every stored range has a non-zero length.
#[derive(Debug, Default)]
pub struct FreeRanges {
    /// `start → len`.
    ranges: BTreeMap<u32, u32>,
}

impl FreeRanges {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ranges: BTreeMap::new(),
        }
    }

    /// Add `[start, start + len)` to the free set, merging with neighbors.
    ///
    /// # Panics
    /// If the range overlaps one already free (a double free slipped past the
    /// caller's bookkeeping).
    pub fn insert(&mut self, start: u32, len: u32) {
        if len == 0 {
            return;
        }
        let mut start = start;
        let mut end = start + len;

        if let Some((&prev_start, &prev_len)) = self.ranges.range(..=start).next_back() {
            let prev_end = prev_start + prev_len;
            assert!(prev_end <= start, "free range {start:#x} overlaps {prev_start:#x}");
            if prev_end == start {
                self.ranges.remove(&prev_start);
                start = prev_start;
            }
        }
        if let Some((&next_start, &next_len)) = self.ranges.range(start..).next() {
            assert!(end <= next_start, "free range {start:#x} overlaps {next_start:#x}");
            if next_start == end {
                self.ranges.remove(&next_start);
                end = next_start + next_len;
            }
        }
        self.ranges.insert(start, end - start);
    }

    /// Carve `size` bytes aligned to `align` (a power of two) out of the
    /// lowest range that can hold them.
    ///
    /// The head and tail left over around the allocation stay free.
    pub fn take_first_fit(&mut self, size: u32, align: u32) -> Option<u32> {
        debug_assert!(align.is_power_of_two());
        let (region_start, region_len, alloc_start) =
            self.ranges.iter().find_map(|(&start, &len)| {
                let alloc_start = checked_align_up(start, align)?;
                let alloc_end = alloc_start.checked_add(size)?;
                (alloc_end <= start + len).then_some((start, len, alloc_start))
            })?;

        self.ranges.remove(&region_start);
        let head = alloc_start - region_start;
        let tail = (region_start + region_len) - (alloc_start + size);
        if head > 0 {
            self.ranges.insert(region_start, head);
        }
        if tail > 0 {
            self.ranges.insert(alloc_start + size, tail);
        }
        Some(alloc_start)
    }

    /// Total free bytes.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.ranges.values().map(|&len| u64::from(len)).sum()
    }

    /// Number of disjoint free ranges.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Iterate over `(start, len)` in address order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.ranges.iter().map(|(&s, &l)| (s, l))
    }
}
