//! # Load Address Range

use crate::elf::parser::ElfImage;
use kernel_info::memory::{PAGE_SIZE, page_align_down};

/// The half-open span `[first, last)` covered by all `PT_LOAD` segments.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct LoadAddressRange {
    pub first: u64,
    pub last: u64,
}

impl LoadAddressRange {
    /// The fold's starting point, and the result for an image without `PT_LOAD` entries.
    pub const EMPTY: Self = Self {
        first: u64::MAX,
        last: 0,
    };

    /// `true` if the range covers no memory. Such a range must not be reserved.
    #[must_use]
    pub const fn is_degenerate(&self) -> bool {
        self.last <= self.first
    }

    /// Lowest page boundary at or below `first`.
    #[must_use]
    pub const fn page_base(&self) -> u64 {
        page_align_down(self.first)
    }

    /// Number of pages from [`page_base`](Self::page_base) up to `last`.
    #[must_use]
    pub const fn page_count(&self) -> u64 {
        if self.is_degenerate() {
            return 0;
        }
        self.last.div_ceil(PAGE_SIZE) - self.first / PAGE_SIZE
    }
}

/// Fold the minimum start and maximum end of every `PT_LOAD` segment.
///
/// Segment ends saturate at `u64::MAX` rather than wrapping.
#[must_use]
pub fn load_address_range(elf: &ElfImage<'_>) -> LoadAddressRange {
    elf.load_segments()
        .fold(LoadAddressRange::EMPTY, |range, segment| LoadAddressRange {
            first: range.first.min(segment.vaddr),
            last: range.last.max(segment.end()),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_range_is_degenerate() {
        assert!(LoadAddressRange::EMPTY.is_degenerate());
        assert_eq!(LoadAddressRange::EMPTY.page_count(), 0);
    }

    #[test]
    fn pages_cover_the_span_from_an_aligned_base() {
        let range = LoadAddressRange {
            first: 0x1000,
            last: 0x2030,
        };
        assert!(!range.is_degenerate());
        assert_eq!(range.page_base(), 0x1000);
        assert_eq!(range.page_count(), 2);

        let unaligned = LoadAddressRange {
            first: 0x1ff0,
            last: 0x2010,
        };
        assert_eq!(unaligned.page_base(), 0x1000);
        assert_eq!(unaligned.page_count(), 2);

        let exact = LoadAddressRange {
            first: 0x10_0000,
            last: 0x10_1000,
        };
        assert_eq!(exact.page_count(), 1);

        let top = LoadAddressRange {
            first: u64::MAX - 0x10,
            last: u64::MAX,
        };
        assert_eq!(top.page_count(), 1);
    }
}
