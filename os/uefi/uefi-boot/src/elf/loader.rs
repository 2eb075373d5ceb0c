//! # ELF Segment Loader
//!
//! Reserves the physical pages behind the image's load range and copies every
//! `PT_LOAD` segment into them. The kernel is linked at its physical address, so
//! a segment's `p_vaddr` is also where its bytes go.

use crate::elf::parser::{ElfImage, SegmentDescriptor};
use crate::elf::range::LoadAddressRange;
use crate::firmware::MemoryServices;
use core::fmt;
use core::ptr::NonNull;
use kernel_info::memory::PAGE_SIZE;
use log::{debug, info};
use uefi::Status;

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum MaterializeError {
    #[error("The load range covers no memory")]
    EmptyRange,
    #[error("The load range does not fit into the address space")]
    AddressOutOfBounds,
    #[error("Failed to reserve {pages} pages at {address:#x}: {status:?}")]
    Allocation {
        address: u64,
        pages: u64,
        status: Status,
    },
    #[error("Segment {index}: in-memory size {memsz:#x} is smaller than the file size {filesz:#x}")]
    SegmentSizeMismatch { index: usize, filesz: u64, memsz: u64 },
    #[error("Segment {index}: file range {offset:#x}+{filesz:#x} lies outside the image")]
    SegmentOutOfFile { index: usize, offset: u64, filesz: u64 },
    #[error("Segment {index}: memory range {vaddr:#x}+{memsz:#x} lies outside the reservation")]
    SegmentOutOfRange { index: usize, vaddr: u64, memsz: u64 },
}

impl From<MaterializeError> for Status {
    fn from(value: MaterializeError) -> Self {
        match value {
            MaterializeError::Allocation { status, .. } => status,
            MaterializeError::EmptyRange | MaterializeError::AddressOutOfBounds => {
                Self::INVALID_PARAMETER
            }
            MaterializeError::SegmentSizeMismatch { .. }
            | MaterializeError::SegmentOutOfFile { .. }
            | MaterializeError::SegmentOutOfRange { .. } => Self::BAD_BUFFER_SIZE,
        }
    }
}

/// Loader-data pages reserved at an exact physical address.
///
/// Owned by the loader until [`Handoff::enter`](crate::handoff::Handoff::enter)
/// consumes it. Never returned to the firmware.
pub struct PhysicalAllocation {
    address: u64,
    pages: u64,
    len: usize,
    region: NonNull<u8>,
}

impl PhysicalAllocation {
    /// Reserve the pages covering `range`, starting at its page-aligned base.
    ///
    /// # Errors
    /// [`MaterializeError::Allocation`] if the firmware refuses the range. There is
    /// no fallback address: the image is not position independent.
    pub fn reserve<F>(firmware: &mut F, range: &LoadAddressRange) -> Result<Self, MaterializeError>
    where
        F: MemoryServices + ?Sized,
    {
        if range.is_degenerate() {
            return Err(MaterializeError::EmptyRange);
        }

        let address = range.page_base();
        let pages = range.page_count();
        let count = usize::try_from(pages).map_err(|_| MaterializeError::AddressOutOfBounds)?;
        let len = pages
            .checked_mul(PAGE_SIZE)
            .and_then(|bytes| usize::try_from(bytes).ok())
            .ok_or(MaterializeError::AddressOutOfBounds)?;

        let region = firmware
            .allocate_pages_at(address, count)
            .map_err(|status| MaterializeError::Allocation {
                address,
                pages,
                status,
            })?;

        info!("Reserved {pages} pages at {address:#x} for the kernel image");
        Ok(Self {
            address,
            pages,
            len,
            region,
        })
    }

    /// Physical address of the first reserved byte.
    #[must_use]
    pub const fn address(&self) -> u64 {
        self.address
    }

    #[must_use]
    pub const fn pages(&self) -> u64 {
        self.pages
    }

    /// Size of the reservation in bytes.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// `true` if `[address, address + len)` lies inside the reservation.
    #[must_use]
    pub fn contains(&self, address: u64, len: u64) -> bool {
        self.window(address, len).is_some()
    }

    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: `region` points to `len()` bytes handed out exclusively by `reserve`.
        unsafe { core::slice::from_raw_parts(self.region.as_ptr(), self.len) }
    }

    #[must_use]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: as above, and `&mut self` guarantees unique access.
        unsafe { core::slice::from_raw_parts_mut(self.region.as_ptr(), self.len) }
    }

    /// Byte offsets of `[address, address + len)` within the reservation.
    fn window(&self, address: u64, len: u64) -> Option<core::ops::Range<usize>> {
        let start = address.checked_sub(self.address)?;
        let end = start.checked_add(len)?;
        let (start, end) = (usize::try_from(start).ok()?, usize::try_from(end).ok()?);
        (end <= self.len).then_some(start..end)
    }
}

impl fmt::Debug for PhysicalAllocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PhysicalAllocation")
            .field("address", &format_args!("{:#x}", self.address))
            .field("pages", &self.pages)
            .finish_non_exhaustive()
    }
}

/// Copy every `PT_LOAD` segment of `elf` into `allocation`, in table order.
///
/// Each segment gets `filesz` bytes from the file followed by `memsz - filesz`
/// zero bytes. Segments that overlap overwrite each other; the later entry wins.
/// Returns the number of segments written.
///
/// # Errors
/// The first segment that is inconsistent or does not fit. Segments before it
/// have already been written.
pub fn materialize_segments(
    elf: &ElfImage<'_>,
    allocation: &mut PhysicalAllocation,
) -> Result<usize, MaterializeError> {
    let file = elf.bytes();
    let mut loaded = 0;

    for (index, segment) in elf.load_segments().enumerate() {
        let SegmentDescriptor {
            vaddr,
            offset,
            filesz,
            memsz,
            flags,
        } = segment;

        if memsz < filesz {
            return Err(MaterializeError::SegmentSizeMismatch {
                index,
                filesz,
                memsz,
            });
        }

        let source = source_range(file.len(), offset, filesz).ok_or(
            MaterializeError::SegmentOutOfFile {
                index,
                offset,
                filesz,
            },
        )?;
        let destination = allocation.window(vaddr, memsz).ok_or(
            MaterializeError::SegmentOutOfRange {
                index,
                vaddr,
                memsz,
            },
        )?;

        let [r, w, x] = flags.symbols();
        debug!(
            "Segment {index}: {r}{w}{x} vaddr={vaddr:#x} offset={offset:#x} filesz={filesz:#x} memsz={memsz:#x}"
        );

        let target = &mut allocation.as_mut_slice()[destination];
        let (payload, tail) = target.split_at_mut(source.len());
        payload.copy_from_slice(&file[source]);
        tail.fill(0);
        loaded += 1;
    }

    Ok(loaded)
}

fn source_range(file_len: usize, offset: u64, filesz: u64) -> Option<core::ops::Range<usize>> {
    // Pure BSS: nothing is read, so the offset is irrelevant.
    if filesz == 0 {
        return Some(0..0);
    }
    let start = usize::try_from(offset).ok()?;
    let end = start.checked_add(usize::try_from(filesz).ok()?)?;
    (end <= file_len).then_some(start..end)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firmware::MemoryMapMeta;

    struct Pages {
        backing: Vec<u8>,
        requests: Vec<(u64, usize)>,
        refuse: Option<Status>,
    }

    impl Pages {
        fn new(bytes: usize) -> Self {
            Self {
                backing: vec![0xCC; bytes],
                requests: Vec::new(),
                refuse: None,
            }
        }
    }

    impl MemoryServices for Pages {
        fn memory_map(&mut self, _buffer: &mut [u8]) -> Result<MemoryMapMeta, Status> {
            Err(Status::UNSUPPORTED)
        }

        fn allocate_pages_at(&mut self, address: u64, pages: usize) -> Result<NonNull<u8>, Status> {
            self.requests.push((address, pages));
            if let Some(status) = self.refuse {
                return Err(status);
            }
            assert!(pages * 4096 <= self.backing.len());
            Ok(NonNull::new(self.backing.as_mut_ptr()).unwrap())
        }
    }

    #[test]
    fn reserves_exactly_the_page_rounded_range() {
        let mut fw = Pages::new(0x3000);
        let range = LoadAddressRange {
            first: 0x1000,
            last: 0x2030,
        };
        let allocation = PhysicalAllocation::reserve(&mut fw, &range).unwrap();
        assert_eq!(allocation.address(), 0x1000);
        assert_eq!(allocation.pages(), 2);
        assert_eq!(allocation.len(), 0x2000);
        assert!(allocation.contains(0x1000, 0x2000));
        assert!(allocation.contains(0x2ff0, 0x10));
        assert!(!allocation.contains(0x2ff0, 0x11));
        assert!(!allocation.contains(0xfff, 1));
        assert_eq!(fw.requests, [(0x1000, 2)]);
    }

    #[test]
    fn allocation_failure_has_no_fallback() {
        let mut fw = Pages::new(0x1000);
        fw.refuse = Some(Status::NOT_FOUND);
        let range = LoadAddressRange {
            first: 0x10_0000,
            last: 0x10_0800,
        };
        let err = PhysicalAllocation::reserve(&mut fw, &range).unwrap_err();
        assert_eq!(
            err,
            MaterializeError::Allocation {
                address: 0x10_0000,
                pages: 1,
                status: Status::NOT_FOUND
            }
        );
        assert_eq!(Status::from(err), Status::NOT_FOUND);
        assert_eq!(fw.requests.len(), 1);
    }

    #[test]
    fn degenerate_range_is_never_reserved() {
        let mut fw = Pages::new(0x1000);
        let err = PhysicalAllocation::reserve(&mut fw, &LoadAddressRange::EMPTY).unwrap_err();
        assert_eq!(err, MaterializeError::EmptyRange);
        assert!(fw.requests.is_empty());
    }

    #[test]
    fn source_ranges_are_bounds_checked() {
        assert_eq!(source_range(0x100, 0x10, 0x20), Some(0x10..0x30));
        assert_eq!(source_range(0x100, 0xf0, 0x10), Some(0xf0..0x100));
        assert_eq!(source_range(0x100, 0xf0, 0x11), None);
        assert_eq!(source_range(0x100, u64::MAX, 1), None);
        assert_eq!(source_range(0x100, 0x1_0000, 0), Some(0..0));
        assert_eq!(source_range(0x100, u64::MAX, 0), Some(0..0));
    }
}
