//! # Strided Tables
//!
//! Firmware and ELF both describe arrays as "base, entry size, entry count",
//! where the entry size on disk or in the buffer may be larger than the struct
//! the consumer knows about. [`StridedTable`] checks that description once and
//! then hands out entries by index, so no caller ever walks a raw pointer.

use core::marker::PhantomData;
use core::mem::size_of;
use core::ptr::read_unaligned;

/// Types that can be read from arbitrary bytes.
///
/// # Safety
/// Implementors must be `#[repr(C)]` (or transparent) and every bit pattern of
/// `size_of::<Self>()` bytes must be a valid value.
pub unsafe trait Plain: Copy {}

/// Validation failures of a table description.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum TableError {
    #[error("entry stride of {stride} bytes is smaller than the {entry}-byte entry type")]
    StrideTooSmall { stride: usize, entry: usize },
    #[error("table of {count} entries at offset {offset} does not fit into {len} bytes")]
    OutOfBounds {
        offset: usize,
        count: usize,
        len: usize,
    },
}

/// A validated, read-only view of `count` entries of type `T`, `stride` bytes apart.
#[derive(Clone, Copy)]
pub struct StridedTable<'a, T> {
    bytes: &'a [u8],
    stride: usize,
    count: usize,
    _entry: PhantomData<T>,
}

impl<'a, T> StridedTable<'a, T>
where
    T: Plain,
{
    /// Describe a table starting `offset` bytes into `bytes`.
    ///
    /// # Errors
    /// [`TableError::StrideTooSmall`] if an entry would overlap the next one,
    /// [`TableError::OutOfBounds`] if the table reaches past `bytes`.
    pub fn new(bytes: &'a [u8], offset: usize, stride: usize, count: usize) -> Result<Self, TableError> {
        let entry = size_of::<T>();
        if stride < entry {
            return Err(TableError::StrideTooSmall { stride, entry });
        }

        let out_of_bounds = TableError::OutOfBounds {
            offset,
            count,
            len: bytes.len(),
        };
        let end = stride
            .checked_mul(count)
            .and_then(|size| offset.checked_add(size))
            .ok_or(out_of_bounds)?;
        if end > bytes.len() {
            return Err(out_of_bounds);
        }

        Ok(Self {
            bytes: &bytes[offset..end],
            stride,
            count,
            _entry: PhantomData,
        })
    }

    /// A table without entries.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            bytes: &[],
            stride: size_of::<T>(),
            count: 0,
            _entry: PhantomData,
        }
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.count
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.count == 0
    }

    #[must_use]
    pub const fn stride(&self) -> usize {
        self.stride
    }

    /// Read entry `index`, or `None` past the end.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<T> {
        (index < self.count).then(|| self.read(index))
    }

    /// Entries in table order.
    pub fn iter(&self) -> impl ExactSizeIterator<Item = T> + '_ {
        (0..self.count).map(move |index| self.read(index))
    }

    fn read(&self, index: usize) -> T {
        let start = index * self.stride;
        let entry = &self.bytes[start..start + size_of::<T>()];
        // SAFETY: `entry` holds exactly size_of::<T>() bytes and T: Plain accepts any bit pattern.
        unsafe { read_unaligned(entry.as_ptr().cast::<T>()) }
    }
}
