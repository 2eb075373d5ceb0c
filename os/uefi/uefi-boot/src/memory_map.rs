//! # UEFI Memory Map Snapshot
//!
//! The loader captures the firmware memory map into a buffer it owns for the
//! whole boot attempt. The buffer is sized once and never grown: if the map
//! does not fit, acquisition fails and the boot attempt ends.

use crate::firmware::{MapKey, MemoryMapMeta, MemoryServices};
use crate::table::{Plain, StridedTable, TableError};
use core::mem::size_of;
use log::debug;
use uefi::Status;

/// Capacity of the default memory map buffer (four pages).
pub const DEFAULT_CAPACITY: usize = 4 * 4096;

/// One `EFI_MEMORY_DESCRIPTOR`, as laid out by the firmware.
#[repr(C)]
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct MemoryDescriptor {
    pub memory_type: u32,
    _pad: u32,
    pub physical_start: u64,
    pub virtual_start: u64,
    pub number_of_pages: u64,
    pub attribute: u64,
}

// SAFETY: plain integers only.
unsafe impl Plain for MemoryDescriptor {}

impl MemoryDescriptor {
    #[must_use]
    pub const fn new(memory_type: u32, physical_start: u64, number_of_pages: u64, attribute: u64) -> Self {
        Self {
            memory_type,
            _pad: 0,
            physical_start,
            virtual_start: 0,
            number_of_pages,
            attribute,
        }
    }

    /// Symbolic UEFI name of [`Self::memory_type`].
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        memory_type_name(self.memory_type)
    }
}

/// Map a raw `EFI_MEMORY_TYPE` to its UEFI name.
#[must_use]
pub const fn memory_type_name(memory_type: u32) -> &'static str {
    match memory_type {
        0 => "EfiReservedMemoryType",
        1 => "EfiLoaderCode",
        2 => "EfiLoaderData",
        3 => "EfiBootServicesCode",
        4 => "EfiBootServicesData",
        5 => "EfiRuntimeServicesCode",
        6 => "EfiRuntimeServicesData",
        7 => "EfiConventionalMemory",
        8 => "EfiUnusableMemory",
        9 => "EfiACPIReclaimMemory",
        10 => "EfiACPIMemoryNVS",
        11 => "EfiMemoryMappedIO",
        12 => "EfiMemoryMappedIOPortSpace",
        13 => "EfiPalCode",
        14 => "EfiPersistentMemory",
        15 => "EfiMaxMemoryType",
        _ => "InvalidMemoryType",
    }
}

/// Fixed, 8-byte aligned backing store for a [`MemoryMapSnapshot`].
#[repr(C, align(8))]
pub struct MemoryMapStorage<const N: usize = DEFAULT_CAPACITY>([u8; N]);

impl MemoryMapStorage {
    /// Storage of [`DEFAULT_CAPACITY`] bytes.
    #[must_use]
    pub const fn new() -> Self {
        Self::zeroed()
    }
}

impl<const N: usize> MemoryMapStorage<N> {
    #[must_use]
    pub const fn zeroed() -> Self {
        Self([0; N])
    }

    pub const fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.0
    }
}

impl Default for MemoryMapStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum MemoryMapError {
    #[error("The memory map does not fit into the {capacity}-byte buffer")]
    BufferTooSmall { capacity: usize },
    #[error("The firmware failed to report the memory map: {0:?}")]
    Firmware(Status),
    #[error("The firmware reported an inconsistent memory map")]
    Malformed(#[from] TableError),
}

impl MemoryMapError {
    /// The firmware status equivalent of this error.
    #[must_use]
    pub const fn status(self) -> Status {
        match self {
            Self::BufferTooSmall { .. } => Status::BUFFER_TOO_SMALL,
            Self::Firmware(status) => status,
            Self::Malformed(_) => Status::ABORTED,
        }
    }
}

/// The firmware memory map as of the last successful [`acquire`](Self::acquire).
pub struct MemoryMapSnapshot<'buf> {
    buffer: &'buf mut [u8],
    map_size: usize,
    map_key: MapKey,
    descriptor_size: usize,
    descriptor_version: u32,
}

impl<'buf> MemoryMapSnapshot<'buf> {
    /// An empty snapshot over `buffer`. Nothing is captured until [`acquire`](Self::acquire).
    pub fn new(buffer: &'buf mut [u8]) -> Self {
        Self {
            buffer,
            map_size: 0,
            map_key: MapKey::default(),
            descriptor_size: size_of::<MemoryDescriptor>(),
            descriptor_version: 0,
        }
    }

    /// Fill the buffer with the current memory map.
    ///
    /// Calling this again refreshes the snapshot and usually changes the map key.
    ///
    /// # Errors
    /// * [`MemoryMapError::BufferTooSmall`] for an empty buffer (checked before
    ///   the firmware is asked) or when the firmware reports the map does not fit.
    ///   Retrying with the same buffer will not help.
    /// * [`MemoryMapError::Firmware`] for any other firmware failure.
    /// * [`MemoryMapError::Malformed`] if the reported sizes contradict each other.
    ///
    /// On error the previously captured scalars are unchanged. The buffer may
    /// already hold the firmware's new bytes if the reply was malformed.
    pub fn acquire<F>(&mut self, firmware: &mut F) -> Result<(), MemoryMapError>
    where
        F: MemoryServices + ?Sized,
    {
        let capacity = self.buffer.len();
        if capacity == 0 {
            return Err(MemoryMapError::BufferTooSmall { capacity });
        }

        let meta = match firmware.memory_map(self.buffer) {
            Ok(meta) => meta,
            Err(status) if status == Status::BUFFER_TOO_SMALL => {
                return Err(MemoryMapError::BufferTooSmall { capacity });
            }
            Err(status) => return Err(MemoryMapError::Firmware(status)),
        };

        // Validate before committing so a bogus reply leaves the old scalars in place.
        let count = Self::descriptor_count(&meta);
        StridedTable::<MemoryDescriptor>::new(&self.buffer[..], 0, meta.descriptor_size, count)?;

        self.map_size = meta.map_size;
        self.map_key = meta.map_key;
        self.descriptor_size = meta.descriptor_size;
        self.descriptor_version = meta.descriptor_version;

        debug!(
            "Memory map captured: {} descriptors, {} bytes, {:?}",
            count, meta.map_size, meta.map_key
        );
        Ok(())
    }

    const fn descriptor_count(meta: &MemoryMapMeta) -> usize {
        if meta.descriptor_size == 0 {
            // Forces a StrideTooSmall rejection rather than a division by zero.
            return 0;
        }
        meta.map_size / meta.descriptor_size
    }

    /// Capacity of the backing buffer in bytes.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.buffer.len()
    }

    #[must_use]
    pub const fn map_size(&self) -> usize {
        self.map_size
    }

    #[must_use]
    pub const fn map_key(&self) -> MapKey {
        self.map_key
    }

    #[must_use]
    pub const fn descriptor_size(&self) -> usize {
        self.descriptor_size
    }

    #[must_use]
    pub const fn descriptor_version(&self) -> u32 {
        self.descriptor_version
    }

    /// Address of the backing buffer, for diagnostics.
    #[must_use]
    pub fn buffer_address(&self) -> usize {
        self.buffer.as_ptr() as usize
    }

    /// Captured descriptors in firmware order.
    #[must_use]
    pub fn descriptors(&self) -> StridedTable<'_, MemoryDescriptor> {
        let count = self.map_size / self.descriptor_size;
        // Geometry was validated in `acquire`.
        StridedTable::new(&self.buffer[..], 0, self.descriptor_size, count)
            .unwrap_or_else(|_| StridedTable::empty())
    }
}
