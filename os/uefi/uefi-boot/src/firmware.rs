//! # Firmware Service Context
//!
//! The loader never reaches for a global boot services table. Every step that
//! needs the firmware receives it as an explicit `&mut impl BootFirmware`, which
//! is a live UEFI binding in the loader binary and a scripted mock in tests.

use core::fmt;
use core::ptr::NonNull;
use uefi::Status;

/// Opaque token identifying one revision of the firmware memory map.
///
/// The firmware changes it whenever its memory layout changes; `ExitBootServices`
/// only succeeds with the key of the current revision.
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Hash)]
pub struct MapKey(usize);

impl MapKey {
    #[must_use]
    pub const fn new(raw: usize) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0
    }
}

impl fmt::Debug for MapKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MapKey({:#x})", self.0)
    }
}

/// The scalars `GetMemoryMap` reports alongside the descriptor array.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct MemoryMapMeta {
    /// Bytes of the caller buffer occupied by descriptors.
    pub map_size: usize,
    /// Key of the map revision just written.
    pub map_key: MapKey,
    /// Distance between two descriptors; may exceed the descriptor struct size.
    pub descriptor_size: usize,
    /// Descriptor format version.
    pub descriptor_version: u32,
}

/// Memory services consumed by the loader.
pub trait MemoryServices {
    /// Write the current memory map into `buffer`.
    ///
    /// # Errors
    /// [`Status::BUFFER_TOO_SMALL`] if the map does not fit; `buffer` is left untouched.
    /// Any other firmware status is passed through.
    fn memory_map(&mut self, buffer: &mut [u8]) -> Result<MemoryMapMeta, Status>;

    /// Reserve `pages` 4 KiB pages of loader data at exactly `address`.
    ///
    /// Returns the pointer through which the loader writes the region; on UEFI
    /// this is identity mapped and equal to `address`.
    ///
    /// # Errors
    /// The firmware status if the range is unavailable. There is no fallback address.
    fn allocate_pages_at(&mut self, address: u64, pages: usize) -> Result<NonNull<u8>, Status>;
}

/// The firmware shutdown service.
pub trait ShutdownService {
    /// Leave the firmware-managed environment.
    ///
    /// After this returns `Ok`, no firmware service may be called anymore.
    ///
    /// # Errors
    /// [`Status::INVALID_PARAMETER`] if `key` does not match the current map.
    fn exit_boot_services(&mut self, key: MapKey) -> Result<(), Status>;
}

/// Everything the boot sequence needs from the firmware.
pub trait BootFirmware: MemoryServices + ShutdownService {}

impl<T> BootFirmware for T where T: MemoryServices + ShutdownService {}
