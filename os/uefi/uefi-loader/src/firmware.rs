//! # Live Firmware Services
//!
//! `GetMemoryMap` and `ExitBootServices` are called through the raw boot
//! services table: the loader owns the memory map buffer and decides which key
//! to exit with, and the `uefi` crate's safe wrappers do both on their own.

use crate::logger;
use core::ptr::NonNull;
use uefi::boot::{self, AllocateType, MemoryType};
use uefi::{Handle, Status};
use uefi_boot::firmware::{MapKey, MemoryMapMeta, MemoryServices, ShutdownService};

pub struct UefiFirmware {
    image: Handle,
}

impl UefiFirmware {
    #[must_use]
    pub fn new() -> Self {
        Self {
            image: boot::image_handle(),
        }
    }
}

impl Default for UefiFirmware {
    fn default() -> Self {
        Self::new()
    }
}

/// The raw boot services table, if the system table is still reachable.
macro_rules! boot_services {
    () => {{
        let st = uefi::table::system_table_raw().ok_or(Status::UNSUPPORTED)?;
        // SAFETY: the system table pointer was registered by the entry point.
        let bs = unsafe { st.as_ref().boot_services };
        if bs.is_null() {
            return Err(Status::UNSUPPORTED);
        }
        bs
    }};
}

impl MemoryServices for UefiFirmware {
    fn memory_map(&mut self, buffer: &mut [u8]) -> Result<MemoryMapMeta, Status> {
        let bs = boot_services!();

        let mut map_size = buffer.len();
        let mut map_key = 0usize;
        let mut descriptor_size = 0usize;
        let mut descriptor_version = 0u32;

        // SAFETY: all out-pointers are valid; the firmware writes at most `map_size` bytes.
        let status = unsafe {
            ((*bs).get_memory_map)(
                &raw mut map_size,
                buffer.as_mut_ptr().cast(),
                &raw mut map_key,
                &raw mut descriptor_size,
                &raw mut descriptor_version,
            )
        };
        if status.is_error() {
            return Err(status);
        }

        Ok(MemoryMapMeta {
            map_size,
            map_key: MapKey::new(map_key),
            descriptor_size,
            descriptor_version,
        })
    }

    fn allocate_pages_at(&mut self, address: u64, pages: usize) -> Result<NonNull<u8>, Status> {
        boot::allocate_pages(AllocateType::Address(address), MemoryType::LOADER_DATA, pages)
            .map_err(|e| e.status())
    }
}

impl ShutdownService for UefiFirmware {
    fn exit_boot_services(&mut self, key: MapKey) -> Result<(), Status> {
        logger::detach_console();
        let bs = boot_services!();

        // SAFETY: `image` is our own image handle. On success no boot service may be used again.
        let status = unsafe { ((*bs).exit_boot_services)(self.image.as_ptr(), key.as_usize()) };
        if status.is_error() {
            return Err(status);
        }
        Ok(())
    }
}
