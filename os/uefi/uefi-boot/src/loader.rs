//! # Boot Sequence
//!
//! Runs the loader's steps in order and stops at the first failure:
//!
//! ```text
//! memory map → CSV dump → read kernel → parse ELF → load range
//!   → reserve pages → copy segments → drop image → exit boot services → Handoff
//! ```

use crate::diagnostics::{DiagnosticsError, save_memory_map};
use crate::elf::{
    ElfError, ElfImage, MaterializeError, PhysicalAllocation, load_address_range,
    materialize_segments,
};
use crate::firmware::BootFirmware;
use crate::handoff::{BootArguments, Handoff, HandoffError, KernelEntry, exit_boot_services};
use crate::image::{ImageReadError, read_image};
use crate::memory_map::{MemoryMapError, MemoryMapSnapshot};
use crate::volume::BootVolume;
use kernel_info::boot::BootProtocol;
use log::info;
use uefi::{CStr16, Status, cstr16};

/// Where the loader finds its inputs and what it promises the kernel.
#[derive(Debug, Copy, Clone)]
pub struct LoaderConfig {
    /// Path of the kernel ELF file on the boot volume.
    pub kernel_path: &'static CStr16,
    /// Where to dump the memory map as CSV, if at all.
    pub memory_map_path: Option<&'static CStr16>,
    /// Argument contract of the kernel entry point.
    pub protocol: BootProtocol,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            kernel_path: cstr16!("\\kernel.elf"),
            memory_map_path: Some(cstr16!("\\memmap")),
            protocol: BootProtocol::CURRENT,
        }
    }
}

/// A failed boot step and its cause.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum BootError {
    #[error("get memory map: {0}")]
    MemoryMap(#[source] MemoryMapError),
    #[error("save memory map: {0}")]
    Diagnostics(#[source] DiagnosticsError),
    #[error("read kernel image: {0}")]
    ReadImage(#[source] ImageReadError),
    #[error("parse kernel image: {0}")]
    Parse(#[source] ElfError),
    #[error("reserve kernel pages: {0}")]
    Reserve(#[source] MaterializeError),
    #[error("copy kernel segments: {0}")]
    Materialize(#[source] MaterializeError),
    #[error("prepare kernel entry: {0}")]
    Entry(#[source] HandoffError),
    #[error("exit boot services: {0}")]
    ExitBootServices(#[source] HandoffError),
}

impl From<BootError> for Status {
    fn from(value: BootError) -> Self {
        match value {
            BootError::MemoryMap(e) => e.status(),
            BootError::Diagnostics(e) => e.into(),
            BootError::ReadImage(e) => e.status(),
            BootError::Parse(e) => e.into(),
            BootError::Reserve(e) | BootError::Materialize(e) => e.into(),
            BootError::Entry(e) | BootError::ExitBootServices(e) => e.into(),
        }
    }
}

/// Drives one boot attempt against the given firmware.
pub struct BootLoader<'fw, F>
where
    F: BootFirmware + ?Sized,
{
    firmware: &'fw mut F,
    config: LoaderConfig,
}

impl<'fw, F> BootLoader<'fw, F>
where
    F: BootFirmware + ?Sized,
{
    pub const fn new(firmware: &'fw mut F, config: LoaderConfig) -> Self {
        Self { firmware, config }
    }

    #[must_use]
    pub const fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Load the kernel and leave the firmware.
    ///
    /// `snapshot` holds the memory map buffer for the whole attempt. When this
    /// returns `Ok`, boot services are gone and the only thing left to do is
    /// [`Handoff::enter`].
    ///
    /// # Errors
    /// The first failed step. Only the final `ExitBootServices` call is ever retried.
    pub fn boot<V>(
        &mut self,
        volume: &mut V,
        snapshot: &mut MemoryMapSnapshot<'_>,
        arguments: BootArguments,
    ) -> Result<Handoff, BootError>
    where
        V: BootVolume + ?Sized,
    {
        snapshot
            .acquire(&mut *self.firmware)
            .map_err(BootError::MemoryMap)?;

        if let Some(path) = self.config.memory_map_path {
            save_memory_map(volume, path, snapshot).map_err(BootError::Diagnostics)?;
        }

        let image = read_image(volume, self.config.kernel_path).map_err(BootError::ReadImage)?;
        let (entry, allocation) = {
            let elf = ElfImage::parse(image.as_bytes()).map_err(BootError::Parse)?;

            if elf.load_segments().next().is_none() {
                return Err(BootError::Parse(ElfError::NoLoadSegments));
            }
            let range = load_address_range(&elf);
            if range.is_degenerate() {
                return Err(BootError::Parse(ElfError::EmptyLoadRange));
            }
            info!(
                "Kernel occupies {:#x}..{:#x}, entry at {:#x}",
                range.first,
                range.last,
                elf.entry()
            );

            let mut allocation =
                PhysicalAllocation::reserve(&mut *self.firmware, &range).map_err(BootError::Reserve)?;
            let loaded =
                materialize_segments(&elf, &mut allocation).map_err(BootError::Materialize)?;
            info!("Loaded {loaded} segment(s) of {}", self.config.kernel_path);

            (KernelEntry::from_image(&elf, self.config.protocol), allocation)
        };
        drop(image);

        Handoff::check(&entry, &arguments, &allocation).map_err(BootError::Entry)?;

        let exited =
            exit_boot_services(&mut *self.firmware, snapshot).map_err(BootError::ExitBootServices)?;
        Handoff::new(entry, arguments, allocation, exited).map_err(BootError::Entry)
    }
}
