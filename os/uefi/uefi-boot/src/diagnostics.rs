//! # Memory Map Dump
//!
//! Writes the captured memory map to the boot volume as CSV, one line per
//! descriptor in firmware order:
//!
//! ```text
//! Index, Type, Type(name), PhysicalStart, NumberOfPages, Attribute
//! 0, 3, EfiBootServicesCode, 00000000, 1, f
//! 1, 7, EfiConventionalMemory, 00001000, 9f, f
//! ```
//!
//! Numbers other than the index are hexadecimal without prefix. Only the low
//! 20 attribute bits (the cacheability and protection flags) are printed.

use crate::memory_map::{MemoryDescriptor, MemoryMapSnapshot};
use crate::volume::{BootVolume, OpenMode, VolumeFile};
use alloc::string::String;
use core::fmt::Write;
use log::info;
use uefi::{CStr16, Status};

pub const CSV_HEADER: &str = "Index, Type, Type(name), PhysicalStart, NumberOfPages, Attribute\n";

const ATTRIBUTE_MASK: u64 = 0xf_ffff;

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum DiagnosticsError {
    #[error("Failed to open the memory map file: {0:?}")]
    Open(Status),
    #[error("Failed to write the memory map file: {0:?}")]
    Write(Status),
}

impl From<DiagnosticsError> for Status {
    fn from(value: DiagnosticsError) -> Self {
        match value {
            DiagnosticsError::Open(status) | DiagnosticsError::Write(status) => status,
        }
    }
}

/// Append one CSV line for `descriptor` to `line`.
pub fn format_descriptor(line: &mut String, index: usize, descriptor: &MemoryDescriptor) {
    // Writing into a String cannot fail.
    let _ = writeln!(
        line,
        "{index}, {:x}, {}, {:08x}, {:x}, {:x}",
        descriptor.memory_type,
        descriptor.type_name(),
        descriptor.physical_start,
        descriptor.number_of_pages,
        descriptor.attribute & ATTRIBUTE_MASK,
    );
}

/// Write the CSV header and one line per descriptor of `snapshot` to `file`.
///
/// Returns the number of descriptor lines written.
///
/// # Errors
/// [`DiagnosticsError::Write`] with the status of the first failing write.
pub fn write_memory_map_csv<W>(snapshot: &MemoryMapSnapshot<'_>, file: &mut W) -> Result<usize, DiagnosticsError>
where
    W: VolumeFile + ?Sized,
{
    info!(
        "map buffer = {:#010x}, map size = {:#010x}",
        snapshot.buffer_address(),
        snapshot.map_size()
    );

    file.write(CSV_HEADER.as_bytes())
        .map_err(DiagnosticsError::Write)?;

    let mut line = String::with_capacity(96);
    let descriptors = snapshot.descriptors();
    for (index, descriptor) in descriptors.iter().enumerate() {
        line.clear();
        format_descriptor(&mut line, index, &descriptor);
        file.write(line.as_bytes()).map_err(DiagnosticsError::Write)?;
    }

    Ok(descriptors.len())
}

/// Create (or open) `path` on `volume` and dump `snapshot` into it.
///
/// # Errors
/// [`DiagnosticsError::Open`] if the file cannot be opened, otherwise as
/// [`write_memory_map_csv`].
pub fn save_memory_map<V>(
    volume: &mut V,
    path: &CStr16,
    snapshot: &MemoryMapSnapshot<'_>,
) -> Result<usize, DiagnosticsError>
where
    V: BootVolume + ?Sized,
{
    let mut file = volume
        .open(path, OpenMode::CreateReadWrite)
        .map_err(DiagnosticsError::Open)?;
    let lines = write_memory_map_csv(snapshot, &mut file)?;
    info!("Memory map ({lines} entries) written to {path}");
    Ok(lines)
}
