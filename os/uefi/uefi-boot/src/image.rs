//! # Kernel Image Reader

use crate::volume::{BootVolume, OpenMode, VolumeFile};
use alloc::vec::Vec;
use core::fmt;
use log::info;
use uefi::{CStr16, Status};

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum ImageReadError {
    #[error("Failed to open the kernel image: {0:?}")]
    Open(Status),
    #[error("Failed to read the kernel image metadata: {0:?}")]
    Metadata(Status),
    #[error("The kernel image size does not fit into the address space")]
    TooLarge,
    #[error("Failed to allocate {size} bytes for the kernel image")]
    Allocation { size: usize },
    #[error("Failed to read the kernel image: {0:?}")]
    Read(Status),
    #[error("Mismatch in file size: read {read} bytes, expected {expected} bytes")]
    ShortRead { read: usize, expected: usize },
}

impl ImageReadError {
    #[must_use]
    pub const fn status(self) -> Status {
        match self {
            Self::Open(status) | Self::Metadata(status) | Self::Read(status) => status,
            Self::TooLarge => Status::BAD_BUFFER_SIZE,
            Self::Allocation { .. } => Status::OUT_OF_RESOURCES,
            Self::ShortRead { .. } => Status::END_OF_FILE,
        }
    }
}

/// The complete kernel file, owned by the loader until its segments are in place.
///
/// Dropping it returns the buffer to the firmware pool.
pub struct ExecutableImage {
    bytes: Vec<u8>,
}

impl ExecutableImage {
    #[must_use]
    pub const fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl fmt::Debug for ExecutableImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutableImage")
            .field("len", &self.bytes.len())
            .finish_non_exhaustive()
    }
}

/// Read the whole file at `path` into a buffer sized from its metadata.
///
/// # Errors
/// Any failing volume call, [`ImageReadError::Allocation`] if the pool cannot
/// hold the file, or an [`ImageReadError::ShortRead`] if fewer bytes
/// arrive than the metadata promised. There is no partial-read recovery.
pub fn read_image<V>(volume: &mut V, path: &CStr16) -> Result<ExecutableImage, ImageReadError>
where
    V: BootVolume + ?Sized,
{
    let mut file = volume.open(path, OpenMode::Read).map_err(ImageReadError::Open)?;

    let size = file.size().map_err(ImageReadError::Metadata)?;
    let size = usize::try_from(size).map_err(|_| ImageReadError::TooLarge)?;

    let mut bytes: Vec<u8> = Vec::new();
    bytes
        .try_reserve_exact(size)
        .map_err(|_| ImageReadError::Allocation { size })?;
    bytes.resize(size, 0);
    let read = file.read(&mut bytes).map_err(ImageReadError::Read)?;
    if read != size {
        return Err(ImageReadError::ShortRead {
            read,
            expected: size,
        });
    }

    info!("Read {path} ({size} bytes)");
    Ok(ExecutableImage::from_bytes(bytes))
}
