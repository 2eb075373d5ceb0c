//! # Boot Volume Access
//!
//! File access on the volume the loader was started from. Files close when dropped.

use uefi::{CStr16, Status};

/// How a file on the boot volume is opened.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum OpenMode {
    /// Existing file, read only.
    Read,
    /// Read and write, creating the file if it does not exist.
    CreateReadWrite,
}

/// The root directory of the boot volume.
pub trait BootVolume {
    type File: VolumeFile;

    /// Open `path`, relative to the volume root.
    ///
    /// # Errors
    /// The firmware status, e.g. [`Status::NOT_FOUND`].
    fn open(&mut self, path: &CStr16, mode: OpenMode) -> Result<Self::File, Status>;
}

/// A regular file on the boot volume.
pub trait VolumeFile {
    /// File size in bytes, from the file's metadata.
    ///
    /// # Errors
    /// The firmware status if the metadata cannot be read.
    fn size(&mut self) -> Result<u64, Status>;

    /// Read from the current position; returns the number of bytes read.
    ///
    /// # Errors
    /// The firmware status of the failed read.
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize, Status>;

    /// Write all of `data` at the current position.
    ///
    /// # Errors
    /// The firmware status of the failed write.
    fn write(&mut self, data: &[u8]) -> Result<(), Status>;
}
