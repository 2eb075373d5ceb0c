use uefi::boot::{self, ScopedProtocol};
use uefi::proto::media::file::{Directory, File, FileAttribute, FileInfo, FileMode, RegularFile};
use uefi::proto::media::fs::SimpleFileSystem;
use uefi::{CStr16, Status};
use uefi_boot::volume::{BootVolume, OpenMode, VolumeFile};

/// The root directory of the volume this image was loaded from.
pub struct UefiVolume {
    _fs: ScopedProtocol<SimpleFileSystem>,
    root: Directory,
}

impl UefiVolume {
    /// Open the boot volume of the running image.
    ///
    /// # Errors
    /// Returns a [`Status`] in case of error.
    pub fn open_boot_volume() -> Result<Self, Status> {
        let mut fs = boot::get_image_file_system(boot::image_handle()).map_err(|e| e.status())?;
        let root = fs.open_volume().map_err(|e| e.status())?;
        Ok(Self { _fs: fs, root })
    }
}

impl BootVolume for UefiVolume {
    type File = UefiFile;

    fn open(&mut self, path: &CStr16, mode: OpenMode) -> Result<UefiFile, Status> {
        let mode = match mode {
            OpenMode::Read => FileMode::Read,
            OpenMode::CreateReadWrite => FileMode::CreateReadWrite,
        };
        let handle = self
            .root
            .open(path, mode, FileAttribute::empty())
            .map_err(|e| e.status())?;

        // Directories are not files.
        handle
            .into_regular_file()
            .map(UefiFile)
            .ok_or(Status::INVALID_PARAMETER)
    }
}

/// A regular file; closed when dropped.
pub struct UefiFile(RegularFile);

impl VolumeFile for UefiFile {
    fn size(&mut self) -> Result<u64, Status> {
        let info = self
            .0
            .get_boxed_info::<FileInfo>()
            .map_err(|e| e.status())?;
        Ok(info.file_size())
    }

    fn read(&mut self, buffer: &mut [u8]) -> Result<usize, Status> {
        self.0.read(buffer).map_err(|e| e.status())
    }

    fn write(&mut self, data: &[u8]) -> Result<(), Status> {
        self.0.write(data).map_err(|e| e.status())
    }
}
