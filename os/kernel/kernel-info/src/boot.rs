//! # Kernel Boot Information

/// Entry point of a kernel built for [`BootProtocol::Bare`].
///
/// # ABI
/// `sysv64`, since the kernel is a freestanding ELF and not a PE/COFF image.
pub type BareEntryFn = extern "sysv64" fn() -> !;

/// Entry point of a kernel built for [`BootProtocol::Framebuffer`].
///
/// The loader passes the linear framebuffer's physical base address in `RDI`
/// and its size in bytes in `RSI`.
pub type FramebufferEntryFn =
    extern "sysv64" fn(frame_buffer_base: u64, frame_buffer_size: u64) -> !;

/// Version of the argument contract between loader and kernel.
///
/// The loader cannot inspect what the kernel's entry point expects, so both
/// sides are built against the same version.
#[repr(u32)]
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum BootProtocol {
    /// The entry point takes no arguments.
    Bare = 0,
    /// The entry point takes the framebuffer base and size, see [`FramebufferEntryFn`].
    Framebuffer = 1,
}

impl BootProtocol {
    /// The protocol the loader and kernel in this workspace speak.
    pub const CURRENT: Self = Self::Framebuffer;

    /// Number of 64-bit arguments passed to the entry point.
    #[must_use]
    pub const fn argument_count(self) -> usize {
        match self {
            Self::Bare => 0,
            Self::Framebuffer => 2,
        }
    }
}

/// Linear framebuffer as reported by GOP for the current mode.
#[repr(C)]
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct FramebufferInfo {
    /// Linear framebuffer base address (CPU physical address). Valid to write after `ExitBootServices`.
    pub framebuffer_ptr: u64,

    /// Total framebuffer size in **bytes**.
    pub framebuffer_size: u64,

    /// Visible width in **pixels**.
    pub framebuffer_width: u64,

    /// Visible height in **pixels**.
    pub framebuffer_height: u64,

    /// Pixels per scanline. May be >= width due to padding.
    pub framebuffer_stride: u64,

    /// Pixel format tag.
    pub framebuffer_format: BootPixelFormat,
}

/// Pixel format tag compatible with UEFI GOP.
#[repr(u32)]
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum BootPixelFormat {
    /// 8:8:8 stored as R,G,B in low-to-high bytes.
    Rgb = 0,
    /// 8:8:8 stored as B,G,R in low-to-high bytes.
    Bgr = 1,
    /// Channel layout given by bit masks.
    Bitmask = 2,
    /// No linear framebuffer available.
    BltOnly = 3,
}

impl BootPixelFormat {
    /// Whether the kernel can write pixels directly to the framebuffer.
    #[must_use]
    pub const fn is_linear(self) -> bool {
        !matches!(self, Self::BltOnly)
    }
}
