//! # GOP for the Kernel

use kernel_info::boot::{BootPixelFormat, FramebufferInfo};
use log::info;
use uefi::Status;
use uefi::boot::{self, OpenProtocolAttributes, OpenProtocolParams, ScopedProtocol};
use uefi::proto::console::gop::{GraphicsOutput, PixelFormat};

/// Describe the framebuffer of the current GOP mode. The mode is left as the firmware set it.
///
/// # Errors
/// The status of the failed protocol lookup.
pub fn query_framebuffer() -> Result<FramebufferInfo, Status> {
    let mut gop = get_gop()?;

    let mode = gop.current_mode_info();
    let (width, height) = mode.resolution();
    let framebuffer_format = match mode.pixel_format() {
        PixelFormat::Rgb => BootPixelFormat::Rgb,
        PixelFormat::Bgr => BootPixelFormat::Bgr,
        PixelFormat::Bitmask => BootPixelFormat::Bitmask,
        PixelFormat::BltOnly => BootPixelFormat::BltOnly,
    };
    let stride = mode.stride();

    let mut fb = gop.frame_buffer();
    let info = FramebufferInfo {
        framebuffer_ptr: fb.as_mut_ptr() as u64,
        framebuffer_size: fb.size() as u64,
        framebuffer_width: width as u64,
        framebuffer_height: height as u64,
        framebuffer_stride: stride as u64,
        framebuffer_format,
    };

    info!(
        "Resolution: {width}x{height}, Pixel Format: {framebuffer_format:?}, {stride} pixels/line"
    );
    info!(
        "Frame Buffer: {:#x} - {:#x}, Size: {} bytes",
        info.framebuffer_ptr,
        info.framebuffer_ptr + info.framebuffer_size,
        info.framebuffer_size
    );
    Ok(info)
}

/// Paint the whole framebuffer white, so a working display is visible before the kernel runs.
pub fn fill_framebuffer(info: &FramebufferInfo) {
    if !info.framebuffer_format.is_linear() {
        return;
    }

    #[allow(clippy::cast_possible_truncation)]
    let len = info.framebuffer_size as usize;
    // SAFETY: GOP reported this range as the linear framebuffer of the current mode.
    let pixels = unsafe { core::slice::from_raw_parts_mut(info.framebuffer_ptr as *mut u8, len) };
    pixels.fill(0xff);
}

/// Fetch the Graphics Output Protocol (GOP).
///
/// Opened non-exclusively: an exclusive open disconnects the console driver, which
/// the logger still writes to.
fn get_gop() -> Result<ScopedProtocol<GraphicsOutput>, Status> {
    let handle = boot::get_handle_for_protocol::<GraphicsOutput>().map_err(|e| e.status())?;

    // SAFETY: the protocol is only read and the framebuffer written while the scope is alive.
    unsafe {
        boot::open_protocol::<GraphicsOutput>(
            OpenProtocolParams {
                handle,
                agent: boot::image_handle(),
                controller: None,
            },
            OpenProtocolAttributes::GetProtocol,
        )
    }
    .map_err(|e| e.status())
}
