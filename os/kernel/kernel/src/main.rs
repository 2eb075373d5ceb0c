//! # Kernel Entry Point
//!
//! The loader copies this image to [`KERNEL_BASE`](kernel_info::memory::KERNEL_BASE),
//! leaves boot services and calls [`kernel_main`] with the framebuffer base and size.
//! The kernel runs on the firmware's identity mapping and the loader's stack.

#![no_std]
#![no_main]
#![allow(unsafe_code)]

use kernel_info::boot::FramebufferEntryFn;
#[cfg(feature = "qemu")]
use kernel_qemu::qemu_trace;

#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    #[cfg(feature = "qemu")]
    qemu_trace!("Kernel panic\n");
    halt()
}

// The loader calls through this signature.
const _: FramebufferEntryFn = kernel_main;

/// The kernel entry point.
///
/// # UEFI Interaction
/// The UEFI loader calls this after `ExitBootServices`; no firmware service is
/// available anymore.
///
/// # ABI
/// `sysv64`: `frame_buffer_base` arrives in `RDI`, `frame_buffer_size` in `RSI`.
#[unsafe(no_mangle)]
#[allow(clippy::cast_possible_truncation)]
pub extern "sysv64" fn kernel_main(frame_buffer_base: u64, frame_buffer_size: u64) -> ! {
    #[cfg(feature = "qemu")]
    qemu_trace!(
        "Kernel reporting to QEMU! Frame Buffer: {frame_buffer_base:#x}, Size: {frame_buffer_size} bytes\n"
    );

    let len = frame_buffer_size as usize;
    let frame_buffer = frame_buffer_base as *mut u8;
    for i in 0..len {
        // SAFETY: the loader passes the linear framebuffer reported by GOP, and
        // the firmware's identity mapping is still in place.
        unsafe {
            frame_buffer.add(i).write_volatile((i % 256) as u8);
        }
    }

    #[cfg(feature = "qemu")]
    qemu_trace!("Test pattern written, halting\n");
    halt()
}

fn halt() -> ! {
    loop {
        // SAFETY: `hlt` only waits for the next interrupt.
        unsafe { core::arch::asm!("hlt", options(nomem, nostack, preserves_flags)) };
    }
}
