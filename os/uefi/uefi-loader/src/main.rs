//! # UEFI Loader for an Identity-Placed x86-64 Kernel
//!
//! This UEFI application reads `\kernel.elf` from the volume it was started
//! from, copies its `PT_LOAD` segments to their link addresses, leaves the
//! firmware and calls the kernel with the framebuffer base and size.
//!
//! ## Boot Process
//!
//! ```text
//! UEFI Firmware Boot
//!         ↓
//! ┌─────────────────────────────────────────────┐
//! │              UEFI Loader                    │
//! ├─────────────────────────────────────────────┤
//! │  1. Environment Setup                       │
//! │     • Logger (QEMU debugcon + UEFI console) │
//! │     • Pool-backed global allocator          │
//! │  2. Graphics                                │
//! │     • Query the current GOP mode            │
//! │     • Paint the framebuffer white           │
//! │  3. Kernel Loading (uefi-boot)              │
//! │     • Memory map → \memmap (CSV)            │
//! │     • Read and validate kernel.elf          │
//! │     • Reserve pages at the link address     │
//! │     • Copy segments, zero BSS               │
//! │  4. Exit Boot Services                      │
//! │     • Console mirror off                    │
//! │     • Exit with map key, retry once         │
//! │  5. Kernel Handoff                          │
//! │     • kernel_main(fb_base, fb_size)         │
//! └─────────────────────────────────────────────┘
//!         ↓
//! Kernel Execution
//! ```
//!
//! There is no paging setup: UEFI identity maps memory and the kernel is linked
//! at [`KERNEL_BASE`](kernel_info::memory::KERNEL_BASE), so the kernel runs on
//! the firmware's page tables and the loader's stack.
//!
//! ## Error Handling
//!
//! Every failure is logged once with the failed step and the firmware status,
//! then the CPU halts. There is no cleanup and no return to the firmware.
//!
//! ## Development and Debugging
//!
//! All log output also goes to QEMU's debug console (`-debugcon`), which keeps
//! working after boot services are gone.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![no_main]
#![allow(unsafe_code)]
extern crate alloc;

mod file_system;
mod firmware;
mod framebuffer;
mod logger;
mod memory;

use crate::file_system::UefiVolume;
use crate::firmware::UefiFirmware;
use crate::framebuffer::{fill_framebuffer, query_framebuffer};
use crate::logger::UefiLogger;
use log::{LevelFilter, error, info};
use uefi::prelude::*;
use uefi_boot::handoff::BootArguments;
use uefi_boot::loader::{BootLoader, LoaderConfig};
use uefi_boot::memory_map::{MemoryMapSnapshot, MemoryMapStorage};

#[entry]
fn efi_main() -> Status {
    // Initialize logging and allocator helpers
    if uefi::helpers::init().is_err() {
        return Status::UNSUPPORTED;
    }

    if UefiLogger::new(LevelFilter::Debug).init().is_err() {
        return Status::ABORTED;
    }

    info!("UEFI Loader reporting to QEMU");

    let framebuffer = match query_framebuffer() {
        Ok(fb) => fb,
        Err(status) => {
            error!("Failed to query the framebuffer: {status:?}");
            halt();
        }
    };
    fill_framebuffer(&framebuffer);

    let mut volume = match UefiVolume::open_boot_volume() {
        Ok(volume) => volume,
        Err(status) => {
            error!("Failed to open the boot volume: {status:?}");
            halt();
        }
    };

    let mut firmware = UefiFirmware::new();
    let mut storage = MemoryMapStorage::new();
    let mut snapshot = MemoryMapSnapshot::new(storage.as_mut_slice());
    let config = LoaderConfig::default();

    let handoff = match BootLoader::new(&mut firmware, config).boot(
        &mut volume,
        &mut snapshot,
        BootArguments::framebuffer(&framebuffer),
    ) {
        Ok(handoff) => handoff,
        Err(e) => {
            error!("Boot failed: {e} ({:?})", Status::from(e));
            halt();
        }
    };

    // Off we pop.
    // SAFETY: the handoff was built from the kernel image just materialized, and
    // kernel and loader share the boot protocol definition in `kernel-info`.
    unsafe { handoff.enter() }
}

/// Park the CPU for good.
fn halt() -> ! {
    loop {
        // SAFETY: `hlt` only waits for the next interrupt.
        unsafe { core::arch::asm!("hlt", options(nomem, nostack, preserves_flags)) };
    }
}
