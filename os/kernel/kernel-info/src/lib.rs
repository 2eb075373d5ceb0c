//! # Loader ↔ Kernel Boot Contract
//!
//! This crate holds everything the UEFI loader and the kernel have to agree on
//! without being able to check it against each other at runtime: the link
//! address of the kernel image, the page granularity of the loader's
//! reservations, and the signature of the kernel entry point.
//!
//! ## Overview
//!
//! The loader places the kernel's `PT_LOAD` segments at their link-time virtual
//! addresses and then calls the address found in the ELF header's `e_entry`
//! field. Nothing in the ELF file tells the loader how many arguments that
//! function expects, so the expectation is pinned down here as a
//! [`BootProtocol`](boot::BootProtocol) version:
//!
//! ```text
//! BootProtocol::Bare         extern "sysv64" fn() -> !
//! BootProtocol::Framebuffer  extern "sysv64" fn(frame_buffer_base: u64, frame_buffer_size: u64) -> !
//! ```
//!
//! Both sides link against this crate, so the loader and the kernel build can
//! only disagree if one of them is built from a different revision.
//!
//! ## Modules
//!
//! * [`boot`]: entry point signatures, protocol versions and the framebuffer
//!   description gathered from GOP.
//! * [`memory`]: link address and page size constants, consumed by the
//!   kernel's `build.rs` and by the loader's page math.
//!
//! ## Usage
//!
//! ```rust
//! use kernel_info::boot::{BootProtocol, FramebufferEntryFn};
//! use kernel_info::memory::{KERNEL_BASE, PAGE_SIZE};
//!
//! assert_eq!(BootProtocol::CURRENT, BootProtocol::Framebuffer);
//! assert_eq!(BootProtocol::CURRENT.argument_count(), 2);
//! assert_eq!(KERNEL_BASE % PAGE_SIZE, 0);
//! # let _: Option<FramebufferEntryFn> = None;
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

pub mod boot;
pub mod memory;
