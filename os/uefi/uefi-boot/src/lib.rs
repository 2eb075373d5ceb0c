//! # UEFI Kernel Boot Core
//!
//! Everything the UEFI loader does between "the firmware started us" and "the
//! kernel is running", written against traits instead of the live firmware so
//! that every step can be exercised on the host.
//!
//! ## Boot Sequence
//!
//! ```text
//! UEFI Firmware
//!         ↓
//! ┌─────────────────────────────────────────────┐
//! │  1. Memory Map Snapshot                     │
//! │     • GetMemoryMap into a fixed 16 KiB      │
//! │       buffer, remember the map key          │
//! │     • Dump it to \memmap as CSV             │
//! │  2. Kernel Image                            │
//! │     • Read \kernel.elf into a pool buffer   │
//! │     • Validate the ELF64 header             │
//! │     • Fold the PT_LOAD address range        │
//! │  3. Placement                               │
//! │     • AllocatePages at exactly that range   │
//! │     • Copy file bytes, zero the BSS tails   │
//! │     • Free the image buffer                 │
//! │  4. Shutdown                                │
//! │     • ExitBootServices(map key)             │
//! │     • On rejection: refresh map, retry once │
//! │  5. Handoff                                 │
//! │     • kernel_main(fb_base, fb_size)         │
//! └─────────────────────────────────────────────┘
//!         ↓
//! Kernel (never returns)
//! ```
//!
//! ## Firmware Access
//!
//! The loader binary implements [`firmware::MemoryServices`],
//! [`firmware::ShutdownService`] and [`volume::BootVolume`] on top of the `uefi`
//! crate and passes them down explicitly. Nothing in this crate touches a global
//! system table, which is what makes the mock firmware in `tests/` possible.
//!
//! ## Memory Layout
//!
//! The kernel is linked at its physical load address
//! ([`KERNEL_BASE`](kernel_info::memory::KERNEL_BASE)), and UEFI identity maps
//! all memory, so a segment's `p_vaddr` is also where its bytes are written:
//!
//! ```text
//! 0x0000_0000_0010_0000 ┌────────────────────────┐ page_base(first)
//!                       │  .text                 │
//!                       │  .rodata               │
//!                       │  .data  (file bytes)   │
//!                       │  .bss   (zero filled)  │
//!                       ├────────────────────────┤ last
//!                       │  slack to page end     │
//!                       └────────────────────────┘ page_base + pages * 4096
//! ```
//!
//! ## Failure Policy
//!
//! Every step returns a [`loader::BootError`] naming what failed and carrying
//! the firmware status. The binary logs it once and halts. The only recovery
//! path is the single `ExitBootServices` retry in [`handoff`].

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

extern crate alloc;

pub mod diagnostics;
pub mod elf;
pub mod firmware;
pub mod handoff;
pub mod image;
pub mod loader;
pub mod memory_map;
pub mod table;
pub mod volume;

pub use firmware::{BootFirmware, MapKey, MemoryMapMeta, MemoryServices, ShutdownService};
pub use handoff::{BootArguments, BootServicesExited, ExitState, Handoff, KernelEntry};
pub use image::ExecutableImage;
pub use loader::{BootError, BootLoader, LoaderConfig};
pub use memory_map::{MemoryDescriptor, MemoryMapSnapshot, MemoryMapStorage};
pub use volume::{BootVolume, OpenMode, VolumeFile};
