//! # QEMU Debug Console
//!
//! Byte-wise output to QEMU's ISA debug console (`-debugcon`), usable before
//! any allocator exists and after UEFI boot services are gone. Both the loader
//! and the kernel report through it.
//!
//! ```bash
//! qemu-system-x86_64 ... -debugcon stdio
//! ```
//!
//! With the `enabled` feature switched off every write compiles to nothing,
//! and no port I/O instruction is emitted.
//!
//! ```rust,ignore
//! use kernel_qemu::qemu_trace;
//!
//! qemu_trace!("kernel range {:#x}..{:#x}\n", first, last);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

use core::fmt;

/// The port QEMU maps `-debugcon` to unless told otherwise.
pub const QEMU_DEBUG_PORT: u16 = 0x402;

/// A `core::fmt::Write` sink that pushes every byte out of an I/O port.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct DebugConsole {
    port: u16,
}

impl DebugConsole {
    /// The default QEMU debug console on port `0x402`.
    pub const QEMU: Self = Self::new(QEMU_DEBUG_PORT);

    #[must_use]
    pub const fn new(port: u16) -> Self {
        Self { port }
    }

    #[must_use]
    pub const fn port(self) -> u16 {
        self.port
    }

    #[cfg(feature = "enabled")]
    #[allow(clippy::inline_always)]
    #[inline(always)]
    fn put(self, byte: u8) {
        // SAFETY: writing to the debug console port has no side effects besides output.
        unsafe {
            core::arch::asm!(
                "out dx, al",
                in("dx") self.port,
                in("al") byte,
                options(nomem, nostack, preserves_flags)
            );
        }
    }

    #[cfg(not(feature = "enabled"))]
    #[inline]
    #[allow(clippy::unused_self)]
    const fn put(self, _byte: u8) {}
}

impl fmt::Write for DebugConsole {
    #[inline]
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for b in s.bytes() {
            self.put(b);
        }
        Ok(())
    }
}

#[doc(hidden)]
pub mod qemu_fmt {
    use core::fmt;

    #[doc(hidden)]
    #[inline]
    pub fn qemu_write(args: fmt::Arguments) {
        // Best-effort output; the sink itself never fails.
        let _ = fmt::write(&mut crate::DebugConsole::QEMU, args);
    }
}

/// Format directly onto the QEMU debug console without allocating.
#[macro_export]
macro_rules! qemu_trace {
    ($($arg:tt)*) => {{
        $crate::qemu_fmt::qemu_write(core::format_args!($($arg)*));
    }};
}
