//! # Memory Layout

/// Granularity of UEFI page allocations.
pub const PAGE_SIZE: u64 = 4096;

/// Where the kernel executes (VMA) and, since the loader reserves the exact
/// same physical range, where its bytes live.
///
/// # Kernel Build
/// This information is sourced in the kernel's `build.rs` to configure
/// the linker.
pub const KERNEL_BASE: u64 = 0x0010_0000; // 1 MiB

/// Round `value` down to its page boundary.
#[must_use]
pub const fn page_align_down(value: u64) -> u64 {
    value & !(PAGE_SIZE - 1)
}

const _: () = {
    assert!(PAGE_SIZE.is_power_of_two());
    assert!(KERNEL_BASE.is_multiple_of(PAGE_SIZE));
};
