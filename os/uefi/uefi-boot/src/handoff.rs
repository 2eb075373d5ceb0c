//! # Firmware Shutdown and Kernel Entry
//!
//! Leaving the firmware is a two-step affair. [`ShutdownHandshake`] calls
//! `ExitBootServices` with the key of the most recent memory map snapshot. The
//! firmware may have changed its map since then (any allocation does that), in
//! which case it rejects the key. The loader then refreshes the snapshot once
//! and tries exactly once more:
//!
//! ```text
//! Running ──exit(key)──▶ ExitRequested ──ok──▶ Stopped
//!                              │
//!                           rejected
//!                              ▼
//!                   re-acquire map, exit(key') ──ok──▶ Stopped
//!                              │
//!                        rejected / map error
//!                              ▼
//!                            Halted
//! ```
//!
//! A successful handshake yields a [`BootServicesExited`] token. It is the only
//! way to build a [`Handoff`], so the kernel cannot be entered while the
//! firmware still owns the machine.

use crate::elf::{ElfImage, PhysicalAllocation};
use crate::firmware::{BootFirmware, MapKey};
use crate::memory_map::{MemoryMapError, MemoryMapSnapshot};
use kernel_info::boot::{BareEntryFn, BootProtocol, FramebufferEntryFn, FramebufferInfo};
use log::{debug, info, warn};
use uefi::Status;

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum HandoffError {
    #[error("Failed to refresh the memory map after ExitBootServices rejected key {key:?}: {source}")]
    MemoryMap {
        key: MapKey,
        #[source]
        source: MemoryMapError,
    },
    #[error("ExitBootServices rejected the refreshed map key {key:?}: {status:?}")]
    ExitRejected { key: MapKey, status: Status },
    #[error("Boot protocol {protocol:?} takes {expected} arguments, {given} given")]
    ProtocolMismatch {
        protocol: BootProtocol,
        expected: usize,
        given: usize,
    },
    #[error("Entry point {address:#x} lies outside the loaded image")]
    EntryOutsideImage { address: u64 },
    #[error("The shutdown handshake already ran and is {state:?}")]
    HandshakeFinished { state: ExitState },
}

impl From<HandoffError> for Status {
    fn from(value: HandoffError) -> Self {
        match value {
            HandoffError::MemoryMap { source, .. } => source.status(),
            HandoffError::ExitRejected { status, .. } => status,
            HandoffError::ProtocolMismatch { .. } => Self::INCOMPATIBLE_VERSION,
            HandoffError::EntryOutsideImage { .. } => Self::LOAD_ERROR,
            HandoffError::HandshakeFinished { .. } => Self::ABORTED,
        }
    }
}

/// Where the shutdown handshake stands.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ExitState {
    /// Boot services are available.
    Running,
    /// `ExitBootServices` has been called at least once and not yet accepted.
    ExitRequested,
    /// The firmware accepted; only raw memory and the CPU remain.
    Stopped,
    /// The retry failed as well. Nothing is left to do but halt.
    Halted,
}

/// Proof that the firmware accepted `ExitBootServices`.
#[derive(Debug)]
pub struct BootServicesExited {
    attempts: u8,
    map_key: MapKey,
}

impl BootServicesExited {
    /// Number of `ExitBootServices` calls it took, `1` or `2`.
    #[must_use]
    pub const fn attempts(&self) -> u8 {
        self.attempts
    }

    /// The key the firmware accepted.
    #[must_use]
    pub const fn map_key(&self) -> MapKey {
        self.map_key
    }
}

/// The single-retry `ExitBootServices` protocol.
#[derive(Debug)]
pub struct ShutdownHandshake {
    state: ExitState,
    attempts: u8,
}

impl Default for ShutdownHandshake {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownHandshake {
    const MAX_ATTEMPTS: u8 = 2;

    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: ExitState::Running,
            attempts: 0,
        }
    }

    #[must_use]
    pub const fn state(&self) -> ExitState {
        self.state
    }

    #[must_use]
    pub const fn attempts(&self) -> u8 {
        self.attempts
    }

    /// Exit boot services with the key held by `snapshot`.
    ///
    /// On rejection the snapshot is re-acquired into the same buffer and the call
    /// is repeated once with the fresh key. There is never a third attempt.
    ///
    /// A handshake runs once. Calling this again, whatever the outcome of the
    /// first run, makes no firmware call.
    ///
    /// # Errors
    /// [`HandoffError::MemoryMap`] if the refresh fails, [`HandoffError::ExitRejected`]
    /// if the retry is rejected as well. The handshake is [`ExitState::Halted`] afterwards.
    /// [`HandoffError::HandshakeFinished`] if the handshake is no longer [`ExitState::Running`].
    pub fn run<F>(
        &mut self,
        firmware: &mut F,
        snapshot: &mut MemoryMapSnapshot<'_>,
    ) -> Result<BootServicesExited, HandoffError>
    where
        F: BootFirmware + ?Sized,
    {
        if self.state != ExitState::Running {
            return Err(HandoffError::HandshakeFinished { state: self.state });
        }
        self.state = ExitState::ExitRequested;

        loop {
            let key = snapshot.map_key();
            self.attempts += 1;

            let status = match firmware.exit_boot_services(key) {
                Ok(()) => {
                    self.state = ExitState::Stopped;
                    info!("Boot services exited after {} attempt(s)", self.attempts);
                    return Ok(BootServicesExited {
                        attempts: self.attempts,
                        map_key: key,
                    });
                }
                Err(status) => status,
            };

            if self.attempts >= Self::MAX_ATTEMPTS {
                self.state = ExitState::Halted;
                return Err(HandoffError::ExitRejected { key, status });
            }

            warn!("ExitBootServices rejected map key {key:?} ({status:?}); refreshing the memory map");
            if let Err(source) = snapshot.acquire(firmware) {
                self.state = ExitState::Halted;
                return Err(HandoffError::MemoryMap { key, source });
            }
            debug!("Retrying with map key {:?}", snapshot.map_key());
        }
    }
}

/// Run the [`ShutdownHandshake`] once.
///
/// # Errors
/// See [`ShutdownHandshake::run`].
pub fn exit_boot_services<F>(
    firmware: &mut F,
    snapshot: &mut MemoryMapSnapshot<'_>,
) -> Result<BootServicesExited, HandoffError>
where
    F: BootFirmware + ?Sized,
{
    ShutdownHandshake::new().run(firmware, snapshot)
}

/// The kernel's entry point: an address and the argument contract it was built for.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct KernelEntry {
    address: u64,
    protocol: BootProtocol,
}

impl KernelEntry {
    #[must_use]
    pub const fn new(address: u64, protocol: BootProtocol) -> Self {
        Self { address, protocol }
    }

    /// The entry point named by the image's `e_entry` field.
    #[must_use]
    pub const fn from_image(elf: &ElfImage<'_>, protocol: BootProtocol) -> Self {
        Self::new(elf.entry(), protocol)
    }

    #[must_use]
    pub const fn address(&self) -> u64 {
        self.address
    }

    #[must_use]
    pub const fn protocol(&self) -> BootProtocol {
        self.protocol
    }
}

/// Values passed to the kernel entry point.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum BootArguments {
    None,
    Framebuffer { base: u64, size: u64 },
}

impl BootArguments {
    #[must_use]
    pub const fn framebuffer(info: &FramebufferInfo) -> Self {
        Self::Framebuffer {
            base: info.framebuffer_ptr,
            size: info.framebuffer_size,
        }
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        match self {
            Self::None => 0,
            Self::Framebuffer { .. } => 2,
        }
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }

    const fn fits(&self, protocol: BootProtocol) -> bool {
        matches!(
            (self, protocol),
            (Self::None, BootProtocol::Bare) | (Self::Framebuffer { .. }, BootProtocol::Framebuffer)
        )
    }
}

/// Everything needed to enter the kernel, checked and ready.
#[derive(Debug)]
pub struct Handoff {
    entry: KernelEntry,
    arguments: BootArguments,
    allocation: PhysicalAllocation,
    exited: BootServicesExited,
}

impl Handoff {
    /// # Errors
    /// [`HandoffError::ProtocolMismatch`] if `arguments` do not have the shape the
    /// entry point's protocol expects, [`HandoffError::EntryOutsideImage`] if the
    /// entry address is not part of `allocation`.
    pub fn new(
        entry: KernelEntry,
        arguments: BootArguments,
        allocation: PhysicalAllocation,
        exited: BootServicesExited,
    ) -> Result<Self, HandoffError> {
        Self::check(&entry, &arguments, &allocation)?;
        Ok(Self {
            entry,
            arguments,
            allocation,
            exited,
        })
    }

    /// The checks [`Handoff::new`] performs, for use while boot services are
    /// still around to report a failure.
    ///
    /// # Errors
    /// As [`Handoff::new`].
    pub fn check(
        entry: &KernelEntry,
        arguments: &BootArguments,
        allocation: &PhysicalAllocation,
    ) -> Result<(), HandoffError> {
        if !arguments.fits(entry.protocol) {
            return Err(HandoffError::ProtocolMismatch {
                protocol: entry.protocol,
                expected: entry.protocol.argument_count(),
                given: arguments.len(),
            });
        }
        if !allocation.contains(entry.address, 1) {
            return Err(HandoffError::EntryOutsideImage {
                address: entry.address,
            });
        }
        Ok(())
    }

    #[must_use]
    pub const fn entry(&self) -> KernelEntry {
        self.entry
    }

    #[must_use]
    pub const fn arguments(&self) -> BootArguments {
        self.arguments
    }

    #[must_use]
    pub const fn allocation(&self) -> &PhysicalAllocation {
        &self.allocation
    }

    #[must_use]
    pub const fn exited(&self) -> &BootServicesExited {
        &self.exited
    }

    /// Call the kernel entry point. Does not return.
    ///
    /// The page reservation is never returned to the firmware; from here on the
    /// kernel owns all memory.
    ///
    /// # Safety
    /// The reservation must hold the kernel image materialized from the file whose
    /// header named this entry point, and that kernel must have been built for the
    /// entry's [`BootProtocol`]. Nothing else about the callee can be checked.
    #[allow(clippy::cast_possible_truncation)]
    pub unsafe fn enter(self) -> ! {
        let Self {
            entry,
            arguments,
            allocation,
            exited,
        } = self;

        info!(
            "Entering kernel at {:#x} ({:?}, {} argument(s)) after {} exit attempt(s); image at {:#x}",
            entry.address,
            entry.protocol,
            arguments.len(),
            exited.attempts,
            allocation.address(),
        );

        // x86-64 only: addresses are 64 bits wide.
        let address = entry.address as usize;
        match arguments {
            BootArguments::None => {
                // SAFETY: `Handoff::new` paired this address with `BootProtocol::Bare`.
                let kernel_main = unsafe { core::mem::transmute::<usize, BareEntryFn>(address) };
                kernel_main()
            }
            BootArguments::Framebuffer { base, size } => {
                // SAFETY: `Handoff::new` paired this address with `BootProtocol::Framebuffer`.
                let kernel_main =
                    unsafe { core::mem::transmute::<usize, FramebufferEntryFn>(address) };
                kernel_main(base, size)
            }
        }
    }
}
