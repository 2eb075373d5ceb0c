use core::sync::atomic::{AtomicBool, Ordering};
use kernel_qemu::qemu_trace;
use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};

/// Whether records are mirrored to the UEFI text console.
static CONSOLE_MIRROR: AtomicBool = AtomicBool::new(true);

pub struct UefiLogger {
    max_level: LevelFilter,
}

impl UefiLogger {
    #[must_use]
    pub const fn new(max_level: LevelFilter) -> Self {
        Self { max_level }
    }

    /// Call this once during early init.
    #[allow(static_mut_refs, clippy::missing_errors_doc)]
    pub fn init(self) -> Result<(), SetLoggerError> {
        static mut LOGGER: Option<UefiLogger> = None;

        let max_level = self.max_level;
        // SAFETY: single-threaded early init; the static is written exactly once
        // before `set_logger` hands out the shared reference.
        let logger: &'static Self = unsafe { LOGGER.insert(self) };
        log::set_logger(logger)?;
        log::set_max_level(max_level);
        Ok(())
    }
}

/// Stop writing to the UEFI console. The QEMU debug console keeps working.
///
/// Must happen before the first `ExitBootServices` call: console output is a
/// boot service and would change the memory map between a rejected exit and
/// its retry.
pub fn detach_console() {
    CONSOLE_MIRROR.store(false, Ordering::SeqCst);
}

impl Log for UefiLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.max_level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        // Format: "[LEVEL] target: message\n"
        qemu_trace!(
            "[{}] {}: {}\n",
            record.level(),
            record.target(),
            record.args()
        );

        if CONSOLE_MIRROR.load(Ordering::SeqCst) {
            uefi::println!(
                "[{}] {}: {}",
                record.level(),
                record.target(),
                record.args()
            );
        }
    }

    fn flush(&self) {
        // no-op for qemu debug port
    }
}
