//! # ELF file handling

pub mod loader;
pub mod parser;
pub mod range;

pub use loader::{MaterializeError, PhysicalAllocation, materialize_segments};
pub use parser::{ElfError, ElfImage, PFlags, SegmentDescriptor};
pub use range::{LoadAddressRange, load_address_range};
