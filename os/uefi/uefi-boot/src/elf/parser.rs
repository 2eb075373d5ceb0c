//! # ELF Header Parsing
//!
//! A read-only overlay on the image bytes. Nothing here copies the program
//! header table; segments are read from the file on demand.

use crate::table::{Plain, StridedTable, TableError};
use core::mem::size_of;
use core::ptr::read_unaligned;
use uefi::Status;

// Minimal ELF64 definitions
#[repr(C)]
#[derive(Clone, Copy)]
#[allow(clippy::struct_field_names, dead_code)]
pub(crate) struct Elf64Ehdr {
    e_ident: [u8; 16],
    e_type: u16,
    e_machine: u16,
    e_version: u32,
    e_entry: u64,
    e_phoff: u64,
    e_shoff: u64,
    e_flags: u32,
    e_ehsize: u16,
    e_phentsize: u16,
    e_phnum: u16,
    e_shentsize: u16,
    e_shnum: u16,
    e_shstrndx: u16,
}

#[repr(C)]
#[derive(Clone, Copy)]
#[allow(clippy::struct_field_names, dead_code)]
pub(crate) struct Elf64Phdr {
    p_type: u32,
    p_flags: PFlags,
    p_offset: u64,
    p_vaddr: u64,
    p_paddr: u64,
    p_filesz: u64,
    p_memsz: u64,
    p_align: u64,
}

// SAFETY: both headers are repr(C) and consist of integers only.
unsafe impl Plain for Elf64Ehdr {}
// SAFETY: see above; `PFlags` is a transparent u32.
unsafe impl Plain for Elf64Phdr {}

pub const PT_LOAD: u32 = 1;
pub const EM_X86_64: u16 = 62;

const EI_MAGIC_BYTES: [u8; 4] = [0x7F, b'E', b'L', b'F'];
const ELFCLASS64: u8 = 2;
const ELFDATA2LSB: u8 = 1;
const EV_CURRENT: u8 = 1;

/// Byte offset of `e_entry` within the file header.
pub const ENTRY_FIELD_OFFSET: usize = 24;

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum ElfError {
    #[error("The file is smaller than an ELF64 header ({0} bytes)")]
    Truncated(usize),
    #[error("Invalid ELF magic")]
    BadMagic,
    #[error("Unsupported ELF class {0}, expected ELF64")]
    UnsupportedClass(u8),
    #[error("Unsupported data encoding {0}, expected little endian")]
    UnsupportedEncoding(u8),
    #[error("Unsupported ELF version {0}")]
    UnsupportedVersion(u8),
    #[error("Unsupported machine type {0}, expected x86-64")]
    UnsupportedMachine(u16),
    #[error("Program header table offset does not fit into the address space")]
    ProgramHeaderOffset,
    #[error("Invalid program header table: {0}")]
    ProgramHeaderTable(#[from] TableError),
    #[error("The image has no loadable segments")]
    NoLoadSegments,
    #[error("The loadable segments of the image occupy no memory")]
    EmptyLoadRange,
}

impl From<ElfError> for Status {
    fn from(value: ElfError) -> Self {
        match value {
            ElfError::NoLoadSegments | ElfError::EmptyLoadRange => Self::LOAD_ERROR,
            _ => Self::UNSUPPORTED,
        }
    }
}

/// A validated 64-bit little-endian x86-64 ELF image.
#[derive(Clone, Copy)]
pub struct ElfImage<'a> {
    bytes: &'a [u8],
    header: Elf64Ehdr,
    program_headers: StridedTable<'a, Elf64Phdr>,
}

impl<'a> ElfImage<'a> {
    /// Validate the file header and the bounds of the program header table.
    ///
    /// # Errors
    /// An [`ElfError`] naming the first check that failed.
    pub fn parse(bytes: &'a [u8]) -> Result<Self, ElfError> {
        if bytes.len() < size_of::<Elf64Ehdr>() {
            return Err(ElfError::Truncated(bytes.len()));
        }

        // SAFETY: We just checked bounds; using read_unaligned to avoid alignment assumptions.
        let header = unsafe { read_unaligned(bytes.as_ptr().cast::<Elf64Ehdr>()) };

        let ident = &header.e_ident;
        if ident[0..4] != EI_MAGIC_BYTES {
            return Err(ElfError::BadMagic);
        }
        if ident[4] != ELFCLASS64 {
            return Err(ElfError::UnsupportedClass(ident[4]));
        }
        if ident[5] != ELFDATA2LSB {
            return Err(ElfError::UnsupportedEncoding(ident[5]));
        }
        if ident[6] != EV_CURRENT {
            return Err(ElfError::UnsupportedVersion(ident[6]));
        }
        if header.e_machine != EM_X86_64 {
            return Err(ElfError::UnsupportedMachine(header.e_machine));
        }

        let phoff = usize::try_from(header.e_phoff).map_err(|_| ElfError::ProgramHeaderOffset)?;
        let program_headers = StridedTable::new(
            bytes,
            phoff,
            usize::from(header.e_phentsize),
            usize::from(header.e_phnum),
        )?;

        Ok(Self {
            bytes,
            header,
            program_headers,
        })
    }

    /// The raw file this image was parsed from.
    #[must_use]
    pub const fn bytes(&self) -> &'a [u8] {
        self.bytes
    }

    /// Virtual address of the entry point.
    #[must_use]
    pub const fn entry(&self) -> u64 {
        self.header.e_entry
    }

    /// Number of program header table entries, of any type.
    #[must_use]
    pub const fn program_header_count(&self) -> usize {
        self.program_headers.len()
    }

    /// All program headers in table order.
    pub fn program_headers(&self) -> impl ExactSizeIterator<Item = ProgramHeader> + '_ {
        self.program_headers.iter().map(ProgramHeader)
    }

    /// `PT_LOAD` segments in table order; every other entry type is skipped.
    pub fn load_segments(&self) -> impl Iterator<Item = SegmentDescriptor> + '_ {
        self.program_headers().filter_map(|ph| ph.as_load_segment())
    }
}

/// One program header table entry.
#[derive(Clone, Copy)]
pub struct ProgramHeader(Elf64Phdr);

impl ProgramHeader {
    #[must_use]
    pub const fn kind(&self) -> u32 {
        self.0.p_type
    }

    #[must_use]
    pub const fn is_load(&self) -> bool {
        self.0.p_type == PT_LOAD
    }

    #[must_use]
    pub fn as_load_segment(&self) -> Option<SegmentDescriptor> {
        if !self.is_load() {
            return None;
        }
        let ph = &self.0;
        Some(SegmentDescriptor {
            vaddr: ph.p_vaddr,
            offset: ph.p_offset,
            filesz: ph.p_filesz,
            memsz: ph.p_memsz,
            flags: ph.p_flags,
        })
    }
}

/// A `PT_LOAD` segment: where it lives in the file and where it goes in memory.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct SegmentDescriptor {
    pub vaddr: u64,
    pub offset: u64,
    pub filesz: u64,
    pub memsz: u64,
    pub flags: PFlags,
}

impl SegmentDescriptor {
    /// First address past the segment in memory. Saturates instead of wrapping.
    #[must_use]
    pub const fn end(&self) -> u64 {
        self.vaddr.saturating_add(self.memsz)
    }
}

/// Bitfield wrapper for `Elf64_Phdr.p_flags` (32-bit)
///
/// Layout (LSB→MSB):
/// - bit 0: execute
/// - bit 1: write
/// - bit 2: read
/// - bits 3..31: reserved (must be zero for standard flags)
#[bitfield_struct::bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct PFlags {
    #[bits(1)]
    pub execute: bool,
    #[bits(1)]
    pub write: bool,
    #[bits(1)]
    pub read: bool,
    #[bits(29)]
    __: u32,
}

impl PFlags {
    /// `"RWX"`-style summary, `-` for cleared bits.
    #[must_use]
    pub fn symbols(self) -> [char; 3] {
        [
            if self.read() { 'R' } else { '-' },
            if self.write() { 'W' } else { '-' },
            if self.execute() { 'X' } else { '-' },
        ]
    }
}
