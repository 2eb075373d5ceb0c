//! Scripted firmware, an in-memory boot volume and a tiny ELF64 writer.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::ptr::NonNull;
use std::rc::Rc;
use uefi::{CStr16, Status};
use uefi_boot::firmware::{MapKey, MemoryMapMeta, MemoryServices, ShutdownService};
use uefi_boot::memory_map::MemoryDescriptor;
use uefi_boot::volume::{BootVolume, OpenMode, VolumeFile};

/// Byte pattern of freshly reserved pages. Anything the loader did not write keeps it.
pub const POISON: u8 = 0xCC;

/// Descriptor stride used by real firmware (40-byte struct plus padding).
pub const FIRMWARE_STRIDE: usize = 48;

pub struct Reservation {
    pub address: u64,
    pub pages: usize,
    pub bytes: Box<[u8]>,
}

pub struct MockFirmware {
    pub descriptors: Vec<MemoryDescriptor>,
    pub descriptor_size: usize,
    /// Key of the map the firmware currently holds.
    pub current_key: usize,
    /// Statuses returned by the next `memory_map` calls before any real reply.
    pub map_failures: VecDeque<Status>,
    /// Results of the next `exit_boot_services` calls; once empty, the key decides.
    pub exit_script: VecDeque<Result<(), Status>>,
    /// Reserving pages changes the memory map, as it does on real firmware.
    pub allocation_changes_map: bool,
    pub refuse_pages: Option<Status>,

    pub map_calls: usize,
    pub exit_calls: Vec<MapKey>,
    pub reservations: Vec<Reservation>,
    pub exited: bool,
}

impl Default for MockFirmware {
    fn default() -> Self {
        Self {
            descriptors: vec![
                MemoryDescriptor::new(3, 0x0, 0x1, 0xf),
                MemoryDescriptor::new(7, 0x1000, 0x9f, 0xf),
                MemoryDescriptor::new(2, 0x10_0000, 0x100, 0xf),
                MemoryDescriptor::new(11, 0xfeb0_0000, 0x10, 0x8000_0000_0000_0001),
            ],
            descriptor_size: FIRMWARE_STRIDE,
            current_key: 0x1000,
            map_failures: VecDeque::new(),
            exit_script: VecDeque::new(),
            allocation_changes_map: false,
            refuse_pages: None,
            map_calls: 0,
            exit_calls: Vec::new(),
            reservations: Vec::new(),
            exited: false,
        }
    }
}

impl MockFirmware {
    pub fn required_size(&self) -> usize {
        self.descriptors.len() * self.descriptor_size
    }

    /// Something else allocated memory; the current key goes stale.
    pub fn change_map(&mut self) {
        self.current_key += 1;
    }

    pub fn reservation(&self, address: u64) -> Option<&Reservation> {
        self.reservations.iter().find(|r| r.address == address)
    }

    fn encode(&self, buffer: &mut [u8]) {
        for (i, d) in self.descriptors.iter().enumerate() {
            let entry = &mut buffer[i * self.descriptor_size..(i + 1) * self.descriptor_size];
            entry.fill(0);
            entry[0..4].copy_from_slice(&d.memory_type.to_le_bytes());
            entry[8..16].copy_from_slice(&d.physical_start.to_le_bytes());
            entry[16..24].copy_from_slice(&d.virtual_start.to_le_bytes());
            entry[24..32].copy_from_slice(&d.number_of_pages.to_le_bytes());
            entry[32..40].copy_from_slice(&d.attribute.to_le_bytes());
        }
    }
}

impl MemoryServices for MockFirmware {
    fn memory_map(&mut self, buffer: &mut [u8]) -> Result<MemoryMapMeta, Status> {
        assert!(!self.exited, "memory map requested after boot services exited");
        self.map_calls += 1;

        if let Some(status) = self.map_failures.pop_front() {
            return Err(status);
        }

        let map_size = self.required_size();
        if buffer.len() < map_size {
            return Err(Status::BUFFER_TOO_SMALL);
        }

        self.encode(buffer);
        // Each query hands out the key of the map it just wrote.
        self.current_key += 1;
        Ok(MemoryMapMeta {
            map_size,
            map_key: MapKey::new(self.current_key),
            descriptor_size: self.descriptor_size,
            descriptor_version: 1,
        })
    }

    fn allocate_pages_at(&mut self, address: u64, pages: usize) -> Result<NonNull<u8>, Status> {
        assert!(!self.exited, "pages requested after boot services exited");
        if let Some(status) = self.refuse_pages {
            return Err(status);
        }
        if address % 4096 != 0 {
            return Err(Status::INVALID_PARAMETER);
        }

        let mut bytes = vec![POISON; pages * 4096].into_boxed_slice();
        let region = NonNull::new(bytes.as_mut_ptr()).ok_or(Status::OUT_OF_RESOURCES)?;
        self.reservations.push(Reservation {
            address,
            pages,
            bytes,
        });
        if self.allocation_changes_map {
            self.change_map();
        }
        Ok(region)
    }
}

impl ShutdownService for MockFirmware {
    fn exit_boot_services(&mut self, key: MapKey) -> Result<(), Status> {
        assert!(!self.exited, "ExitBootServices called after it succeeded");
        self.exit_calls.push(key);

        let result = self.exit_script.pop_front().unwrap_or_else(|| {
            if key == MapKey::new(self.current_key) {
                Ok(())
            } else {
                Err(Status::INVALID_PARAMETER)
            }
        });
        self.exited = result.is_ok();
        result
    }
}

type Contents = Rc<RefCell<Vec<u8>>>;

#[derive(Default)]
pub struct MockVolume {
    pub files: BTreeMap<String, Contents>,
    pub opened: Vec<(String, OpenMode)>,
    /// Reads return at most this many bytes.
    pub read_limit: Option<usize>,
    pub fail_writes: Option<Status>,
    /// Status of every `CreateReadWrite` open.
    pub fail_create: Option<Status>,
    /// Size reported by file metadata instead of the real length.
    pub reported_size: Option<u64>,
}

impl MockVolume {
    pub fn with_file(mut self, path: &str, data: Vec<u8>) -> Self {
        self.files.insert(path.to_owned(), Rc::new(RefCell::new(data)));
        self
    }

    pub fn contents(&self, path: &str) -> Option<Vec<u8>> {
        self.files.get(path).map(|data| data.borrow().clone())
    }

    pub fn text(&self, path: &str) -> Option<String> {
        self.contents(path).map(|bytes| String::from_utf8(bytes).expect("utf-8"))
    }
}

pub struct MockFile {
    data: Contents,
    position: usize,
    writable: bool,
    read_limit: Option<usize>,
    fail_writes: Option<Status>,
    reported_size: Option<u64>,
}

impl BootVolume for MockVolume {
    type File = MockFile;

    fn open(&mut self, path: &CStr16, mode: OpenMode) -> Result<MockFile, Status> {
        let path = path.to_string();
        self.opened.push((path.clone(), mode));

        let data = match mode {
            OpenMode::Read => self.files.get(&path).cloned().ok_or(Status::NOT_FOUND)?,
            OpenMode::CreateReadWrite => {
                if let Some(status) = self.fail_create {
                    return Err(status);
                }
                self.files.entry(path).or_default().clone()
            }
        };
        Ok(MockFile {
            data,
            position: 0,
            writable: mode == OpenMode::CreateReadWrite,
            read_limit: self.read_limit,
            fail_writes: self.fail_writes,
            reported_size: self.reported_size,
        })
    }
}

impl VolumeFile for MockFile {
    fn size(&mut self) -> Result<u64, Status> {
        Ok(self
            .reported_size
            .unwrap_or_else(|| self.data.borrow().len() as u64))
    }

    fn read(&mut self, buffer: &mut [u8]) -> Result<usize, Status> {
        let data = self.data.borrow();
        let available = &data[self.position.min(data.len())..];
        let count = buffer
            .len()
            .min(available.len())
            .min(self.read_limit.unwrap_or(usize::MAX));
        buffer[..count].copy_from_slice(&available[..count]);
        self.position += count;
        Ok(count)
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), Status> {
        if !self.writable {
            return Err(Status::WRITE_PROTECTED);
        }
        if let Some(status) = self.fail_writes {
            return Err(status);
        }
        let mut data = self.data.borrow_mut();
        let end = self.position + bytes.len();
        if data.len() < end {
            data.resize(end, 0);
        }
        data[self.position..end].copy_from_slice(bytes);
        self.position = end;
        Ok(())
    }
}

pub const PT_LOAD: u32 = 1;
pub const PT_NOTE: u32 = 4;
pub const PT_GNU_STACK: u32 = 0x6474_e551;

pub const PF_X: u32 = 0x1;
pub const PF_W: u32 = 0x2;
pub const PF_R: u32 = 0x4;

const EHDR_SIZE: usize = 64;
const PHDR_SIZE: usize = 56;

struct Segment {
    kind: u32,
    flags: u32,
    vaddr: u64,
    data: Vec<u8>,
    memsz: u64,
    /// `(offset, filesz)` written verbatim instead of pointing at `data`.
    raw: Option<(u64, u64)>,
}

/// Writes minimal x86-64 ELF64 executables: header, program headers, payloads.
pub struct ElfBuilder {
    entry: u64,
    segments: Vec<Segment>,
}

impl ElfBuilder {
    pub fn new(entry: u64) -> Self {
        Self {
            entry,
            segments: Vec::new(),
        }
    }

    /// A `PT_LOAD` segment whose file bytes are `data`.
    pub fn load(self, vaddr: u64, data: &[u8], memsz: u64) -> Self {
        self.load_with_flags(vaddr, data, memsz, PF_R | PF_X)
    }

    pub fn load_with_flags(mut self, vaddr: u64, data: &[u8], memsz: u64, flags: u32) -> Self {
        self.segments.push(Segment {
            kind: PT_LOAD,
            flags,
            vaddr,
            data: data.to_vec(),
            memsz,
            raw: None,
        });
        self
    }

    /// A segment of any other type, carrying `data`.
    pub fn other(mut self, kind: u32, vaddr: u64, data: &[u8]) -> Self {
        self.segments.push(Segment {
            kind,
            flags: PF_R,
            vaddr,
            memsz: data.len() as u64,
            data: data.to_vec(),
            raw: None,
        });
        self
    }

    /// A `PT_LOAD` entry with arbitrary file offset and sizes.
    pub fn raw_load(mut self, vaddr: u64, offset: u64, filesz: u64, memsz: u64) -> Self {
        self.segments.push(Segment {
            kind: PT_LOAD,
            flags: PF_R | PF_W,
            vaddr,
            data: Vec::new(),
            memsz,
            raw: Some((offset, filesz)),
        });
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let phnum = self.segments.len();
        let mut out = vec![0u8; EHDR_SIZE + phnum * PHDR_SIZE];

        out[0..4].copy_from_slice(&[0x7F, b'E', b'L', b'F']);
        out[4] = 2; // ELFCLASS64
        out[5] = 1; // ELFDATA2LSB
        out[6] = 1; // EV_CURRENT
        out[16..18].copy_from_slice(&2u16.to_le_bytes()); // ET_EXEC
        out[18..20].copy_from_slice(&62u16.to_le_bytes()); // EM_X86_64
        out[20..24].copy_from_slice(&1u32.to_le_bytes());
        out[24..32].copy_from_slice(&self.entry.to_le_bytes());
        out[32..40].copy_from_slice(&(EHDR_SIZE as u64).to_le_bytes());
        out[52..54].copy_from_slice(&(EHDR_SIZE as u16).to_le_bytes());
        out[54..56].copy_from_slice(&(PHDR_SIZE as u16).to_le_bytes());
        out[56..58].copy_from_slice(&(phnum as u16).to_le_bytes());

        for (i, segment) in self.segments.iter().enumerate() {
            let (offset, filesz) = segment.raw.unwrap_or_else(|| {
                let offset = out.len() as u64;
                out.extend_from_slice(&segment.data);
                (offset, segment.data.len() as u64)
            });

            let ph = EHDR_SIZE + i * PHDR_SIZE;
            let entry = &mut out[ph..ph + PHDR_SIZE];
            entry[0..4].copy_from_slice(&segment.kind.to_le_bytes());
            entry[4..8].copy_from_slice(&segment.flags.to_le_bytes());
            entry[8..16].copy_from_slice(&offset.to_le_bytes());
            entry[16..24].copy_from_slice(&segment.vaddr.to_le_bytes());
            entry[24..32].copy_from_slice(&segment.vaddr.to_le_bytes());
            entry[32..40].copy_from_slice(&filesz.to_le_bytes());
            entry[40..48].copy_from_slice(&segment.memsz.to_le_bytes());
            entry[48..56].copy_from_slice(&0x1000u64.to_le_bytes());
        }

        out
    }
}

/// `len` bytes counting up from `start`, so misplaced copies are visible.
pub fn pattern(start: u8, len: usize) -> Vec<u8> {
    (0..len).map(|i| start.wrapping_add(i as u8)).collect()
}
