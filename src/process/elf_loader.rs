use alloc::vec::Vec;

use log::debug;
use procimage_arch::{Abi, Endianness};

use super::loader::ExecutableLoader;
use crate::error::{ExecError, ExecResult};
use crate::memory::paging::PageFlags;
use crate::memory::space::SoftAddressSpace;
use crate::memory::VirtAddr;
use crate::userspace::{ProgramHandle, ProgramRegistry};

const ELF_MAGIC: &[u8; 4] = b"\x7FELF";
const EI_CLASS: usize = 4;
const EI_DATA: usize = 5;
const EI_VERSION: usize = 6;
const ELFCLASS32: u8 = 1;
const ELFCLASS64: u8 = 2;
const ELFDATA2LSB: u8 = 1;
const ELFDATA2MSB: u8 = 2;
const ET_EXEC: u16 = 2;
const PT_LOAD: u32 = 1;
const PF_EXECUTE: u32 = 0x1;
const PF_WRITE: u32 = 0x2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElfLoaderError {
    InvalidMagic,
    UnsupportedClass,
    UnsupportedEndianness,
    UnsupportedMachine,
    UnsupportedType,
    InvalidHeader,
    InvalidProgramHeader,
    UnexpectedEof,
    MissingLoadSegment,
    EntryOutsideImage,
}

impl From<ElfLoaderError> for ExecError {
    fn from(err: ElfLoaderError) -> Self {
        match err {
            // the file is shorter than its own headers say: a short read
            ElfLoaderError::UnexpectedEof => ExecError::IoError,
            _ => ExecError::BadFormat,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedImage {
    pub entry_point: VirtAddr,
    pub segments: Vec<Segment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub vaddr: VirtAddr,
    pub mem_size: usize,
    pub file_size: usize,
    pub flags: PageFlags,
    /// The `file_size` bytes backed by the file.
    pub data: Vec<u8>,
}

impl Segment {
    fn contains(&self, addr: VirtAddr) -> bool {
        addr.0 >= self.vaddr.0 && addr.0 < self.vaddr.0 + self.mem_size as u64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ElfClass {
    Elf32,
    Elf64,
}

#[derive(Debug, Clone)]
struct ElfHeader {
    class: ElfClass,
    endian: Endianness,
    typ: u16,
    machine: u16,
    entry: u64,
    phoff: u64,
    phentsize: u16,
    phnum: u16,
}

#[derive(Debug, Clone)]
struct ProgramHeader {
    typ: u32,
    flags: u32,
    offset: u64,
    vaddr: u64,
    filesz: u64,
    memsz: u64,
}

/// Parse a static executable built for `abi` and collect its loadable
/// segments.
pub fn parse_executable(image: &[u8], abi: &Abi) -> Result<ParsedImage, ElfLoaderError> {
    let header = parse_header(image)?;
    validate_target(&header, abi)?;

    let program_headers = parse_program_headers(image, &header)?;
    let segments = build_segments(image, &program_headers)?;
    if segments.is_empty() {
        return Err(ElfLoaderError::MissingLoadSegment);
    }

    let entry_point = VirtAddr::new(header.entry);
    if !segments
        .iter()
        .any(|segment| segment.flags.is_executable() && segment.contains(entry_point))
    {
        return Err(ElfLoaderError::EntryOutsideImage);
    }

    Ok(ParsedImage {
        entry_point,
        segments,
    })
}

/// Map every segment of `image` into `space` and copy its contents in.
pub fn map_image(space: &mut SoftAddressSpace, image: &ParsedImage) -> ExecResult<()> {
    for segment in &image.segments {
        space
            .define_region(segment.vaddr, segment.mem_size, segment.flags)
            .map_err(|err| match err {
                ExecError::OutOfMemory => ExecError::OutOfMemory,
                _ => ExecError::BadFormat,
            })?;
        if !segment.data.is_empty() {
            space.load_bytes(segment.vaddr, &segment.data)?;
        }
    }
    Ok(())
}

/// Loads ELF programs out of a [`ProgramRegistry`].
pub struct ElfLoader {
    registry: ProgramRegistry,
    abi: Abi,
}

impl ElfLoader {
    pub fn new(registry: ProgramRegistry, abi: Abi) -> Self {
        Self { registry, abi }
    }

    pub fn registry(&self) -> &ProgramRegistry {
        &self.registry
    }
}

impl ExecutableLoader<SoftAddressSpace> for ElfLoader {
    type Handle = ProgramHandle;

    fn open(&mut self, path: &str) -> ExecResult<ProgramHandle> {
        self.registry.open(path)
    }

    fn load(&mut self, handle: &mut ProgramHandle, space: &mut SoftAddressSpace) -> ExecResult<VirtAddr> {
        let bytes = self.registry.read(handle)?;
        let image = parse_executable(bytes, &self.abi)?;
        map_image(space, &image)?;
        debug!(
            "loaded {}: {} segments, entry {}",
            handle.path(),
            image.segments.len(),
            image.entry_point
        );
        Ok(image.entry_point)
    }

    fn close(&mut self, handle: ProgramHandle) {
        self.registry.close(handle);
    }
}

/// Where each fixed-position field sits for one ELF class.
struct ClassLayout {
    header_size: usize,
    entry: usize,
    phoff: usize,
    phentsize: usize,
    phnum: usize,
    ph_size: usize,
    ph_flags: usize,
    ph_offset: usize,
    ph_vaddr: usize,
    ph_filesz: usize,
    ph_memsz: usize,
}

const LAYOUT32: ClassLayout = ClassLayout {
    header_size: 52,
    entry: 24,
    phoff: 28,
    phentsize: 42,
    phnum: 44,
    ph_size: 32,
    ph_flags: 24,
    ph_offset: 4,
    ph_vaddr: 8,
    ph_filesz: 16,
    ph_memsz: 20,
};

const LAYOUT64: ClassLayout = ClassLayout {
    header_size: 64,
    entry: 24,
    phoff: 32,
    phentsize: 54,
    phnum: 56,
    ph_size: 56,
    ph_flags: 4,
    ph_offset: 8,
    ph_vaddr: 16,
    ph_filesz: 32,
    ph_memsz: 40,
};

impl ElfClass {
    fn layout(self) -> &'static ClassLayout {
        match self {
            ElfClass::Elf32 => &LAYOUT32,
            ElfClass::Elf64 => &LAYOUT64,
        }
    }
}

/// Bounds-checked view of part of the file, decoded in its class and byte
/// order.
#[derive(Clone, Copy)]
struct Fields<'a> {
    bytes: &'a [u8],
    class: ElfClass,
    endian: Endianness,
}

impl<'a> Fields<'a> {
    fn window(self, start: usize, len: usize) -> Result<Fields<'a>, ElfLoaderError> {
        let end = start
            .checked_add(len)
            .ok_or(ElfLoaderError::InvalidProgramHeader)?;
        let bytes = self.bytes.get(start..end).ok_or(ElfLoaderError::UnexpectedEof)?;
        Ok(Fields { bytes, ..self })
    }

    /// `N` bytes at `offset`, most significant first.
    fn raw<const N: usize>(&self, offset: usize) -> Result<[u8; N], ElfLoaderError> {
        let mut raw = [0u8; N];
        raw.copy_from_slice(self.window(offset, N)?.bytes);
        if self.endian == Endianness::Little {
            raw.reverse();
        }
        Ok(raw)
    }

    fn half(&self, offset: usize) -> Result<u16, ElfLoaderError> {
        self.raw(offset).map(u16::from_be_bytes)
    }

    fn word(&self, offset: usize) -> Result<u32, ElfLoaderError> {
        self.raw(offset).map(u32::from_be_bytes)
    }

    /// Address or offset field, as wide as the class says.
    fn addr(&self, offset: usize) -> Result<u64, ElfLoaderError> {
        match self.class {
            ElfClass::Elf32 => self.word(offset).map(u64::from),
            ElfClass::Elf64 => self.raw(offset).map(u64::from_be_bytes),
        }
    }
}

fn parse_header(bytes: &[u8]) -> Result<ElfHeader, ElfLoaderError> {
    let ident = bytes.get(..16).ok_or(ElfLoaderError::InvalidHeader)?;
    if &ident[..4] != ELF_MAGIC {
        return Err(ElfLoaderError::InvalidMagic);
    }

    let class = match ident[EI_CLASS] {
        ELFCLASS32 => ElfClass::Elf32,
        ELFCLASS64 => ElfClass::Elf64,
        _ => return Err(ElfLoaderError::UnsupportedClass),
    };
    if ident[EI_VERSION] != 1 {
        return Err(ElfLoaderError::InvalidHeader);
    }
    let endian = match ident[EI_DATA] {
        ELFDATA2LSB => Endianness::Little,
        ELFDATA2MSB => Endianness::Big,
        _ => return Err(ElfLoaderError::UnsupportedEndianness),
    };

    let layout = class.layout();
    if bytes.len() < layout.header_size {
        return Err(ElfLoaderError::InvalidHeader);
    }

    let fields = Fields {
        bytes,
        class,
        endian,
    };
    Ok(ElfHeader {
        class,
        endian,
        typ: fields.half(16)?,
        machine: fields.half(18)?,
        entry: fields.addr(layout.entry)?,
        phoff: fields.addr(layout.phoff)?,
        phentsize: fields.half(layout.phentsize)?,
        phnum: fields.half(layout.phnum)?,
    })
}

fn validate_target(header: &ElfHeader, abi: &Abi) -> Result<(), ElfLoaderError> {
    let expected_class = match abi.word_size {
        4 => ElfClass::Elf32,
        _ => ElfClass::Elf64,
    };
    if header.class != expected_class {
        return Err(ElfLoaderError::UnsupportedClass);
    }
    if header.endian != abi.endian {
        return Err(ElfLoaderError::UnsupportedEndianness);
    }
    if header.machine != abi.arch.elf_machine() {
        return Err(ElfLoaderError::UnsupportedMachine);
    }
    if header.typ != ET_EXEC {
        return Err(ElfLoaderError::UnsupportedType);
    }
    Ok(())
}

fn parse_program_headers(
    bytes: &[u8],
    header: &ElfHeader,
) -> Result<Vec<ProgramHeader>, ElfLoaderError> {
    let layout = header.class.layout();
    let entsize = header.phentsize as usize;
    if entsize < layout.ph_size {
        return Err(ElfLoaderError::InvalidProgramHeader);
    }
    let phoff = usize::try_from(header.phoff).map_err(|_| ElfLoaderError::InvalidProgramHeader)?;

    let file = Fields {
        bytes,
        class: header.class,
        endian: header.endian,
    };
    (0..header.phnum as usize)
        .map(|idx| {
            let start = idx
                .checked_mul(entsize)
                .and_then(|offset| offset.checked_add(phoff))
                .ok_or(ElfLoaderError::InvalidProgramHeader)?;
            let entry = file.window(start, entsize)?;
            Ok(ProgramHeader {
                typ: entry.word(0)?,
                flags: entry.word(layout.ph_flags)?,
                offset: entry.addr(layout.ph_offset)?,
                vaddr: entry.addr(layout.ph_vaddr)?,
                filesz: entry.addr(layout.ph_filesz)?,
                memsz: entry.addr(layout.ph_memsz)?,
            })
        })
        .collect()
}

/// Only the file-backed bytes are kept; the address space zero-fills the
/// rest of each segment when it is mapped.
fn build_segments(
    bytes: &[u8],
    program_headers: &[ProgramHeader],
) -> Result<Vec<Segment>, ElfLoaderError> {
    let mut segments = Vec::new();

    for ph in program_headers {
        if ph.typ != PT_LOAD || ph.memsz == 0 {
            continue;
        }
        if ph.vaddr.checked_add(ph.memsz).is_none() {
            return Err(ElfLoaderError::InvalidProgramHeader);
        }
        let mem_size =
            usize::try_from(ph.memsz).map_err(|_| ElfLoaderError::InvalidProgramHeader)?;

        // filesz beyond memsz is clamped rather than rejected
        let copy_len = usize::try_from(core::cmp::min(ph.filesz, ph.memsz))
            .map_err(|_| ElfLoaderError::InvalidProgramHeader)?;
        let file_start =
            usize::try_from(ph.offset).map_err(|_| ElfLoaderError::InvalidProgramHeader)?;
        let file_end = file_start
            .checked_add(copy_len)
            .ok_or(ElfLoaderError::InvalidProgramHeader)?;
        let data = bytes
            .get(file_start..file_end)
            .ok_or(ElfLoaderError::UnexpectedEof)?;

        segments.push(Segment {
            vaddr: VirtAddr::new(ph.vaddr),
            mem_size,
            file_size: copy_len,
            flags: PageFlags::user(ph.flags & PF_WRITE != 0, ph.flags & PF_EXECUTE != 0),
            data: data.to_vec(),
        });
    }

    segments.sort_by(|a, b| a.vaddr.cmp(&b.vaddr));
    Ok(segments)
}
