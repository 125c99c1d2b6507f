//! ELF32 on-disk structures.
//!
//! Headers are decoded with `zerocopy` into little-endian field wrappers, so
//! no raw pointer casts touch the file image.

use zerocopy::byteorder::little_endian::{U16, U32};
use zerocopy::{FromBytes, Immutable, KnownLayout, Unaligned};

use super::LoadError;

/// Identification prefix: magic, 32-bit class, little-endian, version 1.
const ELF_IDENT: [u8; 7] = *b"\x7fELF\x01\x01\x01";
/// `e_type`: executable file.
const ET_EXEC: u16 = 2;
/// `e_machine`: Intel 80386.
const EM_386: u16 = 3;
/// `e_version`: current.
const EV_CURRENT: u32 = 1;

/// Segment flag: executable.
pub const PF_X: u32 = 1;
/// Segment flag: writable.
pub const PF_W: u32 = 2;
/// Segment flag: readable.
pub const PF_R: u32 = 4;

/// Size of the executable header on disk.
pub const EHDR_SIZE: usize = core::mem::size_of::<Elf32Ehdr>();
/// Size of one program header on disk.
pub const PHDR_SIZE: usize = core::mem::size_of::<Elf32Phdr>();

/// Executable header (`Elf32_Ehdr`).
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct Elf32Ehdr {
    pub e_ident: [u8; 16],
    pub e_type: U16,
    pub e_machine: U16,
    pub e_version: U32,
    pub e_entry: U32,
    pub e_phoff: U32,
    pub e_shoff: U32,
    pub e_flags: U32,
    pub e_ehsize: U16,
    pub e_phentsize: U16,
    pub e_phnum: U16,
    pub e_shentsize: U16,
    pub e_shnum: U16,
    pub e_shstrndx: U16,
}

impl Elf32Ehdr {
    /// Decode a header from exactly [`EHDR_SIZE`] bytes.
    pub fn parse(bytes: &[u8]) -> Result<Self, LoadError> {
        Self::read_from_bytes(bytes).map_err(|_| LoadError::BadHeader)
    }

    /// Check that this is a 32-bit x86 executable we know how to load.
    pub fn validate(&self, max_program_headers: u16) -> Result<(), LoadError> {
        if self.e_ident[..ELF_IDENT.len()] != ELF_IDENT
            || self.e_type.get() != ET_EXEC
            || self.e_machine.get() != EM_386
            || self.e_version.get() != EV_CURRENT
            || usize::from(self.e_phentsize.get()) != PHDR_SIZE
            || self.e_phnum.get() > max_program_headers
        {
            return Err(LoadError::BadHeader);
        }
        Ok(())
    }

    #[inline]
    pub fn entry(&self) -> u32 {
        self.e_entry.get()
    }

    #[inline]
    pub fn phoff(&self) -> u32 {
        self.e_phoff.get()
    }

    #[inline]
    pub fn phnum(&self) -> u16 {
        self.e_phnum.get()
    }
}

/// Program header (`Elf32_Phdr`).
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct Elf32Phdr {
    pub p_type: U32,
    pub p_offset: U32,
    pub p_vaddr: U32,
    pub p_paddr: U32,
    pub p_filesz: U32,
    pub p_memsz: U32,
    pub p_flags: U32,
    pub p_align: U32,
}

impl Elf32Phdr {
    /// Decode a program header from exactly [`PHDR_SIZE`] bytes.
    pub fn parse(bytes: &[u8]) -> Result<Self, LoadError> {
        Self::read_from_bytes(bytes).map_err(|_| LoadError::ShortRead)
    }

    #[inline]
    pub fn kind(&self) -> SegmentKind {
        SegmentKind::from(self.p_type.get())
    }

    #[inline]
    pub fn offset(&self) -> u32 {
        self.p_offset.get()
    }

    #[inline]
    pub fn vaddr(&self) -> u32 {
        self.p_vaddr.get()
    }

    #[inline]
    pub fn filesz(&self) -> u32 {
        self.p_filesz.get()
    }

    #[inline]
    pub fn memsz(&self) -> u32 {
        self.p_memsz.get()
    }

    #[inline]
    pub fn is_writable(&self) -> bool {
        self.p_flags.get() & PF_W != 0
    }
}

/// Program header type (`p_type`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    /// `PT_NULL`: unused entry.
    Null,
    /// `PT_LOAD`: loadable segment.
    Load,
    /// `PT_DYNAMIC`: dynamic linking information.
    Dynamic,
    /// `PT_INTERP`: path of a program interpreter.
    Interp,
    /// `PT_NOTE`: auxiliary information.
    Note,
    /// `PT_SHLIB`: reserved.
    Shlib,
    /// `PT_PHDR`: the program header table itself.
    Phdr,
    /// `PT_GNU_STACK`: stack permissions.
    Stack,
    /// Anything else.
    Other(u32),
}

impl From<u32> for SegmentKind {
    fn from(p_type: u32) -> Self {
        match p_type {
            0 => Self::Null,
            1 => Self::Load,
            2 => Self::Dynamic,
            3 => Self::Interp,
            4 => Self::Note,
            5 => Self::Shlib,
            6 => Self::Phdr,
            0x6474_e551 => Self::Stack,
            other => Self::Other(other),
        }
    }
}

impl From<SegmentKind> for u32 {
    fn from(kind: SegmentKind) -> Self {
        match kind {
            SegmentKind::Null => 0,
            SegmentKind::Load => 1,
            SegmentKind::Dynamic => 2,
            SegmentKind::Interp => 3,
            SegmentKind::Note => 4,
            SegmentKind::Shlib => 5,
            SegmentKind::Phdr => 6,
            SegmentKind::Stack => 0x6474_e551,
            SegmentKind::Other(raw) => raw,
        }
    }
}
