//! Executable Loading
//!
//! Loads 32-bit x86 ELF executables into a fresh page directory.
//!
//! # Security Model
//! - The file is untrusted: every header field is range-checked before use
//! - Dynamic linking is refused outright
//! - Page zero is never mapped, so kernel copies through a null user
//!   pointer always fault
//! - Any failure abandons the whole directory; there is no partial retry

mod header;
mod loader;

pub use header::{Elf32Ehdr, Elf32Phdr, SegmentKind, EHDR_SIZE, PF_R, PF_W, PF_X, PHDR_SIZE};
pub use loader::{load, load_executable, LoadedImage};

use crate::mm::MappingError;

/// Why a program header was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentError {
    /// `p_offset` and `p_vaddr` differ in their page offset.
    PageOffsetMismatch,
    /// `p_offset` points past the end of the file.
    OffsetBeyondFile,
    /// `p_memsz` is smaller than `p_filesz`.
    MemoryTooSmall,
    /// `p_memsz` is zero.
    Empty,
    /// The region reaches into kernel memory or wraps around.
    OutsideUserSpace,
    /// The region starts in page zero.
    MapsPageZero,
}

impl core::fmt::Display for SegmentError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::PageOffsetMismatch => write!(f, "file and memory page offsets differ"),
            Self::OffsetBeyondFile => write!(f, "file offset past end of file"),
            Self::MemoryTooSmall => write!(f, "memory size smaller than file size"),
            Self::Empty => write!(f, "empty segment"),
            Self::OutsideUserSpace => write!(f, "segment outside user address space"),
            Self::MapsPageZero => write!(f, "segment maps page zero"),
        }
    }
}

/// Error type for executable loading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadError {
    /// The executable could not be opened.
    OpenFailed,
    /// The executable header is malformed or not for this machine.
    BadHeader,
    /// A program header lies outside the file.
    ProgramHeaderOutOfRange,
    /// The file ended before a header or segment was fully read.
    ShortRead,
    /// The executable needs dynamic linking.
    Unsupported(SegmentKind),
    /// A loadable segment failed validation.
    InvalidSegment(SegmentError),
    /// The user page pool is exhausted.
    OutOfMemory,
    /// A page could not be installed.
    Mapping(MappingError),
}

impl From<SegmentError> for LoadError {
    fn from(e: SegmentError) -> Self {
        Self::InvalidSegment(e)
    }
}

impl From<MappingError> for LoadError {
    fn from(e: MappingError) -> Self {
        Self::Mapping(e)
    }
}

impl core::fmt::Display for LoadError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::OpenFailed => write!(f, "open failed"),
            Self::BadHeader => write!(f, "error loading executable"),
            Self::ProgramHeaderOutOfRange => write!(f, "program header out of range"),
            Self::ShortRead => write!(f, "unexpected end of file"),
            Self::Unsupported(kind) => write!(f, "unsupported segment {:?}", kind),
            Self::InvalidSegment(e) => write!(f, "invalid segment: {}", e),
            Self::OutOfMemory => write!(f, "out of user pages"),
            Self::Mapping(e) => write!(f, "mapping failed: {}", e),
        }
    }
}
