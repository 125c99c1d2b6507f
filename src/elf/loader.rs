//! Segment validation and mapping.

use log::debug;

use super::header::{Elf32Ehdr, Elf32Phdr, SegmentKind, EHDR_SIZE, PHDR_SIZE};
use super::{LoadError, SegmentError};
use crate::config::Config;
use crate::mm::address::{PAGE_MASK, PAGE_SIZE, PHYS_BASE};
use crate::mm::{AllocFlags, PageDirectory, PagePool, VirtAddr};
use crate::platform::{File, FileSystem};

/// A successfully loaded program, not yet installed in any process.
#[derive(Debug)]
pub struct LoadedImage {
    /// Entry point from the executable header.
    pub entry: VirtAddr,
    /// Initial stack pointer (top of the stack page).
    pub stack_top: VirtAddr,
    /// Directory holding every loaded segment and the stack page.
    pub pagedir: PageDirectory,
}

/// How one loadable segment is laid out in pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SegmentPlan {
    /// Page-aligned file offset to start reading from.
    file_page: u32,
    /// Page-aligned user address of the first page.
    mem_page: VirtAddr,
    /// Bytes read from the file, counted from `mem_page`.
    read_bytes: u32,
    /// Bytes zeroed after `read_bytes`, up to a page boundary.
    zero_bytes: u32,
    writable: bool,
}

impl SegmentPlan {
    /// Validate `phdr` against a file of `file_len` bytes and lay it out.
    fn new(phdr: &Elf32Phdr, file_len: u32) -> Result<Self, SegmentError> {
        let offset = phdr.offset();
        let vaddr = phdr.vaddr();
        let filesz = phdr.filesz();
        let memsz = phdr.memsz();

        if offset & PAGE_MASK != vaddr & PAGE_MASK {
            return Err(SegmentError::PageOffsetMismatch);
        }
        if offset > file_len {
            return Err(SegmentError::OffsetBeyondFile);
        }
        if memsz < filesz {
            return Err(SegmentError::MemoryTooSmall);
        }
        if memsz == 0 {
            return Err(SegmentError::Empty);
        }
        let end = vaddr
            .checked_add(memsz)
            .ok_or(SegmentError::OutsideUserSpace)?;
        if vaddr >= PHYS_BASE || end >= PHYS_BASE {
            return Err(SegmentError::OutsideUserSpace);
        }
        if vaddr < PAGE_SIZE as u32 {
            return Err(SegmentError::MapsPageZero);
        }

        // Both sums stay below PHYS_BASE, so page rounding cannot overflow.
        let page_offset = vaddr & PAGE_MASK;
        let span = round_up(page_offset + memsz);
        let (read_bytes, zero_bytes) = if filesz > 0 {
            let read = page_offset + filesz;
            (read, span - read)
        } else {
            (0, span)
        };

        Ok(Self {
            file_page: offset & !PAGE_MASK,
            mem_page: VirtAddr::new(vaddr & !PAGE_MASK),
            read_bytes,
            zero_bytes,
            writable: phdr.is_writable(),
        })
    }
}

#[inline]
const fn round_up(n: u32) -> u32 {
    (n + PAGE_MASK) & !PAGE_MASK
}

/// Open `path` and load it with [`load`].
pub fn load_executable(
    fs: &dyn FileSystem,
    path: &str,
    pool: &PagePool,
    config: &Config,
) -> Result<LoadedImage, LoadError> {
    let mut file = fs.open(path).ok_or(LoadError::OpenFailed)?;
    load(file.as_mut(), pool, config)
}

/// Load an executable from `file` into a new page directory.
///
/// On error the partially built directory is dropped and all of its pages
/// return to `pool`.
pub fn load(file: &mut dyn File, pool: &PagePool, config: &Config) -> Result<LoadedImage, LoadError> {
    let mut pagedir = PageDirectory::new();

    let mut raw = [0u8; EHDR_SIZE];
    file.seek(0);
    if file.read(&mut raw) != EHDR_SIZE {
        return Err(LoadError::BadHeader);
    }
    let ehdr = Elf32Ehdr::parse(&raw)?;
    ehdr.validate(config.max_program_headers)?;

    let file_len = file.length();
    let mut file_ofs = ehdr.phoff();
    for _ in 0..ehdr.phnum() {
        if file_ofs > file_len {
            return Err(LoadError::ProgramHeaderOutOfRange);
        }
        file.seek(file_ofs);

        let mut raw = [0u8; PHDR_SIZE];
        if file.read(&mut raw) != PHDR_SIZE {
            return Err(LoadError::ShortRead);
        }
        let phdr = Elf32Phdr::parse(&raw)?;
        file_ofs = file_ofs
            .checked_add(PHDR_SIZE as u32)
            .ok_or(LoadError::ProgramHeaderOutOfRange)?;

        match phdr.kind() {
            SegmentKind::Load => {
                let plan = SegmentPlan::new(&phdr, file_len)?;
                load_segment(file, &mut pagedir, pool, &plan)?;
            }
            kind @ (SegmentKind::Dynamic | SegmentKind::Interp | SegmentKind::Shlib) => {
                return Err(LoadError::Unsupported(kind));
            }
            SegmentKind::Null
            | SegmentKind::Note
            | SegmentKind::Phdr
            | SegmentKind::Stack
            | SegmentKind::Other(_) => {}
        }
    }

    let stack_top = setup_stack(&mut pagedir, pool)?;

    Ok(LoadedImage {
        entry: VirtAddr::new(ehdr.entry()),
        stack_top,
        pagedir,
    })
}

/// Read and map every page of one segment.
fn load_segment(
    file: &mut dyn File,
    pagedir: &mut PageDirectory,
    pool: &PagePool,
    plan: &SegmentPlan,
) -> Result<(), LoadError> {
    debug!(
        "load: segment at {} ({} file bytes, {} zero bytes, writable={})",
        plan.mem_page, plan.read_bytes, plan.zero_bytes, plan.writable
    );

    file.seek(plan.file_page);
    let mut upage = plan.mem_page;
    let mut read_bytes = plan.read_bytes as usize;
    let mut zero_bytes = plan.zero_bytes as usize;

    while read_bytes > 0 || zero_bytes > 0 {
        let page_read_bytes = read_bytes.min(PAGE_SIZE);
        let page_zero_bytes = PAGE_SIZE - page_read_bytes;

        let mut frame = pool.alloc(AllocFlags::empty()).ok_or(LoadError::OutOfMemory)?;
        let bytes = frame.as_bytes_mut();
        if file.read(&mut bytes[..page_read_bytes]) != page_read_bytes {
            return Err(LoadError::ShortRead);
        }
        bytes[page_read_bytes..].fill(0);

        pagedir.map(upage, frame, plan.writable)?;

        read_bytes -= page_read_bytes;
        zero_bytes = zero_bytes.saturating_sub(page_zero_bytes);
        upage = upage
            .checked_add(PAGE_SIZE as u32)
            .ok_or(LoadError::InvalidSegment(SegmentError::OutsideUserSpace))?;
    }
    Ok(())
}

/// Map a zeroed page just below `PHYS_BASE` and return the stack top.
fn setup_stack(pagedir: &mut PageDirectory, pool: &PagePool) -> Result<VirtAddr, LoadError> {
    let frame = pool.alloc(AllocFlags::ZERO).ok_or(LoadError::OutOfMemory)?;
    pagedir.map(VirtAddr::new(PHYS_BASE - PAGE_SIZE as u32), frame, true)?;
    Ok(VirtAddr::new(PHYS_BASE))
}
