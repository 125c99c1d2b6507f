//! User Page Directories
//!
//! Two-level page tables for the 32-bit user address space.
//!
//! # Page Table Structure (4KB pages)
//! - Directory: 1024 entries, each covers 4MB
//! - Table: 1024 entries, each covers 4KB
//!
//! Tables are allocated lazily. Each present entry owns the [`Frame`] it
//! maps, so destroying a directory returns every user page to its pool.
//!
//! # Security Properties
//! - Only page-aligned user addresses can be mapped
//! - An existing mapping is never silently replaced
//! - Kernel copies through the directory fail on unmapped pages instead of
//!   touching arbitrary memory

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use core::num::NonZeroUsize;
use core::sync::atomic::{AtomicUsize, Ordering};

use bitflags::bitflags;

use super::address::{VirtAddr, PAGE_SIZE, PAGE_SHIFT};
use super::frame::Frame;

/// Number of entries per page table and per directory.
pub const ENTRIES_PER_TABLE: usize = 1024;

bitflags! {
    /// Page table entry flags (x86 layout).
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct PageFlags: u32 {
        /// Entry maps a page.
        const PRESENT = 1 << 0;
        /// User code may write to the page.
        const WRITABLE = 1 << 1;
        /// User code may access the page.
        const USER = 1 << 2;
    }
}

impl PageFlags {
    /// Flags for a read-only user page.
    pub const USER_RO: Self = Self::PRESENT.union(Self::USER);
    /// Flags for a writable user page.
    pub const USER_RW: Self = Self::USER_RO.union(Self::WRITABLE);

    /// User flags for a page with the given writability.
    #[inline]
    pub const fn user(writable: bool) -> Self {
        if writable {
            Self::USER_RW
        } else {
            Self::USER_RO
        }
    }
}

/// A present page table entry.
struct PageTableEntry {
    frame: Frame,
    flags: PageFlags,
}

/// One second-level table.
struct PageTable {
    /// Built directly on the heap; the table is too large for a kernel stack.
    entries: Box<[Option<PageTableEntry>]>,
}

impl PageTable {
    fn new() -> Self {
        let mut entries = Vec::with_capacity(ENTRIES_PER_TABLE);
        entries.resize_with(ENTRIES_PER_TABLE, || None);
        Self {
            entries: entries.into_boxed_slice(),
        }
    }
}

/// Split a virtual address into (directory index, table index).
#[inline]
const fn indices(vaddr: VirtAddr) -> (usize, usize) {
    let vpn = vaddr.as_u32() >> PAGE_SHIFT;
    ((vpn >> 10) as usize, (vpn & 0x3FF) as usize)
}

/// Error type for page mapping operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingError {
    /// The virtual address is already mapped.
    AlreadyMapped,
    /// The virtual address is not mapped.
    NotMapped,
    /// The address is not properly aligned.
    MisalignedAddress,
    /// Attempted to map a kernel address into a user directory.
    InvalidPermissions,
}

impl core::fmt::Display for MappingError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::AlreadyMapped => write!(f, "virtual address already mapped"),
            Self::NotMapped => write!(f, "virtual address not mapped"),
            Self::MisalignedAddress => write!(f, "address not properly aligned"),
            Self::InvalidPermissions => write!(f, "invalid permission combination"),
        }
    }
}

/// Handle the MMU loads to switch to a directory.
///
/// Plain data, so the context-switch path can read it without locking the
/// directory's owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageRoot(NonZeroUsize);

impl PageRoot {
    /// Rebuild a handle from [`PageRoot::as_usize`]; zero means none.
    #[inline]
    pub fn from_raw(raw: usize) -> Option<Self> {
        NonZeroUsize::new(raw).map(Self)
    }

    #[inline]
    pub fn as_usize(self) -> usize {
        self.0.get()
    }
}

static NEXT_ROOT: AtomicUsize = AtomicUsize::new(1);

/// The page directory of one process.
pub struct PageDirectory {
    root: PageRoot,
    tables: BTreeMap<usize, PageTable>,
    mapped: usize,
}

impl Default for PageDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl PageDirectory {
    /// Create an empty directory (no user mappings).
    pub fn new() -> Self {
        let raw = NEXT_ROOT.fetch_add(1, Ordering::Relaxed);
        Self {
            root: PageRoot::from_raw(raw).unwrap_or(PageRoot(NonZeroUsize::MIN)),
            tables: BTreeMap::new(),
            mapped: 0,
        }
    }

    /// Handle to load into the MMU for this directory.
    #[inline]
    pub fn root(&self) -> PageRoot {
        self.root
    }

    fn entry(&self, vaddr: VirtAddr) -> Option<&PageTableEntry> {
        if !vaddr.is_user() {
            return None;
        }
        let (dir, idx) = indices(vaddr);
        self.tables.get(&dir)?.entries[idx].as_ref()
    }

    fn entry_mut(&mut self, vaddr: VirtAddr) -> Option<&mut PageTableEntry> {
        if !vaddr.is_user() {
            return None;
        }
        let (dir, idx) = indices(vaddr);
        self.tables.get_mut(&dir)?.entries[idx].as_mut()
    }

    /// Map `frame` at the user page `upage`.
    ///
    /// On failure the frame is dropped and returns to its pool.
    pub fn map(&mut self, upage: VirtAddr, frame: Frame, writable: bool) -> Result<(), MappingError> {
        if !upage.is_aligned() {
            return Err(MappingError::MisalignedAddress);
        }
        if !upage.is_user() {
            return Err(MappingError::InvalidPermissions);
        }

        let (dir, idx) = indices(upage);
        let table = self.tables.entry(dir).or_insert_with(PageTable::new);
        let slot = &mut table.entries[idx];
        if slot.is_some() {
            return Err(MappingError::AlreadyMapped);
        }

        *slot = Some(PageTableEntry {
            frame,
            flags: PageFlags::user(writable),
        });
        self.mapped += 1;
        Ok(())
    }

    /// Check whether the page containing `vaddr` is mapped.
    #[inline]
    pub fn is_mapped(&self, vaddr: VirtAddr) -> bool {
        self.entry(vaddr).is_some()
    }

    /// Flags of the page containing `vaddr`, if mapped.
    pub fn flags(&self, vaddr: VirtAddr) -> Option<PageFlags> {
        self.entry(vaddr).map(|e| e.flags)
    }

    /// Number of mapped user pages.
    pub fn mapped_pages(&self) -> usize {
        self.mapped
    }

    /// Copy user memory starting at `vaddr` into `buf`.
    pub fn read(&self, vaddr: VirtAddr, buf: &mut [u8]) -> Result<(), MappingError> {
        let mut addr = vaddr;
        let mut done = 0;
        while done < buf.len() {
            let entry = self.entry(addr).ok_or(MappingError::NotMapped)?;
            let offset = addr.page_offset();
            let n = (PAGE_SIZE - offset).min(buf.len() - done);
            buf[done..done + n].copy_from_slice(&entry.frame.as_bytes()[offset..offset + n]);
            done += n;
            if done < buf.len() {
                addr = addr.checked_add(n as u32).ok_or(MappingError::NotMapped)?;
            }
        }
        Ok(())
    }

    /// Copy `data` into user memory starting at `vaddr`.
    ///
    /// This is a kernel-side write; page writability is not consulted.
    pub fn write(&mut self, vaddr: VirtAddr, data: &[u8]) -> Result<(), MappingError> {
        let mut addr = vaddr;
        let mut done = 0;
        while done < data.len() {
            let entry = self.entry_mut(addr).ok_or(MappingError::NotMapped)?;
            let offset = addr.page_offset();
            let n = (PAGE_SIZE - offset).min(data.len() - done);
            entry.frame.as_bytes_mut()[offset..offset + n].copy_from_slice(&data[done..done + n]);
            done += n;
            if done < data.len() {
                addr = addr.checked_add(n as u32).ok_or(MappingError::NotMapped)?;
            }
        }
        Ok(())
    }

    /// Read one little-endian 32-bit word.
    pub fn read_u32(&self, vaddr: VirtAddr) -> Result<u32, MappingError> {
        let mut word = [0u8; 4];
        self.read(vaddr, &mut word)?;
        Ok(u32::from_le_bytes(word))
    }

    /// Write one little-endian 32-bit word.
    pub fn write_u32(&mut self, vaddr: VirtAddr, value: u32) -> Result<(), MappingError> {
        self.write(vaddr, &value.to_le_bytes())
    }

    /// Read a single byte.
    pub fn read_u8(&self, vaddr: VirtAddr) -> Result<u8, MappingError> {
        let entry = self.entry(vaddr).ok_or(MappingError::NotMapped)?;
        Ok(entry.frame.as_bytes()[vaddr.page_offset()])
    }

    /// Bytes from `vaddr` to the end of its page, if that page is mapped.
    pub fn page_bytes(&self, vaddr: VirtAddr) -> Option<&[u8]> {
        let entry = self.entry(vaddr)?;
        Some(&entry.frame.as_bytes()[vaddr.page_offset()..])
    }
}

impl core::fmt::Debug for PageDirectory {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "PageDirectory({} pages)", self.mapped)
    }
}
