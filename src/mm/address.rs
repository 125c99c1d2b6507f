//! User Virtual Address Type
//!
//! User programs run in a 32-bit address space below [`PHYS_BASE`]. Every
//! address that crosses the syscall boundary or comes out of an executable
//! header is wrapped in [`VirtAddr`] before the kernel does arithmetic on it.
//!
//! # Security Properties
//! - Arithmetic is checked; wrapping past 4 GiB yields `None`
//! - Page zero is never a valid user mapping target
//! - Kernel addresses are distinguishable at the type level via `is_user`

use core::fmt;

/// Page size (4 KiB)
pub const PAGE_SIZE: usize = 4096;
/// Page size mask
pub const PAGE_MASK: u32 = PAGE_SIZE as u32 - 1;
/// Bits to shift for page number
pub const PAGE_SHIFT: u32 = 12;

/// Boundary between user and kernel virtual memory.
///
/// Everything at or above this address belongs to the kernel.
pub const PHYS_BASE: u32 = 0xC000_0000;

/// Size of a user-mode pointer or stack word.
pub const WORD_SIZE: u32 = 4;

/// A 32-bit user virtual address.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct VirtAddr(u32);

impl VirtAddr {
    /// The null address.
    pub const NULL: Self = Self(0);

    /// Create a new virtual address.
    #[inline]
    pub const fn new(addr: u32) -> Self {
        Self(addr)
    }

    /// Get the raw address value.
    #[inline]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Check if the address is page-aligned.
    #[inline]
    pub const fn is_aligned(self) -> bool {
        self.0 & PAGE_MASK == 0
    }

    /// Align the address down to the nearest page boundary.
    #[inline]
    pub const fn align_down(self) -> Self {
        Self(self.0 & !PAGE_MASK)
    }

    /// Get the page offset (lowest 12 bits).
    #[inline]
    pub const fn page_offset(self) -> usize {
        (self.0 & PAGE_MASK) as usize
    }

    /// Add an offset, returning `None` on wraparound.
    #[inline]
    pub const fn checked_add(self, offset: u32) -> Option<Self> {
        match self.0.checked_add(offset) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    /// Subtract an offset, returning `None` on underflow.
    #[inline]
    pub const fn checked_sub(self, offset: u32) -> Option<Self> {
        match self.0.checked_sub(offset) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    /// Check if this address lies below the kernel boundary.
    #[inline]
    pub const fn is_user(self) -> bool {
        self.0 < PHYS_BASE
    }
}

impl From<u32> for VirtAddr {
    fn from(addr: u32) -> Self {
        Self(addr)
    }
}

impl fmt::Debug for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VirtAddr({:#010x})", self.0)
    }
}

impl fmt::Display for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}
