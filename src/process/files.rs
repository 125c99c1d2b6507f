//! Per-process open-file table.
//!
//! # Design
//! - Slots live in a `Slab`; a descriptor is the slot key plus [`Fd::FIRST_FILE`]
//! - Capacity is fixed; a slot is reused only after an explicit close
//! - Lookups on a vacant slot fail, so a stale descriptor never reaches a
//!   different file until that slot is handed out again by `open`

use alloc::boxed::Box;

use slab::Slab;

use crate::platform::File;

/// A user-visible file descriptor.
///
/// Newtype over the raw integer that crosses the syscall boundary.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(transparent)]
pub struct Fd(i32);

impl Fd {
    /// Keyboard input.
    pub const STDIN: Self = Self(0);
    /// Console output.
    pub const STDOUT: Self = Self(1);
    /// First descriptor handed out for files.
    pub const FIRST_FILE: Self = Self(2);

    #[inline]
    pub const fn new(raw: i32) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn as_i32(self) -> i32 {
        self.0
    }
}

/// Error type for descriptor lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FdError {
    /// The descriptor is outside the table's range.
    OutOfRange,
    /// The descriptor is in range but its slot is empty.
    Closed,
}

impl core::fmt::Display for FdError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::OutOfRange => write!(f, "descriptor out of range"),
            Self::Closed => write!(f, "descriptor not open"),
        }
    }
}

/// Fixed-capacity table of open files.
pub struct FileTable {
    slots: Slab<Box<dyn File>>,
    capacity: usize,
}

impl FileTable {
    /// Create an empty table holding at most `capacity` files.
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Slab::new(),
            capacity,
        }
    }

    fn slot(&self, fd: Fd) -> Option<usize> {
        let index = fd.0.checked_sub(Fd::FIRST_FILE.0)?;
        let index = usize::try_from(index).ok()?;
        (index < self.capacity).then_some(index)
    }

    /// Store `file` and return its descriptor.
    ///
    /// When the table is full the file is dropped, which closes it.
    pub fn insert(&mut self, file: Box<dyn File>) -> Option<Fd> {
        if self.slots.len() >= self.capacity {
            return None;
        }
        let key = self.slots.insert(file);
        debug_assert!(key < self.capacity);
        i32::try_from(key).ok().map(|k| Fd(k + Fd::FIRST_FILE.0))
    }

    /// Look up an open file.
    pub fn get_mut(&mut self, fd: Fd) -> Result<&mut (dyn File + 'static), FdError> {
        let index = self.slot(fd).ok_or(FdError::OutOfRange)?;
        self.slots
            .get_mut(index)
            .map(|f| f.as_mut())
            .ok_or(FdError::Closed)
    }

    /// Remove a file from the table, handing it back to be closed.
    pub fn remove(&mut self, fd: Fd) -> Result<Box<dyn File>, FdError> {
        let index = self.slot(fd).ok_or(FdError::OutOfRange)?;
        self.slots.try_remove(index).ok_or(FdError::Closed)
    }

    /// Close every open file.
    pub fn close_all(&mut self) {
        self.slots.clear();
    }

    /// Number of open files.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
