//! Command-line handling for new processes.
//!
//! The command line is copied into a kernel page before the new thread
//! starts, split on ASCII whitespace there, and finally laid out on the
//! user stack in the i386 calling convention:
//!
//! ```text
//!   PHYS_BASE  ->  argument strings (last argument highest)
//!                  padding to a 4-byte boundary
//!                  0                        (argv[argc])
//!                  argv[argc-1] .. argv[0]  (string addresses)
//!                  argv                     (address of argv[0])
//!                  argc
//!   esp        ->  0                        (return address)
//! ```

use alloc::string::String;
use alloc::vec::Vec;

use log::warn;

use crate::config::NAME_MAX;
use crate::mm::address::{PAGE_SIZE, WORD_SIZE};
use crate::mm::{AllocFlags, Frame, MappingError, PageDirectory, PagePool, VirtAddr};

/// A command line held in one kernel page.
///
/// The page returns to its pool when this is dropped.
pub struct CommandLine {
    page: Frame,
    len: usize,
}

impl CommandLine {
    /// Copy `line` into a fresh page from `pool`.
    ///
    /// Copying stops at the first NUL and keeps at most `PAGE_SIZE - 1`
    /// bytes. Returns `None` when the pool is exhausted.
    pub fn copy_from(pool: &PagePool, line: &[u8]) -> Option<Self> {
        let mut page = pool.alloc(AllocFlags::empty())?;
        let end = line.iter().position(|&b| b == 0).unwrap_or(line.len());
        let len = end.min(PAGE_SIZE - 1);

        let bytes = page.as_bytes_mut();
        bytes[..len].copy_from_slice(&line[..len]);
        bytes[len] = 0;
        Some(Self { page, len })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.page.as_bytes()[..self.len]
    }
}

impl core::fmt::Debug for CommandLine {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "CommandLine({:?})", String::from_utf8_lossy(self.as_bytes()))
    }
}

/// Split `line` on runs of ASCII whitespace, keeping at most `max_args` tokens.
pub fn tokenize(line: &[u8], max_args: usize) -> Vec<&[u8]> {
    let mut tokens = line.split(|b| b.is_ascii_whitespace()).filter(|t| !t.is_empty());
    let argv: Vec<&[u8]> = tokens.by_ref().take(max_args).collect();
    let dropped = tokens.count();
    if dropped > 0 {
        warn!("exec: dropped {} arguments beyond the limit of {}", dropped, max_args);
    }
    argv
}

/// Process name for termination records: the first token, cut to `NAME_MAX` bytes.
pub fn process_name(line: &[u8]) -> String {
    let first = line
        .split(|b| b.is_ascii_whitespace())
        .find(|t| !t.is_empty())
        .unwrap_or_default();
    let cut = &first[..first.len().min(NAME_MAX)];
    String::from_utf8_lossy(cut).into_owned()
}

/// Error type for initial stack construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackError {
    /// The arguments do not fit in the stack page.
    Overflow,
    /// The stack page is not mapped.
    Mapping(MappingError),
}

impl From<MappingError> for StackError {
    fn from(e: MappingError) -> Self {
        Self::Mapping(e)
    }
}

impl core::fmt::Display for StackError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Overflow => write!(f, "arguments overflow the stack page"),
            Self::Mapping(e) => write!(f, "stack not mapped: {}", e),
        }
    }
}

/// Downward-growing writer confined to the single page below `top`.
struct StackWriter<'a> {
    dir: &'a mut PageDirectory,
    esp: u32,
    floor: u32,
}

impl<'a> StackWriter<'a> {
    fn new(dir: &'a mut PageDirectory, top: VirtAddr) -> Self {
        let esp = top.as_u32();
        Self {
            dir,
            esp,
            floor: esp.saturating_sub(PAGE_SIZE as u32),
        }
    }

    fn reserve(&mut self, len: usize) -> Result<VirtAddr, StackError> {
        let len = u32::try_from(len).map_err(|_| StackError::Overflow)?;
        let esp = self
            .esp
            .checked_sub(len)
            .filter(|&esp| esp >= self.floor)
            .ok_or(StackError::Overflow)?;
        self.esp = esp;
        Ok(VirtAddr::new(esp))
    }

    fn push_bytes(&mut self, bytes: &[u8]) -> Result<VirtAddr, StackError> {
        let at = self.reserve(bytes.len())?;
        self.dir.write(at, bytes)?;
        Ok(at)
    }

    fn push_c_string(&mut self, s: &[u8]) -> Result<VirtAddr, StackError> {
        let at = self.reserve(s.len() + 1)?;
        self.dir.write(at, s)?;
        let nul = at.checked_add(s.len() as u32).ok_or(StackError::Overflow)?;
        self.dir.write(nul, &[0])?;
        Ok(at)
    }

    fn push_word(&mut self, word: u32) -> Result<VirtAddr, StackError> {
        self.push_bytes(&word.to_le_bytes())
    }

    fn align(&mut self) {
        self.esp &= !(WORD_SIZE - 1);
    }
}

/// Lay out `argv` below `top` in `dir`; returns the initial stack pointer.
pub fn build_stack(
    dir: &mut PageDirectory,
    top: VirtAddr,
    argv: &[&[u8]],
) -> Result<VirtAddr, StackError> {
    let mut stack = StackWriter::new(dir, top);

    let mut addrs = Vec::with_capacity(argv.len());
    for arg in argv.iter().rev() {
        addrs.push(stack.push_c_string(arg)?);
    }

    stack.align();
    stack.push_word(0)?;
    // `addrs` runs from the last argument to the first.
    for addr in &addrs {
        stack.push_word(addr.as_u32())?;
    }
    let argv_addr = stack.esp;
    stack.push_word(argv_addr)?;
    stack.push_word(argv.len() as u32)?;
    let esp = stack.push_word(0)?;
    Ok(esp)
}
