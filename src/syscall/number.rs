//! System call numbers and argument schemas.

use super::SyscallError;

/// How one 32-bit argument slot is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    /// Signed integer (descriptors, pids, statuses).
    Int,
    /// Unsigned integer (sizes, positions).
    Uint,
    /// Pointer to a NUL-terminated user string.
    Str,
    /// Pointer to a user buffer whose length is another argument.
    Ptr,
}

use ArgKind::{Int, Ptr, Str, Uint};

/// System call numbers, as pushed by user code below the arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Sysno {
    Halt = 0,
    Exit = 1,
    Exec = 2,
    Wait = 3,
    Create = 4,
    Remove = 5,
    Open = 6,
    Filesize = 7,
    Read = 8,
    Write = 9,
    Seek = 10,
    Tell = 11,
    Close = 12,
    Sleep = 13,
}

impl Sysno {
    /// Argument slots, in stack order.
    pub const fn schema(self) -> &'static [ArgKind] {
        match self {
            Self::Halt => &[],
            Self::Exit => &[Int],
            Self::Exec => &[Str],
            Self::Wait => &[Int],
            Self::Create => &[Str, Uint],
            Self::Remove => &[Str],
            Self::Open => &[Str],
            Self::Filesize => &[Int],
            Self::Read => &[Int, Ptr, Uint],
            Self::Write => &[Int, Ptr, Uint],
            Self::Seek => &[Int, Uint],
            Self::Tell => &[Int],
            Self::Close => &[Int],
            Self::Sleep => &[Int],
        }
    }
}

impl TryFrom<u32> for Sysno {
    type Error = SyscallError;

    fn try_from(number: u32) -> Result<Self, Self::Error> {
        Ok(match number {
            0 => Self::Halt,
            1 => Self::Exit,
            2 => Self::Exec,
            3 => Self::Wait,
            4 => Self::Create,
            5 => Self::Remove,
            6 => Self::Open,
            7 => Self::Filesize,
            8 => Self::Read,
            9 => Self::Write,
            10 => Self::Seek,
            11 => Self::Tell,
            12 => Self::Close,
            13 => Self::Sleep,
            other => return Err(SyscallError::UnknownSyscall(other)),
        })
    }
}
