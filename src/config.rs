//! Kernel tunables for the user program subsystem.
//!
//! Architectural constants (page size, the user/kernel boundary) live in
//! [`crate::mm::address`]. The limits here may be adjusted per build or per
//! test; [`Config::default`] matches the stock kernel.

/// Maximum number of command-line arguments passed to a new process.
pub const MAX_ARGS: usize = 32;

/// Capacity of a process's open-file table.
pub const MAX_OPEN_FILES: usize = 128;

/// Upper bound on program headers in an executable.
pub const MAX_PROGRAM_HEADERS: u16 = 1024;

/// Longest process name kept for termination records.
pub const NAME_MAX: usize = 15;

/// Limits consulted by the launcher, loader and syscall layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Tokens kept from a command line.
    pub max_args: usize,
    /// Open files per process.
    pub max_open_files: usize,
    /// Program headers accepted in one executable.
    pub max_program_headers: u16,
    /// Pages in the kernel pool (command-line buffers).
    pub kernel_pool_pages: usize,
    /// Pages in the process-reserved user pool (segments and stacks).
    pub user_pool_pages: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_args: MAX_ARGS,
            max_open_files: MAX_OPEN_FILES,
            max_program_headers: MAX_PROGRAM_HEADERS,
            kernel_pool_pages: 64,
            user_pool_pages: 1024,
        }
    }
}
