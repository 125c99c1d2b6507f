//! Process launch.
//!
//! `execute` runs on the creator's thread; `start_process` is the body of
//! the new thread. The two meet through a [`LaunchRequest`]:
//!
//! 1. the creator spawns the thread, links the new relation into its own
//!    child list and signals `linked`;
//! 2. the new thread waits for `linked`, registers itself, loads the
//!    executable and builds its stack;
//! 3. the new thread records success or failure and signals `started`;
//! 4. the creator, blocked on `started`, returns the new tid or an error.
//!
//! The command-line page belongs to exactly one side at any time: it moves
//! into the thread body on spawn and is dropped before `started` is raised.
//! If the thread cannot be created the body is dropped unrun, taking the
//! page with it.

use alloc::boxed::Box;
use alloc::format;
use alloc::string::String;
use alloc::sync::Arc;
use core::str;
use core::sync::atomic::{AtomicBool, Ordering};

use log::{debug, warn};
use spin::Mutex;

use super::args::{build_stack, process_name, tokenize, CommandLine, StackError};
use super::lifecycle::{relation, ChildClaim};
use super::Process;
use crate::elf::{load_executable, LoadError};
use crate::kernel::Kernel;
use crate::mm::PageDirectory;
use crate::platform::{Scheduler, Tid, UserEntry};
use crate::sync::Completion;

/// Error type for process launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchError {
    /// The calling thread is not a registered process.
    NoProcess,
    /// No kernel page was free for the command line.
    NoCommandBuffer,
    /// The scheduler could not create a thread.
    ThreadCreate,
    /// The new process failed to load and has exited.
    LoadFailed,
}

impl core::fmt::Display for LaunchError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NoProcess => write!(f, "caller is not a process"),
            Self::NoCommandBuffer => write!(f, "no page for command line"),
            Self::ThreadCreate => write!(f, "thread creation failed"),
            Self::LoadFailed => write!(f, "load failed"),
        }
    }
}

/// Why the new thread could not reach user mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StartError {
    EmptyCommand,
    /// The program name is not valid UTF-8.
    BadPath,
    Load(LoadError),
    Stack(StackError),
}

impl From<LoadError> for StartError {
    fn from(e: LoadError) -> Self {
        Self::Load(e)
    }
}

impl From<StackError> for StartError {
    fn from(e: StackError) -> Self {
        Self::Stack(e)
    }
}

impl core::fmt::Display for StartError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::EmptyCommand => write!(f, "empty command line"),
            Self::BadPath => write!(f, "program name is not UTF-8"),
            Self::Load(e) => write!(f, "{}", e),
            Self::Stack(e) => write!(f, "{}", e),
        }
    }
}

/// State shared between the creator and the new thread for one launch.
struct LaunchRequest {
    /// Raised by the creator once the relation is linked.
    linked: Completion,
    /// Raised by the new thread once loading finished either way.
    started: Completion,
    success: AtomicBool,
    relation: Mutex<Option<ChildClaim>>,
}

impl LaunchRequest {
    fn new() -> Self {
        Self {
            linked: Completion::new(),
            started: Completion::new(),
            success: AtomicBool::new(false),
            relation: Mutex::new(None),
        }
    }

    fn finish(&self, success: bool, scheduler: &dyn Scheduler) {
        self.success.store(success, Ordering::Release);
        self.started.complete(scheduler);
    }
}

impl Kernel {
    /// Start a new process running `cmd_line` as a child of the caller.
    ///
    /// Blocks until the child has loaded (or failed to load) its executable.
    pub fn execute(self: &Arc<Self>, cmd_line: &[u8]) -> Result<Tid, LaunchError> {
        let creator = self.current_process().ok_or(LaunchError::NoProcess)?;
        let cmd_line =
            CommandLine::copy_from(self.kernel_pool(), cmd_line).ok_or(LaunchError::NoCommandBuffer)?;
        let name = process_name(cmd_line.as_bytes());
        let request = Arc::new(LaunchRequest::new());

        let body = {
            let kernel = self.clone();
            let request = request.clone();
            let name = name.clone();
            Box::new(move || start_process(kernel, cmd_line, request, name))
        };
        let tid = match self.scheduler().spawn(&name, body) {
            Some(tid) => tid,
            None => {
                warn!("exec: could not create thread for {}", name);
                return Err(LaunchError::ThreadCreate);
            }
        };

        let (parent_side, child_side) = relation(tid);
        creator.lock().children.push(parent_side);
        *request.relation.lock() = Some(child_side);
        request.linked.complete(self.scheduler());

        request.started.wait(self.scheduler());
        if request.success.load(Ordering::Acquire) {
            debug!("exec: {} started {} as {}", creator.tid(), name, tid);
            Ok(tid)
        } else {
            Err(LaunchError::LoadFailed)
        }
    }

    /// Load the program named by `cmd_line` and lay out its stack.
    fn prepare_image(&self, cmd_line: &CommandLine) -> Result<(UserEntry, PageDirectory), StartError> {
        let argv = tokenize(cmd_line.as_bytes(), self.config().max_args);
        let program = argv.first().ok_or(StartError::EmptyCommand)?;
        let path = str::from_utf8(program).map_err(|_| StartError::BadPath)?;

        let loaded = load_executable(self.filesystem(), path, self.user_pool(), self.config())
            .inspect_err(|e| {
                if matches!(e, LoadError::OpenFailed | LoadError::BadHeader) {
                    let message = format!("load: {}: {}\n", path, e);
                    self.console().put(message.as_bytes());
                }
            })?;
        let mut pagedir = loaded.pagedir;
        let esp = build_stack(&mut pagedir, loaded.stack_top, &argv)?;

        Ok((
            UserEntry {
                eip: loaded.entry,
                esp,
            },
            pagedir,
        ))
    }
}

/// Body of a newly created process thread.
fn start_process(kernel: Arc<Kernel>, cmd_line: CommandLine, request: Arc<LaunchRequest>, name: String) {
    request.linked.wait(kernel.scheduler());
    let parent = request.relation.lock().take();

    let process = Arc::new(Process::new(
        kernel.scheduler().current(),
        name,
        parent,
        kernel.config().max_open_files,
    ));
    kernel.register(process.clone());

    let prepared = kernel.prepare_image(&cmd_line);
    drop(cmd_line);

    match prepared {
        Ok((entry, pagedir)) => {
            process.install(pagedir);
            kernel.activate(&process);
            debug!("exec: {} ({}) entering user mode at {}", process.tid(), process.name(), entry.eip);
            request.finish(true, kernel.scheduler());
            drop(request);
            drop(process);
            kernel.machine().enter_user(entry)
        }
        Err(e) => {
            debug!("exec: {} failed to start: {}", process.name(), e);
            request.finish(false, kernel.scheduler());
            drop(request);
            drop(process);
            kernel.exit(-1)
        }
    }
}
