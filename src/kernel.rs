//! Kernel context for the user program subsystem.
//!
//! [`Kernel`] bundles the collaborator services, the two page pools and the
//! process table. It is created once at boot and shared by every thread as
//! an `Arc`.

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::Arc;

use log::{debug, info};
use spin::Mutex;

use crate::config::Config;
use crate::mm::PagePool;
use crate::platform::{Console, FileSystem, Machine, Scheduler, Tid};
use crate::process::Process;

/// Services provided by the rest of the kernel.
#[derive(Clone)]
pub struct Services {
    pub scheduler: Arc<dyn Scheduler>,
    pub machine: Arc<dyn Machine>,
    pub console: Arc<dyn Console>,
    pub filesystem: Arc<dyn FileSystem>,
}

/// Shared state of the user program subsystem.
pub struct Kernel {
    config: Config,
    services: Services,
    /// Kernel-owned pages (command-line buffers).
    kernel_pool: PagePool,
    /// Pages reserved for user processes.
    user_pool: PagePool,
    processes: Mutex<BTreeMap<Tid, Arc<Process>>>,
}

impl Kernel {
    pub fn new(config: Config, services: Services) -> Arc<Self> {
        info!(
            "userprog: kernel pool {} pages, user pool {} pages, {} files per process",
            config.kernel_pool_pages, config.user_pool_pages, config.max_open_files
        );
        Arc::new(Self {
            kernel_pool: PagePool::new("kernel", config.kernel_pool_pages),
            user_pool: PagePool::new("user", config.user_pool_pages),
            config,
            services,
            processes: Mutex::new(BTreeMap::new()),
        })
    }

    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[inline]
    pub fn scheduler(&self) -> &dyn Scheduler {
        &*self.services.scheduler
    }

    #[inline]
    pub fn machine(&self) -> &dyn Machine {
        &*self.services.machine
    }

    #[inline]
    pub fn console(&self) -> &dyn Console {
        &*self.services.console
    }

    #[inline]
    pub fn filesystem(&self) -> &dyn FileSystem {
        &*self.services.filesystem
    }

    #[inline]
    pub fn kernel_pool(&self) -> &PagePool {
        &self.kernel_pool
    }

    #[inline]
    pub fn user_pool(&self) -> &PagePool {
        &self.user_pool
    }

    /// Register the running thread as the root process.
    ///
    /// The root has no parent and no address space; it can launch and wait
    /// for children, and is torn down with [`Kernel::finish_root`].
    pub fn init_root(&self, name: &str) -> Arc<Process> {
        let process = Arc::new(Process::new(
            self.scheduler().current(),
            String::from(name),
            None,
            self.config.max_open_files,
        ));
        self.register(process.clone());
        process
    }

    /// The process running on the current thread.
    pub fn current_process(&self) -> Option<Arc<Process>> {
        self.process(self.scheduler().current())
    }

    /// Look up a live process.
    pub fn process(&self, tid: Tid) -> Option<Arc<Process>> {
        self.processes.lock().get(&tid).cloned()
    }

    /// Number of live processes, including the root.
    pub fn process_count(&self) -> usize {
        self.processes.lock().len()
    }

    pub(crate) fn register(&self, process: Arc<Process>) {
        debug!("process: register {} ({})", process.tid(), process.name());
        self.processes.lock().insert(process.tid(), process);
    }

    pub(crate) fn unregister(&self, tid: Tid) {
        if self.processes.lock().remove(&tid).is_some() {
            debug!("process: unregister {}", tid);
        }
    }

    /// Context-switch hook: load `process`'s address space into the MMU.
    ///
    /// A process without one gets the kernel-only mapping. Takes no locks,
    /// so it is safe while the outgoing or incoming thread holds any of them;
    /// the scheduler passes the record it keeps for the incoming thread.
    pub fn activate(&self, process: &Process) {
        self.machine().activate(process.active_root());
    }
}

impl core::fmt::Debug for Kernel {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Kernel")
            .field("config", &self.config)
            .field("kernel_pool", &self.kernel_pool)
            .field("user_pool", &self.user_pool)
            .field("processes", &self.process_count())
            .finish()
    }
}
