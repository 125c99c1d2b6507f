//! Kernel log sink.
//!
//! Routes `log` records to a [`Console`] as `[LEVEL] target: message` lines.
//! Until a console is attached, records are dropped.
//!
//! The sink should be a diagnostics port separate from the user console.
//! Per-process events (launch, exit) log at `debug`, below the default
//! [`DEFAULT_LEVEL`], so even a shared console carries only the user stream
//! and the `name: exit(status)` records in normal operation.

use alloc::format;
use alloc::sync::Arc;

use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};
use spin::Once;

use crate::platform::Console;

/// A `log` backend writing to the kernel console.
pub struct ConsoleLogger {
    console: Once<Arc<dyn Console>>,
    level: LevelFilter,
}

impl ConsoleLogger {
    pub const fn new(level: LevelFilter) -> Self {
        Self {
            console: Once::new(),
            level,
        }
    }

    /// Attach the output console. Only the first call has an effect.
    pub fn attach(&self, console: Arc<dyn Console>) {
        self.console.call_once(|| console);
    }
}

impl Log for ConsoleLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        if let Some(console) = self.console.get() {
            let line = format!("[{}] {}: {}\n", record.level(), record.target(), record.args());
            console.put(line.as_bytes());
        }
    }

    fn flush(&self) {}
}

/// Level of the global logger.
pub const DEFAULT_LEVEL: LevelFilter = LevelFilter::Warn;

static LOGGER: ConsoleLogger = ConsoleLogger::new(DEFAULT_LEVEL);

/// Install the global logger on the diagnostics sink `console`.
pub fn init(console: Arc<dyn Console>) -> Result<(), SetLoggerError> {
    LOGGER.attach(console);
    log::set_logger(&LOGGER)?;
    log::set_max_level(LOGGER.level);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Harness, TestConsole};
    use log::Level;

    fn emit(logger: &ConsoleLogger, level: Level, message: &str) {
        logger.log(
            &Record::builder()
                .level(level)
                .target("userprog")
                .args(format_args!("{}", message))
                .build(),
        );
    }

    #[test]
    fn test_records_are_formatted() {
        let console = Arc::new(TestConsole::default());
        let logger = ConsoleLogger::new(LevelFilter::Info);
        emit(&logger, Level::Info, "dropped before attach");

        logger.attach(console.clone());
        emit(&logger, Level::Warn, "page fault");
        emit(&logger, Level::Debug, "too verbose");
        assert_eq!(console.output(), "[WARN] userprog: page fault\n");
    }

    #[test]
    fn test_process_events_stay_out_of_user_stream() {
        let harness = Harness::new();
        // Only this test installs the global logger. Other tests running
        // concurrently may add fault warnings, which are filtered below.
        let _ = init(harness.console.clone());
        assert_eq!(log::max_level(), DEFAULT_LEVEL);

        harness.program("child", |ctx| {
            assert_eq!(ctx.write(1, b"hi\n"), 3);
            7
        });
        let tid = harness.kernel.execute(b"child").unwrap();
        assert_eq!(harness.kernel.wait(tid), 7);

        let output = harness.output();
        assert!(!output.contains("[INFO]") && !output.contains("[DEBUG]"), "{:?}", output);
        let user: String = output
            .split_inclusive('\n')
            .filter(|line| !line.starts_with("[WARN]") && !line.starts_with("[ERROR]"))
            .collect();
        assert_eq!(user, "hi\nchild: exit(7)\n");
    }
}
