use crate::console_print;
use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};

pub struct ConsoleLogger {
    max_level: LevelFilter,
}

impl ConsoleLogger {
    #[must_use]
    pub const fn new(max_level: LevelFilter) -> Self {
        Self { max_level }
    }

    /// Call this once during early init.
    #[allow(static_mut_refs, clippy::missing_errors_doc)]
    pub fn init(self) -> Result<(), SetLoggerError> {
        // set_logger needs a &'static dyn Log and the loader has no heap yet.
        static mut LOGGER: Option<ConsoleLogger> = None;

        let max_level = self.max_level;
        let logger: &'static ConsoleLogger = unsafe { LOGGER.insert(self) };
        log::set_logger(logger)?;
        log::set_max_level(max_level);
        Ok(())
    }
}

impl Log for ConsoleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.max_level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        // "[LEVEL] target: message\n", formatted straight into the sink.
        console_print!(
            "[{}] {}: {}\n",
            record.level(),
            record.target(),
            record.args()
        );
    }

    fn flush(&self) {
        // polled console, nothing buffered
    }
}
