//! Kernel logging facility
//!
//! Routes the `log` facade to the serial port as `"[LEVEL] message"` lines.
//! Log levels are configured based on build configuration (debug/release).

use core::fmt;

use log::{Level, LevelFilter, Log, Metadata, Record, SetLoggerError};
use spin::Mutex;

/// Global logger instance, writing to COM1
pub static LOGGER: Logger = Logger::new();

/// Where formatted lines end up.
pub type Sink = fn(fmt::Arguments);

/// Serializes whole lines onto a sink
pub struct Logger {
    sink: Mutex<Sink>,
}

impl Default for Logger {
    fn default() -> Self {
        Self::new()
    }
}

impl Logger {
    pub const fn new() -> Logger {
        Logger::with_sink(crate::serial::_print)
    }

    pub const fn with_sink(sink: Sink) -> Logger {
        Logger {
            sink: Mutex::new(sink),
        }
    }

    /// Writes one `"[LEVEL] message"` line, whatever the global level.
    pub fn write_line(&self, level: Level, args: fmt::Arguments) {
        let sink = self.sink.lock();
        (*sink)(format_args!("[{}] {}\n", level, args));
    }
}

impl Log for Logger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            self.write_line(record.level(), *record.args());
        }
    }

    fn flush(&self) {}
}

/// Level installed by [`init`]: `Debug` in debug builds, `Info` otherwise.
pub const fn default_level() -> LevelFilter {
    if cfg!(debug_assertions) {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    }
}

/// Installs [`LOGGER`]. Only core 0 does anything.
pub fn init(cpu_id: u32) -> Result<(), SetLoggerError> {
    if cpu_id == 0 {
        log::set_logger(&LOGGER)?;
        log::set_max_level(default_level());
    }
    Ok(())
}

/// Convenience macro for trace-level logging
#[macro_export]
macro_rules! trace {
    ($($arg:tt)*) => (log::trace!($($arg)*));
}

/// Convenience macro for debug-level logging
#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => (log::debug!($($arg)*));
}

/// Convenience macro for info-level logging
#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => (log::info!($($arg)*));
}

/// Convenience macro for warning-level logging
#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => (log::warn!($($arg)*));
}

/// Convenience macro for error-level logging
#[macro_export]
macro_rules! error {
    ($($arg:tt)*) => (log::error!($($arg)*));
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::String;

    static CAPTURED: Mutex<String> = Mutex::new(String::new());

    fn capture(args: fmt::Arguments) {
        use core::fmt::Write;
        let _ = CAPTURED.lock().write_fmt(args);
    }

    #[test]
    fn lines_carry_their_level() {
        let logger = Logger::with_sink(capture);
        logger.write_line(Level::Warn, format_args!("vm: too many regions"));
        assert_eq!(CAPTURED.lock().as_str(), "[WARN] vm: too many regions\n");
    }

    #[test]
    fn default_level_follows_build_profile() {
        let expected = if cfg!(debug_assertions) {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        };
        assert_eq!(default_level(), expected);
    }
}
