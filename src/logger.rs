//! `log` backend that prints to the serial console.

use core::fmt::Write;
use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};

/// Logger that forwards every enabled record to COM1.
pub struct SerialLogger;

static LOGGER: SerialLogger = SerialLogger;

impl Log for SerialLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let mut line = SerialLine;
        let _ = write_record(&mut line, record);
    }

    fn flush(&self) {}
}

/// Adapter so `write_record` can target the serial port directly.
struct SerialLine;

impl Write for SerialLine {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        crate::serial::write(format_args!("{}", s));
        Ok(())
    }
}

/// Format one record as `[LEVEL] target: message\n`.
pub fn write_record(out: &mut impl Write, record: &Record) -> core::fmt::Result {
    writeln!(out, "[{}] {}: {}", record.level(), record.target(), record.args())
}

/// Install the serial logger. Only the first call succeeds.
pub fn init(level: LevelFilter) -> Result<(), SetLoggerError> {
    crate::serial::init();
    log::set_logger(&LOGGER)?;
    log::set_max_level(level);
    Ok(())
}
