use crate::qemu_trace;
use core::fmt::{self, Write};
use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};

/// `log` sink that prints to QEMU's debug console.
pub struct QemuLogger {
    max_level: LevelFilter,
}

impl QemuLogger {
    #[must_use]
    pub const fn new(max_level: LevelFilter) -> Self {
        Self { max_level }
    }

    /// Install this logger as the global `log` sink. Call once during early init.
    ///
    /// # Errors
    /// Fails if another logger was installed first.
    pub fn init(&'static self) -> Result<(), SetLoggerError> {
        log::set_logger(self)?;
        log::set_max_level(self.max_level);
        Ok(())
    }
}

/// Format `record` as a single `[LEVEL] target: message` line.
///
/// # Errors
/// Propagates errors from the underlying writer.
pub fn write_record<W: Write>(out: &mut W, record: &Record) -> fmt::Result {
    writeln!(out, "[{}] {}: {}", record.level(), record.target(), record.args())
}

struct TraceSink;

impl Write for TraceSink {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        qemu_trace!("{s}");
        Ok(())
    }
}

impl Log for QemuLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.max_level
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let _ = write_record(&mut TraceSink, record);
        }
    }

    fn flush(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use log::Level;

    #[test]
    fn record_line_format() {
        let mut out = String::new();
        write_record(
            &mut out,
            &Record::builder()
                .level(Level::Warn)
                .target("kernel_alloc::frame_pool")
                .args(format_args!("release of frame {:#x} rejected", 0x402))
                .build(),
        )
        .unwrap();
        assert_eq!(
            out,
            "[WARN] kernel_alloc::frame_pool: release of frame 0x402 rejected\n"
        );
    }

    #[test]
    fn filters_by_level() {
        let logger = QemuLogger::new(LevelFilter::Info);
        let debug = Metadata::builder().level(Level::Debug).build();
        let error = Metadata::builder().level(Level::Error).build();
        assert!(!logger.enabled(&debug));
        assert!(logger.enabled(&error));
    }
}
