//! Kernel-side backend for the `log` facade.
//!
//! Records are formatted as `LEVEL target: message`. They go to the console
//! sink if one was registered, and into an in-memory capture buffer while
//! capture is switched on.

use alloc::string::String;
use alloc::vec::Vec;
use core::fmt::{self, Write as _};
use core::sync::atomic::{AtomicBool, Ordering};

use log::{LevelFilter, Log, Metadata, Record};
use spin::{Mutex, Once};

/// Console writer, typically the serial port.
pub type Sink = fn(fmt::Arguments<'_>);

pub struct KernelLogger {
    capture_enabled: AtomicBool,
    captured: Mutex<Vec<String>>,
    sink: Once<Sink>,
}

impl KernelLogger {
    const fn new() -> Self {
        Self {
            capture_enabled: AtomicBool::new(false),
            captured: Mutex::new(Vec::new()),
            sink: Once::new(),
        }
    }
}

impl Log for KernelLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }

        if let Some(sink) = self.sink.get() {
            sink(format_args!(
                "{} {}: {}\n",
                record.level(),
                record.target(),
                record.args()
            ));
        }

        if self.capture_enabled.load(Ordering::Relaxed) {
            let mut line = String::new();
            let _ = write!(line, "{} {}: {}", record.level(), record.target(), record.args());
            self.captured.lock().push(line);
        }
    }

    fn flush(&self) {}
}

static LOGGER: KernelLogger = KernelLogger::new();
static INSTALLED: Once<()> = Once::new();

/// Install the kernel logger (first call only) and set the max level.
pub fn init(level: LevelFilter) {
    INSTALLED.call_once(|| {
        // Someone else already owning the facade is fine; we only lose output.
        let _ = log::set_logger(&LOGGER);
    });
    log::set_max_level(level);
}

/// Like [`init`], with the level taken from `PROCIMAGE_LOG` at build time.
pub fn init_from_env() {
    init(parse_level(option_env!("PROCIMAGE_LOG")));
}

fn parse_level(value: Option<&str>) -> LevelFilter {
    value
        .and_then(|name| name.parse::<LevelFilter>().ok())
        .unwrap_or(LevelFilter::Warn)
}

/// Register the console sink. Only the first registration sticks.
pub fn set_sink(sink: Sink) {
    LOGGER.sink.call_once(|| sink);
}

pub fn enable_capture(enabled: bool) {
    LOGGER.capture_enabled.store(enabled, Ordering::Relaxed);
}

/// Drain everything captured so far.
pub fn take_captured() -> Vec<String> {
    core::mem::take(&mut *LOGGER.captured.lock())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level(Some("trace")), LevelFilter::Trace);
        assert_eq!(parse_level(Some("DEBUG")), LevelFilter::Debug);
        assert_eq!(parse_level(Some("loud")), LevelFilter::Warn);
        assert_eq!(parse_level(None), LevelFilter::Warn);
    }

    #[test]
    fn test_capture() {
        init(LevelFilter::Trace);
        enable_capture(true);
        log::info!(target: "procimage::logging", "captured {}", 7);

        let lines = take_captured();
        assert!(lines
            .iter()
            .any(|line| line == "INFO procimage::logging: captured 7"));
    }
}
