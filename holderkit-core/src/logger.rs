//! Bridge from the crate's `tracing` output to a host-provided logger.

use std::sync::Arc;

/// Trait representing a logger that can log messages at various levels.
///
/// This trait should be implemented by the host application to receive the
/// runtime's log messages (scheduler cycles, ticket resolutions, storage
/// failures).
///
/// # Examples
///
/// Implementing the `Logger` trait:
///
/// ```rust
/// use holderkit_core::logger::{Logger, LogLevel};
///
/// struct MyLogger;
///
/// impl Logger for MyLogger {
///     fn log(&self, level: LogLevel, message: String) {
///         println!("[{:?}] {}", level, message);
///     }
/// }
/// ```
pub trait Logger: Sync + Send {
    /// Logs a message at the specified log level.
    ///
    /// # Arguments
    ///
    /// * `level` - The severity level of the log message.
    /// * `message` - The log message to be recorded.
    fn log(&self, level: LogLevel, message: String);
}

/// Enumeration of possible log levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Designates very low priority, often extremely detailed messages.
    Trace,
    /// Designates lower priority debugging information.
    Debug,
    /// Designates informational messages that highlight the progress of the application.
    Info,
    /// Designates potentially harmful situations.
    Warn,
    /// Designates error events that might still allow the application to continue running.
    Error,
}

/// Forwards `log` records to a host-provided [`Logger`].
///
/// `tracing` events emitted by this crate reach the `log` facade through
/// tracing's `log` feature when no subscriber is installed.
struct ForeignLogger {
    inner: Arc<dyn Logger>,
}

impl log::Log for ForeignLogger {
    fn enabled(&self, _metadata: &log::Metadata) -> bool {
        true
    }

    fn log(&self, record: &log::Record) {
        let is_record_from_holderkit = record
            .module_path()
            .is_some_and(|module_path| module_path.starts_with("holderkit"));

        let is_debug_or_trace_level =
            record.level() == log::Level::Debug || record.level() == log::Level::Trace;

        // Debug and trace output from dependencies (reqwest, hyper...) is noise for the host.
        if is_debug_or_trace_level && !is_record_from_holderkit {
            return;
        }

        self.inner
            .log(log_level(record.level()), format!("{}", record.args()));
    }

    fn flush(&self) {}
}

/// Converts a `log::Level` to a `LogLevel`.
const fn log_level(level: log::Level) -> LogLevel {
    match level {
        log::Level::Error => LogLevel::Error,
        log::Level::Warn => LogLevel::Warn,
        log::Level::Info => LogLevel::Info,
        log::Level::Debug => LogLevel::Debug,
        log::Level::Trace => LogLevel::Trace,
    }
}

/// Installs `logger` as the destination of every log record.
///
/// Only the first call has an effect; the `log` facade accepts a single
/// logger per process and later calls are reported and ignored.
pub fn set_logger(logger: Arc<dyn Logger>) {
    if let Err(e) = log::set_boxed_logger(Box::new(ForeignLogger { inner: logger })) {
        eprintln!("Failed to set logger: {e}");
        return;
    }
    log::set_max_level(log::LevelFilter::Trace);
}
