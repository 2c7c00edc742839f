//! Logging Adapter (§4.8): a sink interface with two built-ins — a
//! side-effecting adapter delegating to the `log` crate (the donor's own
//! logging backend throughout `fsm.rs`/`datamodel.rs`), and a test adapter
//! that accumulates entries on the chart itself.

use crate::document::StateId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for log::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => log::Level::Error,
            LogLevel::Warn => log::Level::Warn,
            LogLevel::Info => log::Level::Info,
            LogLevel::Debug => log::Level::Debug,
            LogLevel::Trace => log::Level::Trace,
        }
    }
}

/// Metadata automatically attached to every action-invoked log entry (§4.8):
/// the live leaf configuration, the current event name (if any), and a
/// caller-supplied action type/phase label.
#[derive(Debug, Clone, Default)]
pub struct LogMetadata {
    pub configuration: Vec<StateId>,
    pub event: Option<String>,
    pub phase: String,
}

#[derive(Debug, Clone)]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
    pub metadata: LogMetadata,
}

pub trait LogAdapter: std::fmt::Debug {
    fn log(&mut self, level: LogLevel, message: String, metadata: LogMetadata);
    fn enabled(&self, level: LogLevel) -> bool;
    /// Lets `StateChart::logs` downcast to `TestLogAdapter` without widening
    /// this trait's object-safety requirements any further than `Any`.
    fn as_any(&self) -> &dyn std::any::Any;
}

/// Writes through to the `log` facade; metadata is folded into the message
/// since the `log` crate has no structured-field API without a separate
/// `kv`-feature dependency.
#[derive(Debug, Clone)]
pub struct StdLogAdapter {
    pub min_level: LogLevel,
}

impl StdLogAdapter {
    pub fn new(min_level: LogLevel) -> Self {
        StdLogAdapter { min_level }
    }
}

impl Default for StdLogAdapter {
    fn default() -> Self {
        StdLogAdapter::new(LogLevel::Info)
    }
}

impl LogAdapter for StdLogAdapter {
    fn log(&mut self, level: LogLevel, message: String, metadata: LogMetadata) {
        if !self.enabled(level) {
            return;
        }
        log::log!(
            level.into(),
            "[{}] {} (config={:?}, event={:?})",
            metadata.phase,
            message,
            metadata.configuration,
            metadata.event
        );
    }

    fn enabled(&self, level: LogLevel) -> bool {
        level <= self.min_level
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

/// Accumulates entries for test assertions instead of emitting them
/// anywhere (§6 `logs(state_chart) -> ordered list (test adapter only)`).
#[derive(Debug, Clone, Default)]
pub struct TestLogAdapter {
    pub min_level: LogLevel,
    pub entries: Vec<LogEntry>,
}

impl TestLogAdapter {
    pub fn new(min_level: LogLevel) -> Self {
        TestLogAdapter {
            min_level,
            entries: Vec::new(),
        }
    }
}

impl LogAdapter for TestLogAdapter {
    fn log(&mut self, level: LogLevel, message: String, metadata: LogMetadata) {
        if self.enabled(level) {
            self.entries.push(LogEntry {
                level,
                message,
                metadata,
            });
        }
    }

    fn enabled(&self, level: LogLevel) -> bool {
        level <= self.min_level
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

impl Default for LogLevel {
    fn default() -> Self {
        LogLevel::Info
    }
}
