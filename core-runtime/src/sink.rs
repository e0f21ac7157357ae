//! # Host Logger Sinks
//!
//! Structured log entries and the [`LoggerSink`] trait used to mirror
//! `tracing` events into a host logging pipeline.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Write;

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Filter directive for this level.
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl From<tracing::Level> for LogLevel {
    fn from(level: tracing::Level) -> Self {
        match level {
            tracing::Level::TRACE => LogLevel::Trace,
            tracing::Level::DEBUG => LogLevel::Debug,
            tracing::Level::INFO => LogLevel::Info,
            tracing::Level::WARN => LogLevel::Warn,
            tracing::Level::ERROR => LogLevel::Error,
        }
    }
}

/// Structured log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    /// Log level
    pub level: LogLevel,
    /// Timestamp
    pub timestamp: DateTime<Utc>,
    /// Target module/component
    pub target: String,
    /// Log message
    pub message: String,
    /// Structured fields
    pub fields: HashMap<String, String>,
    /// Name of the span the event was emitted in
    pub span: Option<String>,
}

impl LogEntry {
    pub fn new(level: LogLevel, target: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level,
            timestamp: Utc::now(),
            target: target.into(),
            message: message.into(),
            fields: HashMap::new(),
            span: None,
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn with_span(mut self, span: impl Into<String>) -> Self {
        self.span = Some(span.into());
        self
    }
}

/// Logger sink trait
///
/// Receives every event that survives filtering. Called synchronously on the
/// thread that emitted the event, which may be the decode worker, so
/// implementations should not block for long.
pub trait LoggerSink: Send + Sync {
    /// Forward a log entry to the host logging system
    fn log(&self, entry: LogEntry) -> Result<()>;

    /// Flush any buffered logs
    fn flush(&self) -> Result<()> {
        Ok(())
    }

    /// Minimum level this sink wants to receive
    fn min_level(&self) -> LogLevel {
        LogLevel::Info
    }
}

/// Sink that writes one line per entry to stderr.
#[derive(Debug, Clone)]
pub struct ConsoleLogger {
    pub min_level: LogLevel,
}

impl Default for ConsoleLogger {
    fn default() -> Self {
        Self {
            min_level: LogLevel::Info,
        }
    }
}

impl LoggerSink for ConsoleLogger {
    fn log(&self, entry: LogEntry) -> Result<()> {
        if entry.level < self.min_level {
            return Ok(());
        }

        let mut line = format!(
            "[{}] {:>5} {}: {}",
            entry.timestamp.format("%Y-%m-%d %H:%M:%S%.3f"),
            entry.level.as_str().to_ascii_uppercase(),
            entry.target,
            entry.message
        );
        let mut fields: Vec<_> = entry.fields.iter().collect();
        fields.sort();
        for (key, value) in fields {
            line.push_str(&format!(" {}={}", key, value));
        }

        writeln!(std::io::stderr().lock(), "{}", line)
        .map_err(|e| Error::Sink(e.to_string()))
    }

    fn flush(&self) -> Result<()> {
        std::io::stderr()
            .flush()
            .map_err(|e| Error::Sink(e.to_string()))
    }

    fn min_level(&self) -> LogLevel {
        self.min_level
    }
}

/// Sink that keeps entries in memory, for hosts that poll logs and for tests.
#[derive(Debug, Default)]
pub struct MemoryLogger {
    entries: Mutex<Vec<LogEntry>>,
    min_level: Option<LogLevel>,
}

impl MemoryLogger {
    pub fn new(min_level: LogLevel) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            min_level: Some(min_level),
        }
    }

    /// Entries collected so far.
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().clone()
    }

    /// Remove and return the collected entries.
    pub fn drain(&self) -> Vec<LogEntry> {
        std::mem::take(&mut *self.entries.lock())
    }
}

impl LoggerSink for MemoryLogger {
    fn log(&self, entry: LogEntry) -> Result<()> {
        self.entries.lock().push(entry);
        Ok(())
    }

    fn min_level(&self) -> LogLevel {
        self.min_level.unwrap_or(LogLevel::Trace)
    }
}
