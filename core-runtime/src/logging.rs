//! # Logging & Tracing Infrastructure
//!
//! One-call setup of the global `tracing` subscriber for decode hosts:
//! an [`EnvFilter`], a formatted stderr layer (pretty, JSON or compact) and
//! an optional [`LoggerSink`] mirror for host logging pipelines.
//!
//! Formatted output never goes to stdout, which is commonly where decoded
//! PCM is written.
//!
//! ## Usage
//!
//! ```no_run
//! use core_runtime::logging::{init_logging, LogFormat, LoggingConfig};
//! use core_runtime::sink::{ConsoleLogger, LogLevel};
//! use std::sync::Arc;
//!
//! let config = LoggingConfig::default()
//!     .with_format(LogFormat::Pretty)
//!     .with_level(LogLevel::Debug)
//!     .with_logger_sink(Arc::new(ConsoleLogger::default()));
//!
//! init_logging(config).expect("Failed to initialize logging");
//!
//! tracing::info!("Decoder started");
//! ```

use crate::error::{Error, Result};
use crate::sink::{LogEntry, LogLevel, LoggerSink};
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::sync::Arc;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{
    filter::EnvFilter,
    layer::{Context, SubscriberExt},
    registry::LookupSpan,
    util::SubscriberInitExt,
    Layer,
};

/// Crates that log at the configured level by default. Everything else
/// (notably the codec library) is held at `warn`.
const WORKSPACE_CRATES: &[&str] = &["pcm_stream_workspace", "core_decode", "core_runtime"];

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Multi-line, human readable
    Pretty,
    /// One JSON object per event
    Json,
    /// Single line per event
    Compact,
}

impl Default for LogFormat {
    fn default() -> Self {
        if cfg!(debug_assertions) {
            Self::Pretty
        } else {
            Self::Json
        }
    }
}

/// Logging configuration
#[derive(Clone)]
pub struct LoggingConfig {
    pub format: LogFormat,
    /// Level for workspace crates when no custom filter is set
    pub level: LogLevel,
    /// Full `EnvFilter` directive string, overrides `level`
    pub filter: Option<String>,
    /// Mirror of every surviving event, for host integration
    pub logger_sink: Option<Arc<dyn LoggerSink>>,
    /// Log span enter/exit (pretty) or span context (JSON)
    pub enable_spans: bool,
    pub display_target: bool,
    /// Thread names and ids; the decode worker runs on a named thread
    pub display_thread_info: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            level: LogLevel::Info,
            filter: None,
            logger_sink: None,
            enable_spans: true,
            display_target: true,
            display_thread_info: false,
        }
    }
}

impl LoggingConfig {
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn with_logger_sink(mut self, sink: Arc<dyn LoggerSink>) -> Self {
        self.logger_sink = Some(sink);
        self
    }

    pub fn with_spans(mut self, enable: bool) -> Self {
        self.enable_spans = enable;
        self
    }

    pub fn with_target(mut self, display: bool) -> Self {
        self.display_target = display;
        self
    }

    pub fn with_thread_info(mut self, display: bool) -> Self {
        self.display_thread_info = display;
        self
    }
}

/// Install the global subscriber described by `config`.
///
/// # Errors
///
/// [`Error::Config`] if the filter does not parse or a global subscriber is
/// already installed.
pub fn init_logging(config: LoggingConfig) -> Result<()> {
    let filter = build_filter(&config)?;

    tracing_subscriber::registry()
        .with(filter)
        .with(format_layer(&config))
        .with(LoggerSinkLayer::new(config.logger_sink.clone()))
        .try_init()
        .map_err(|e| Error::Config(format!("Failed to initialize logging: {}", e)))
}

/// Install a subscriber that writes through the test harness.
///
/// Safe to call from every test; only the first call in a process installs
/// anything.
pub fn init_test_logging(level: LogLevel) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(default_filter(level))
        .with_test_writer()
        .with_thread_names(true)
        .try_init();
}

fn default_filter(level: LogLevel) -> String {
    let mut directives: Vec<String> = WORKSPACE_CRATES
        .iter()
        .map(|krate| format!("{}={}", krate, level.as_str()))
        .collect();
    directives.push("symphonia=warn".to_string());
    directives.join(",")
}

fn build_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    let directives = config
        .filter
        .clone()
        .unwrap_or_else(|| default_filter(config.level));

    EnvFilter::try_new(directives)
        .map_err(|e| Error::Config(format!("Invalid log filter: {}", e)))
}

fn format_layer<S>(config: &LoggingConfig) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    let base = tracing_subscriber::fmt::layer()
        .with_target(config.display_target)
        .with_thread_ids(config.display_thread_info)
        .with_thread_names(config.display_thread_info)
        .with_writer(io::stderr);

    match config.format {
        LogFormat::Pretty => {
            let spans = if config.enable_spans {
                FmtSpan::ACTIVE
            } else {
                FmtSpan::NONE
            };
            base.pretty().with_span_events(spans).boxed()
        }
        LogFormat::Json => base
            .json()
            .flatten_event(true)
            .with_current_span(config.enable_spans)
            .with_span_list(config.enable_spans)
            .boxed(),
        LogFormat::Compact => base.compact().boxed(),
    }
}

// ============================================================================
// Sink Forwarding
// ============================================================================

/// Mirrors events into a [`LoggerSink`].
struct LoggerSinkLayer {
    sink: Option<Arc<dyn LoggerSink>>,
}

impl LoggerSinkLayer {
    fn new(sink: Option<Arc<dyn LoggerSink>>) -> Self {
        Self { sink }
    }
}

impl<S> Layer<S> for LoggerSinkLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let Some(sink) = self.sink.as_ref() else {
            return;
        };

        let metadata = event.metadata();
        let level = LogLevel::from(*metadata.level());
        if level < sink.min_level() {
            return;
        }

        let mut fields = FieldCollector::default();
        event.record(&mut fields);

        let mut entry = LogEntry::new(
            level,
            metadata.target(),
            fields.message.unwrap_or_else(|| metadata.name().to_string()),
        );
        entry.fields = fields.values;
        entry.span = ctx.event_span(event).map(|span| span.name().to_string());

        if let Err(err) = sink.log(entry) {
            eprintln!("LoggerSink error: {}", err);
        }
    }
}

/// Flattens event fields to strings, splitting out `message`.
#[derive(Default)]
struct FieldCollector {
    message: Option<String>,
    values: HashMap<String, String>,
}

impl FieldCollector {
    fn insert(&mut self, field: &Field, value: String) {
        match field.name() {
            "message" => self.message = Some(value),
            name => {
                self.values.insert(name.to_string(), value);
            }
        }
    }
}

impl Visit for FieldCollector {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.insert(field, value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.insert(field, format!("{:?}", value));
    }
}

/// Basename of `path`, for logging file names without directories.
///
/// ```
/// use core_runtime::logging::strip_path;
///
/// assert_eq!(strip_path("/Users/john/Music/song.mp3"), "song.mp3");
/// ```
pub fn strip_path(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}
