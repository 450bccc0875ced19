//! Injected logging handle.
//!
//! Components receive a [`Logger`] at construction instead of reaching for the process-wide
//! `log` facade. The entry point builds one `env_logger` sink and hands out clones of it.

use log::{Level, Log, Metadata, Record};
use std::fmt;
use std::sync::Arc;

#[derive(Clone)]
pub struct Logger {
    sink: Arc<dyn Log>,
    target: String,
}

impl Logger {
    pub fn new(sink: Arc<dyn Log>, target: impl Into<String>) -> Self {
        Self {
            sink,
            target: target.into(),
        }
    }

    /// Builds an `env_logger` sink honoring `RUST_LOG`, defaulting to `info`.
    pub fn from_env(target: impl Into<String>) -> Self {
        let sink = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
            .build();
        Self::new(Arc::new(sink), target)
    }

    /// A logger that drops every record.
    pub fn discard() -> Self {
        Self::new(Arc::new(DiscardSink), "discard")
    }

    /// Same sink, different target.
    pub fn with_target(&self, target: impl Into<String>) -> Self {
        Self {
            sink: Arc::clone(&self.sink),
            target: target.into(),
        }
    }

    pub fn enabled(&self, level: Level) -> bool {
        let metadata = Metadata::builder()
            .level(level)
            .target(&self.target)
            .build();
        self.sink.enabled(&metadata)
    }

    pub fn log(&self, level: Level, args: fmt::Arguments<'_>) {
        self.sink.log(
            &Record::builder()
                .args(args)
                .level(level)
                .target(&self.target)
                .build(),
        );
    }

    pub fn error(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Error, args);
    }

    pub fn warn(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Warn, args);
    }

    pub fn info(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Info, args);
    }

    pub fn debug(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Debug, args);
    }

    pub fn flush(&self) {
        self.sink.flush();
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("target", &self.target)
            .finish()
    }
}

struct DiscardSink;

impl Log for DiscardSink {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        false
    }

    fn log(&self, _record: &Record) {}

    fn flush(&self) {}
}
