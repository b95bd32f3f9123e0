use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

pub const DEFAULT_TAG: &str = "[*]";

pub fn init_logging(default_level: &str) {
    let fallback = if default_level.trim().is_empty() {
        "info".to_string()
    } else {
        default_level.trim().to_lowercase()
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    if cfg!(debug_assertions) {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .try_init();
    } else {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .json()
            .with_target(false)
            .with_writer(std::io::stderr)
            .try_init();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogLevel {
    Debug,
    Info,
    Success,
    Warning,
    Error,
}

impl LogLevel {
    pub fn label(self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Success => "SUCCESS",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
        }
    }

    pub fn color(self) -> &'static str {
        match self {
            LogLevel::Debug => "gray",
            LogLevel::Info => "black",
            LogLevel::Success => "green",
            LogLevel::Warning => "orange",
            LogLevel::Error => "red",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Receiver of leveled, tagged messages. Implementations own their own
/// display and persistence.
pub trait LogSink: Send + Sync {
    fn log(&self, level: LogLevel, tag: &str, message: &str, is_html: bool);

    fn debug(&self, tag: &str, message: &str) {
        self.log(LogLevel::Debug, tag, message, false);
    }

    fn info(&self, tag: &str, message: &str) {
        self.log(LogLevel::Info, tag, message, false);
    }

    fn success(&self, tag: &str, message: &str) {
        self.log(LogLevel::Success, tag, message, false);
    }

    fn warning(&self, tag: &str, message: &str) {
        self.log(LogLevel::Warning, tag, message, false);
    }

    fn error(&self, tag: &str, message: &str) {
        self.log(LogLevel::Error, tag, message, false);
    }
}

pub fn timestamp_now() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

pub fn format_log_line(timestamp: &str, level: LogLevel, tag: &str, message: &str) -> String {
    format!("{timestamp} {:<9} {tag} {message}", level.label())
}

pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#x27;"),
            other => escaped.push(other),
        }
    }
    escaped
}

/// Forwards sink messages into `tracing`, which is the display surface for
/// the command-line shell.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogSink;

impl LogSink for TracingLogSink {
    fn log(&self, level: LogLevel, tag: &str, message: &str, _is_html: bool) {
        let message = message.trim_end_matches(['\r', '\n']);
        match level {
            LogLevel::Debug => debug!(tag = %tag, "{message}"),
            LogLevel::Info => info!(tag = %tag, "{message}"),
            LogLevel::Success => info!(tag = %tag, outcome = "success", "{message}"),
            LogLevel::Warning => warn!(tag = %tag, "{message}"),
            LogLevel::Error => error!(tag = %tag, "{message}"),
        }
    }
}

/// Append-only log file; every line is flushed as soon as it is written.
pub struct FileLogSink {
    path: PathBuf,
    file: Mutex<File>,
}

impl FileLogSink {
    pub fn open(path: &Path) -> Result<Self, std::io::Error> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LogSink for FileLogSink {
    fn log(&self, level: LogLevel, tag: &str, message: &str, _is_html: bool) {
        let line = format_log_line(&timestamp_now(), level, tag, message);
        let Ok(mut file) = self.file.lock() else {
            return;
        };
        if let Err(err) = writeln!(file, "{line}").and_then(|_| file.flush()) {
            warn!(path = %self.path.display(), error = %err, "failed to write log file");
        }
    }
}

/// In-memory viewport of colored HTML lines, in arrival order.
#[derive(Default)]
pub struct HtmlViewSink {
    lines: Mutex<Vec<String>>,
}

impl HtmlViewSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().map(|guard| guard.clone()).unwrap_or_default()
    }

    pub fn clear(&self) {
        if let Ok(mut guard) = self.lines.lock() {
            guard.clear();
        }
    }
}

impl LogSink for HtmlViewSink {
    fn log(&self, level: LogLevel, tag: &str, message: &str, is_html: bool) {
        let body = format_log_line(&timestamp_now(), level, tag, message);
        let body = if is_html { body } else { escape_html(&body) };
        let rendered = format!("<span style=\"color:{};\">{body}</span>", level.color());
        if let Ok(mut guard) = self.lines.lock() {
            guard.push(rendered);
        }
    }
}

#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn LogSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl LogSink for FanoutSink {
    fn log(&self, level: LogLevel, tag: &str, message: &str, is_html: bool) {
        for sink in &self.sinks {
            sink.log(level, tag, message, is_html);
        }
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct Record {
        pub level: LogLevel,
        pub tag: String,
        pub message: String,
    }

    #[derive(Default)]
    pub struct RecordingSink {
        records: Mutex<Vec<Record>>,
    }

    impl RecordingSink {
        pub fn records(&self) -> Vec<Record> {
            self.records.lock().expect("records").clone()
        }
    }

    impl LogSink for RecordingSink {
        fn log(&self, level: LogLevel, tag: &str, message: &str, _is_html: bool) {
            self.records.lock().expect("records").push(Record {
                level,
                tag: tag.to_string(),
                message: message.to_string(),
            });
        }
    }
}
