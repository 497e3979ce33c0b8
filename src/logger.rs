//! Structured logging facade for the Flametree server
//!
//! One explicitly constructed logger instance is shared by reference across
//! request handlers, the rate limiter, and the retention scheduler. Records
//! are formatted as a single line:
//!
//! `[timestamp] [LEVEL] [module] [traceId] message {jsonContext}`
//!
//! Console output is always on for WARN and above; the daily log file is only
//! written in production mode. Logging never returns an error to its caller;
//! file-sink failures are reported on stderr.

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Mutex;
use std::time::{Duration, Instant, SystemTime};

use chrono::{SecondsFormat, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::config::TelemetryConfig;
use crate::errors::TelemetryError;

/// Placeholder substituted for sensitive context values before emission.
pub const REDACTION_MARKER: &str = "***REDACTED***";

/// Any context key whose lowercase form contains one of these is redacted.
const SENSITIVE_KEYS: [&str; 5] = ["password", "token", "secret", "apikey", "authorization"];

/// Header names whose values are redacted from request records.
const SENSITIVE_HEADERS: [&str; 3] = ["authorization", "cookie", "x-api-key"];

/// LogLevel classifies the severity of log output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
            LogLevel::Fatal => "FATAL",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = TelemetryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "DEBUG" => Ok(LogLevel::Debug),
            "INFO" => Ok(LogLevel::Info),
            "WARN" => Ok(LogLevel::Warn),
            "ERROR" => Ok(LogLevel::Error),
            "FATAL" => Ok(LogLevel::Fatal),
            other => Err(TelemetryError::config(format!(
                "unknown log level: {other}"
            ))),
        }
    }
}

/// Best-effort request metadata attached to the "request received" record.
pub struct RequestInfo<'a> {
    pub method: &'a str,
    pub path: &'a str,
    pub query: Value,
    pub headers: Value,
    pub user_agent: Option<String>,
    pub referer: Option<String>,
    pub client_addr: Option<String>,
}

/// Append-only sink holding at most one open day file. Rotation closes the
/// previous handle before the next is opened.
struct FileSink {
    dir: PathBuf,
    current_date: String,
    file: Option<File>,
}

impl FileSink {
    fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            current_date: String::new(),
            file: None,
        }
    }

    fn write_line(&mut self, date: &str, line: &str) -> std::io::Result<()> {
        if date != self.current_date {
            // Drop the previous stream before opening the new day's file.
            self.file.take();
            fs::create_dir_all(&self.dir)?;
            let path = self.dir.join(format!("{date}.log"));
            self.file = Some(OpenOptions::new().create(true).append(true).open(path)?);
            self.current_date = date.to_string();
        }

        if let Some(file) = self.file.as_mut() {
            writeln!(file, "{line}")?;
        }
        Ok(())
    }
}

/// Process-wide logging facade with level filtering, redaction, and dual
/// console/file output.
pub struct StructuredLogger {
    min_level: LogLevel,
    log_dir: PathBuf,
    production: bool,
    console_enabled: bool,
    file_sink: Mutex<FileSink>,
}

impl StructuredLogger {
    pub fn new(config: &TelemetryConfig) -> Self {
        Self::with_settings(
            config.log_level,
            config.log_dir.clone(),
            config.production,
            config.console_enabled,
        )
    }

    pub fn with_settings(
        min_level: LogLevel,
        log_dir: impl Into<PathBuf>,
        production: bool,
        console_enabled: bool,
    ) -> Self {
        let log_dir = log_dir.into();
        Self {
            min_level,
            file_sink: Mutex::new(FileSink::new(log_dir.clone())),
            log_dir,
            production,
            console_enabled,
        }
    }

    pub fn log(&self, level: LogLevel, message: &str, context: Option<Value>) {
        let Some(line) = self.render(level, message, context) else {
            return;
        };

        if (!self.production && self.console_enabled) || level >= LogLevel::Warn {
            if level >= LogLevel::Error {
                eprintln!("{line}");
            } else {
                println!("{line}");
            }
        }

        if self.production {
            let date = Utc::now().format("%Y-%m-%d").to_string();
            match self.file_sink.lock() {
                Ok(mut sink) => {
                    if let Err(e) = sink.write_line(&date, &line) {
                        eprintln!("Failed to write log to file: {e}");
                    }
                }
                Err(_) => eprintln!("Log file sink lock poisoned; record dropped"),
            }
        }
    }

    pub fn debug(&self, message: &str, context: Option<Value>) {
        self.log(LogLevel::Debug, message, context);
    }

    pub fn info(&self, message: &str, context: Option<Value>) {
        self.log(LogLevel::Info, message, context);
    }

    pub fn warn(&self, message: &str, context: Option<Value>) {
        self.log(LogLevel::Warn, message, context);
    }

    pub fn error(&self, message: &str, context: Option<Value>) {
        self.log(LogLevel::Error, message, context);
    }

    pub fn fatal(&self, message: &str, context: Option<Value>) {
        self.log(LogLevel::Fatal, message, context);
    }

    /// Formats a record after applying the level gate and redaction. Returns
    /// `None` when the record is below the configured minimum level.
    fn render(&self, level: LogLevel, message: &str, context: Option<Value>) -> Option<String> {
        if level < self.min_level {
            return None;
        }
        let sanitized = context.map(redact);
        Some(format_line(level, message, sanitized))
    }

    /// Record an inbound API request at INFO under the given trace id.
    pub fn log_request(&self, module: &str, trace_id: &str, req: RequestInfo<'_>) {
        self.info(
            "HTTP request received",
            Some(json!({
                "module": module,
                "operation": "request",
                "traceId": trace_id,
                "method": req.method,
                "path": req.path,
                "query": req.query,
                "headers": req.headers,
                "userAgent": req.user_agent,
                "referer": req.referer,
                "ip": req.client_addr,
            })),
        );
    }

    /// Record a produced response; status >= 400 is an ERROR record.
    pub fn log_response(&self, trace_id: &str, module: &str, status: u16, duration_ms: u64) {
        let (level, message) = if status >= 400 {
            (LogLevel::Error, "HTTP response error")
        } else {
            (LogLevel::Info, "HTTP response ok")
        };

        self.log(
            level,
            message,
            Some(json!({
                "module": module,
                "operation": "response",
                "traceId": trace_id,
                "status": status,
                "duration": duration_ms,
            })),
        );
    }

    /// Start a stopwatch for an operation; `end` logs WARN past the threshold
    /// and DEBUG otherwise, returning the elapsed milliseconds.
    pub fn measure_performance(
        &self,
        operation: impl Into<String>,
        threshold_ms: u64,
    ) -> PerfTimer<'_> {
        PerfTimer {
            logger: self,
            operation: operation.into(),
            threshold_ms,
            start: Instant::now(),
        }
    }

    /// Delete `*.log` files whose modification time is older than the
    /// retention window. Per-file failures are logged and do not abort the
    /// sweep; all failures are contained here.
    pub fn cleanup_old_logs(&self, days_to_keep: u64) {
        let cutoff = SystemTime::now() - Duration::from_secs(days_to_keep * 86_400);

        let entries = match fs::read_dir(&self.log_dir) {
            Ok(entries) => entries,
            Err(e) => {
                self.error(
                    "Log cleanup failed",
                    Some(json!({
                        "module": "System",
                        "dir": self.log_dir.display().to_string(),
                        "error": e.to_string(),
                    })),
                );
                return;
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.ends_with(".log") {
                continue;
            }

            let modified = entry.metadata().and_then(|m| m.modified());
            let Ok(modified) = modified else {
                continue;
            };

            if modified < cutoff {
                match fs::remove_file(&path) {
                    Ok(()) => self.info(
                        "Removed expired log file",
                        Some(json!({
                            "module": "System",
                            "file": name,
                            "age": days_to_keep,
                        })),
                    ),
                    Err(e) => self.error(
                        "Failed to remove expired log file",
                        Some(json!({
                            "module": "System",
                            "file": name,
                            "error": e.to_string(),
                        })),
                    ),
                }
            }
        }
    }

    /// Directory the daily log files live in.
    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }
}

/// Stopwatch handle returned by [`StructuredLogger::measure_performance`].
pub struct PerfTimer<'a> {
    logger: &'a StructuredLogger,
    operation: String,
    threshold_ms: u64,
    start: Instant,
}

impl PerfTimer<'_> {
    pub fn end(self, context: Option<Value>) -> u64 {
        let duration = self.start.elapsed().as_millis() as u64;

        let mut ctx = match context {
            Some(Value::Object(map)) => map,
            _ => Map::new(),
        };
        ctx.insert("operation".into(), json!(self.operation));
        ctx.insert("duration".into(), json!(duration));

        if duration > self.threshold_ms {
            ctx.insert("threshold".into(), json!(self.threshold_ms));
            self.logger
                .warn("Operation running slow", Some(Value::Object(ctx)));
        } else {
            self.logger
                .debug("Operation completed", Some(Value::Object(ctx)));
        }

        duration
    }
}

/// Generate a correlation id: epoch millis plus a short base-36 suffix.
/// Uniqueness is probabilistic; trace ids are for human correlation only.
pub fn generate_trace_id() -> String {
    const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut rng = rand::rng();
    let suffix: String = (0..9)
        .map(|_| ALPHABET[rng.random_range(0..ALPHABET.len())] as char)
        .collect();
    format!("{}-{}", Utc::now().timestamp_millis(), suffix)
}

/// Build a loggable header map, replacing credential-bearing header values
/// with the redaction marker. Header names are lowercased.
pub fn sanitize_headers<'a, I>(headers: I) -> Value
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut map = Map::new();
    for (name, value) in headers {
        let name = name.to_ascii_lowercase();
        let value = if SENSITIVE_HEADERS.contains(&name.as_str()) {
            REDACTION_MARKER.to_string()
        } else {
            value.to_string()
        };
        map.insert(name, Value::String(value));
    }
    Value::Object(map)
}

/// Recursively replace values of sensitive keys with the redaction marker,
/// descending into nested objects and arrays.
pub fn redact(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, val)| {
                    let lower = key.to_lowercase();
                    if SENSITIVE_KEYS.iter().any(|s| lower.contains(s)) {
                        (key, Value::String(REDACTION_MARKER.to_string()))
                    } else {
                        (key, redact(val))
                    }
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(redact).collect()),
        other => other,
    }
}

/// Format a single record. `module` and `traceId` are hoisted out of the
/// context into the bracketed header; the JSON tail is omitted when nothing
/// remains.
fn format_line(level: LogLevel, message: &str, context: Option<Value>) -> String {
    let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);

    let mut module = "System".to_string();
    let mut trace_id = "-".to_string();
    let mut tail = None;

    match context {
        Some(Value::Object(mut map)) => {
            if let Some(m) = map.remove("module").as_ref().and_then(Value::as_str) {
                module = m.to_string();
            }
            if let Some(t) = map.remove("traceId").as_ref().and_then(Value::as_str) {
                trace_id = t.to_string();
            }
            if !map.is_empty() {
                tail = serde_json::to_string(&map).ok();
            }
        }
        Some(other) => {
            tail = serde_json::to_string(&other).ok();
        }
        None => {}
    }

    let mut line = format!("[{timestamp}] [{level}] [{module}] [{trace_id}] {message}");
    if let Some(tail) = tail {
        line.push(' ');
        line.push_str(&tail);
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_logger(min_level: LogLevel) -> StructuredLogger {
        StructuredLogger::with_settings(min_level, "logs", false, true)
    }

    #[test]
    fn records_below_min_level_produce_no_output() {
        let logger = test_logger(LogLevel::Warn);

        assert!(logger.render(LogLevel::Debug, "x", None).is_none());
        assert!(logger.render(LogLevel::Info, "x", None).is_none());
        assert!(logger.render(LogLevel::Warn, "x", None).is_some());
        assert!(logger.render(LogLevel::Fatal, "x", None).is_some());
    }

    #[test]
    fn warn_record_matches_line_format() {
        let logger = test_logger(LogLevel::Warn);

        assert!(logger.render(LogLevel::Info, "x", None).is_none());

        let line = logger
            .render(LogLevel::Warn, "y", Some(json!({"module": "M"})))
            .expect("warn must pass the gate");
        assert!(line.starts_with('['));
        assert!(line.ends_with("] [WARN] [M] [-] y"));
    }

    #[test]
    fn context_tail_is_omitted_when_only_hoisted_keys_remain() {
        let logger = test_logger(LogLevel::Debug);
        let line = logger
            .render(
                LogLevel::Info,
                "hello",
                Some(json!({"module": "Orders", "traceId": "t-1"})),
            )
            .expect("record");
        assert!(line.ends_with("[Orders] [t-1] hello"));

        let line = logger
            .render(
                LogLevel::Info,
                "hello",
                Some(json!({"module": "Orders", "count": 3})),
            )
            .expect("record");
        assert!(line.contains("hello {\"count\":3}"));
    }

    #[test]
    fn redaction_replaces_sensitive_keys_at_any_depth() {
        let sanitized = redact(json!({
            "user": "mei",
            "apiKey": "abc123",
            "nested": {
                "authorization": "Bearer xyz",
                "items": [{"Password": "p"}, {"plain": "ok"}],
            },
        }));

        assert_eq!(sanitized["user"], "mei");
        assert_eq!(sanitized["apiKey"], REDACTION_MARKER);
        assert_eq!(sanitized["nested"]["authorization"], REDACTION_MARKER);
        assert_eq!(sanitized["nested"]["items"][0]["Password"], REDACTION_MARKER);
        assert_eq!(sanitized["nested"]["items"][1]["plain"], "ok");
    }

    #[test]
    fn credential_headers_are_redacted_in_request_records() {
        let sanitized = sanitize_headers([
            ("Authorization", "Bearer xyz"),
            ("Cookie", "session=abc"),
            ("X-Api-Key", "k-123"),
            ("user-agent", "FlametreeApp/2.1"),
        ]);

        assert_eq!(sanitized["authorization"], REDACTION_MARKER);
        assert_eq!(sanitized["cookie"], REDACTION_MARKER);
        assert_eq!(sanitized["x-api-key"], REDACTION_MARKER);
        assert_eq!(sanitized["user-agent"], "FlametreeApp/2.1");
    }

    #[test]
    fn file_sink_rotates_between_dates() {
        let dir = tempfile::tempdir().expect("temp dir");
        let mut sink = FileSink::new(dir.path().to_path_buf());

        sink.write_line("2025-07-11", "day one record").expect("write");
        sink.write_line("2025-07-11", "day one again").expect("write");
        sink.write_line("2025-07-12", "day two record").expect("write");

        let day_one =
            fs::read_to_string(dir.path().join("2025-07-11.log")).expect("day one file");
        let day_two =
            fs::read_to_string(dir.path().join("2025-07-12.log")).expect("day two file");

        assert_eq!(day_one, "day one record\nday one again\n");
        assert_eq!(day_two, "day two record\n");
        assert!(!day_two.contains("day one"));
    }

    #[test]
    fn cleanup_removes_only_expired_log_files() {
        let dir = tempfile::tempdir().expect("temp dir");
        let logger =
            StructuredLogger::with_settings(LogLevel::Fatal, dir.path(), false, false);

        fs::write(dir.path().join("2025-07-11.log"), "old").expect("write");
        fs::write(dir.path().join("notes.txt"), "keep").expect("write");

        // A generous window retains the file.
        logger.cleanup_old_logs(30);
        assert!(dir.path().join("2025-07-11.log").exists());

        // A zero-day window expires everything written before now.
        std::thread::sleep(Duration::from_millis(20));
        logger.cleanup_old_logs(0);
        assert!(!dir.path().join("2025-07-11.log").exists());
        assert!(dir.path().join("notes.txt").exists());
    }

    #[test]
    fn cleanup_over_missing_directory_does_not_panic() {
        let logger = StructuredLogger::with_settings(
            LogLevel::Fatal,
            "definitely/not/a/real/dir",
            false,
            false,
        );
        logger.cleanup_old_logs(30);
    }

    #[test]
    fn trace_ids_have_millis_and_suffix() {
        let id = generate_trace_id();
        let (millis, suffix) = id.split_once('-').expect("separator");
        assert!(millis.parse::<i64>().is_ok());
        assert_eq!(suffix.len(), 9);
        assert!(suffix.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn perf_timer_reports_elapsed_and_threshold() {
        let logger = test_logger(LogLevel::Debug);

        let timer = logger.measure_performance("load menu", 1000);
        let duration = timer.end(None);
        assert!(duration < 1000);

        let timer = logger.measure_performance("slow path", 0);
        std::thread::sleep(Duration::from_millis(5));
        let duration = timer.end(Some(json!({"module": "M"})));
        assert!(duration >= 5);
    }

    #[test]
    fn level_parsing_is_case_insensitive() {
        assert_eq!("warn".parse::<LogLevel>().expect("parse"), LogLevel::Warn);
        assert_eq!("ERROR".parse::<LogLevel>().expect("parse"), LogLevel::Error);
        assert!("verbose".parse::<LogLevel>().is_err());
    }

    #[test]
    fn levels_are_totally_ordered() {
        assert!(LogLevel::Debug < LogLevel::Info);
        assert!(LogLevel::Info < LogLevel::Warn);
        assert!(LogLevel::Warn < LogLevel::Error);
        assert!(LogLevel::Error < LogLevel::Fatal);
    }
}
