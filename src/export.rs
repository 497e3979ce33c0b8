//! Log file inspection: line parsing, date-ranged export, and directory
//! statistics
//!
//! Export reads the daily files back into structured entries. A line that
//! does not match the record format is skipped rather than failing the whole
//! export; a context tail that is not valid JSON degrades to an empty map.

use std::fs;
use std::path::Path;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::errors::{TelemetryError, TelemetryResult};
use crate::logger::LogLevel;

/// One parsed log line.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub timestamp: String,
    pub level: String,
    pub module: String,
    pub trace_id: String,
    pub message: String,
    pub context: Value,
}

/// Aggregate statistics over a log directory.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogStats {
    pub total_files: usize,
    pub total_size: u64,
    pub oldest_log: Option<DateTime<Utc>>,
    pub newest_log: Option<DateTime<Utc>>,
}

/// Parse one line of the `[ts] [LEVEL] [module] [traceId] message {json}`
/// format.
pub fn parse_log_line(line: &str) -> TelemetryResult<LogEntry> {
    let (timestamp, rest) = take_bracketed(line)
        .ok_or_else(|| TelemetryError::malformed_line("missing timestamp segment"))?;
    let (level, rest) = take_bracketed(rest)
        .ok_or_else(|| TelemetryError::malformed_line("missing level segment"))?;
    let (module, rest) = take_bracketed(rest)
        .ok_or_else(|| TelemetryError::malformed_line("missing module segment"))?;
    let (trace_id, rest) = take_bracketed(rest)
        .ok_or_else(|| TelemetryError::malformed_line("missing trace id segment"))?;

    // The context tail is the last brace group; a message may itself contain
    // braces, so split at the last separator.
    let (message, context) = match rest.rfind(" {") {
        Some(idx) if rest.ends_with('}') => {
            let context = serde_json::from_str(&rest[idx + 1..])
                .unwrap_or_else(|_| Value::Object(Map::new()));
            (&rest[..idx], context)
        }
        _ => (rest, Value::Object(Map::new())),
    };

    if message.is_empty() {
        return Err(TelemetryError::malformed_line("empty message"));
    }

    Ok(LogEntry {
        timestamp: timestamp.to_string(),
        level: level.to_string(),
        module: module.to_string(),
        trace_id: trace_id.to_string(),
        message: message.to_string(),
        context,
    })
}

/// Read entries from every day file within the inclusive date range,
/// optionally filtered by level. A missing directory exports nothing.
pub fn export_logs(
    dir: &Path,
    start: NaiveDate,
    end: NaiveDate,
    level: Option<LogLevel>,
) -> TelemetryResult<Vec<LogEntry>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return Ok(Vec::new()),
    };

    let mut exported = Vec::new();

    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        let Some(stem) = name.strip_suffix(".log") else {
            continue;
        };
        let Ok(file_date) = NaiveDate::parse_from_str(stem, "%Y-%m-%d") else {
            continue;
        };
        if file_date < start || file_date > end {
            continue;
        }

        let Ok(content) = fs::read_to_string(entry.path()) else {
            continue;
        };

        for line in content.lines().filter(|l| !l.trim().is_empty()) {
            let Ok(parsed) = parse_log_line(line) else {
                continue;
            };
            if let Some(level) = level {
                if parsed.level != level.as_str() {
                    continue;
                }
            }
            exported.push(parsed);
        }
    }

    Ok(exported)
}

/// Size and age statistics for the `*.log` files in a directory. A missing
/// or empty directory yields zeroed stats.
pub fn log_stats(dir: &Path) -> TelemetryResult<LogStats> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(LogStats::default()),
        Err(e) => return Err(TelemetryError::io("list log directory", e)),
    };

    let mut stats = LogStats::default();

    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.ends_with(".log") {
            continue;
        }
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        let Ok(modified) = metadata.modified() else {
            continue;
        };
        let modified: DateTime<Utc> = modified.into();

        stats.total_files += 1;
        stats.total_size += metadata.len();
        if stats.oldest_log.map_or(true, |oldest| modified < oldest) {
            stats.oldest_log = Some(modified);
        }
        if stats.newest_log.map_or(true, |newest| modified > newest) {
            stats.newest_log = Some(modified);
        }
    }

    Ok(stats)
}

fn take_bracketed(input: &str) -> Option<(&str, &str)> {
    let input = input.strip_prefix('[')?;
    let end = input.find(']')?;
    Some((&input[..end], input[end + 1..].trim_start()))
}
