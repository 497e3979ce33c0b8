//! Logged JSON file access with a backup safety net
//!
//! Route handlers mutate flat JSON files with whole-file read/modify/write
//! cycles. Writes copy the existing file to a `.backup` sibling first; if the
//! write then fails the backup is copied back over the target. The restore is
//! best effort, not a transaction — a failed restore is reported at FATAL and
//! the original write error still propagates, since data integrity is in
//! question.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use serde_json::{json, Value};

use crate::errors::{TelemetryError, TelemetryResult};
use crate::logger::StructuredLogger;

const MODULE_NAME: &str = "DataAccess";
const SLOW_READ_MS: u64 = 100;
const SLOW_WRITE_MS: u64 = 200;

pub fn read_json(
    logger: &StructuredLogger,
    path: &Path,
    operation: &str,
) -> TelemetryResult<Value> {
    let start = Instant::now();
    let file_name = display_name(path);

    logger.debug(
        "Reading data file",
        Some(json!({
            "module": MODULE_NAME,
            "operation": operation,
            "file": file_name,
        })),
    );

    let raw = fs::read_to_string(path).map_err(|e| {
        logger.error(
            "Data file read failed",
            Some(json!({
                "module": MODULE_NAME,
                "operation": operation,
                "file": file_name,
                "error": e.to_string(),
            })),
        );
        TelemetryError::io(format!("read {file_name}"), e)
    })?;

    let parsed: Value = serde_json::from_str(&raw).map_err(|e| {
        logger.error(
            "Data file parse failed",
            Some(json!({
                "module": MODULE_NAME,
                "operation": operation,
                "file": file_name,
                "error": e.to_string(),
            })),
        );
        TelemetryError::serialization(format!("parse {file_name}"), e)
    })?;

    let duration = start.elapsed().as_millis() as u64;
    logger.info(
        "Data file read",
        Some(json!({
            "module": MODULE_NAME,
            "operation": operation,
            "file": file_name,
            "fileSize": raw.len(),
            "duration": duration,
            "recordCount": record_count(&parsed),
        })),
    );

    if duration > SLOW_READ_MS {
        logger.warn(
            "Data file read slow",
            Some(json!({
                "module": MODULE_NAME,
                "operation": operation,
                "file": file_name,
                "duration": duration,
                "threshold": SLOW_READ_MS,
            })),
        );
    }

    Ok(parsed)
}

pub fn write_json(
    logger: &StructuredLogger,
    path: &Path,
    value: &Value,
    operation: &str,
) -> TelemetryResult<()> {
    let start = Instant::now();
    let file_name = display_name(path);

    let serialized = serde_json::to_string_pretty(value)
        .map_err(|e| TelemetryError::serialization(format!("serialize {file_name}"), e))?;

    let backup = backup_path(path);
    if path.exists() {
        fs::copy(path, &backup).map_err(|e| {
            logger.error(
                "Data file backup failed",
                Some(json!({
                    "module": MODULE_NAME,
                    "operation": operation,
                    "file": file_name,
                    "error": e.to_string(),
                })),
            );
            TelemetryError::io(format!("backup {file_name}"), e)
        })?;

        logger.debug(
            "Data file backup created",
            Some(json!({
                "module": MODULE_NAME,
                "operation": operation,
                "original": file_name,
                "backup": display_name(&backup),
            })),
        );
    }

    match fs::write(path, &serialized) {
        Ok(()) => {
            let duration = start.elapsed().as_millis() as u64;
            logger.info(
                "Data file written",
                Some(json!({
                    "module": MODULE_NAME,
                    "operation": operation,
                    "file": file_name,
                    "fileSize": serialized.len(),
                    "duration": duration,
                    "recordCount": record_count(value),
                })),
            );

            if duration > SLOW_WRITE_MS {
                logger.warn(
                    "Data file write slow",
                    Some(json!({
                        "module": MODULE_NAME,
                        "operation": operation,
                        "file": file_name,
                        "duration": duration,
                        "threshold": SLOW_WRITE_MS,
                    })),
                );
            }
            Ok(())
        }
        Err(e) => {
            logger.error(
                "Data file write failed",
                Some(json!({
                    "module": MODULE_NAME,
                    "operation": operation,
                    "file": file_name,
                    "error": e.to_string(),
                })),
            );

            if backup.exists() {
                match fs::copy(&backup, path) {
                    Ok(_) => logger.info(
                        "Data file restored from backup",
                        Some(json!({
                            "module": MODULE_NAME,
                            "operation": operation,
                            "file": file_name,
                        })),
                    ),
                    Err(restore_err) => logger.fatal(
                        "Data file restore failed",
                        Some(json!({
                            "module": MODULE_NAME,
                            "operation": operation,
                            "file": file_name,
                            "error": restore_err.to_string(),
                        })),
                    ),
                }
            }

            Err(TelemetryError::io(format!("write {file_name}"), e))
        }
    }
}

pub fn ensure_directory(logger: &StructuredLogger, path: &Path) -> TelemetryResult<()> {
    if path.exists() {
        logger.debug(
            "Directory already exists",
            Some(json!({
                "module": MODULE_NAME,
                "path": path.display().to_string(),
            })),
        );
        return Ok(());
    }

    fs::create_dir_all(path).map_err(|e| {
        logger.error(
            "Directory creation failed",
            Some(json!({
                "module": MODULE_NAME,
                "path": path.display().to_string(),
                "error": e.to_string(),
            })),
        );
        TelemetryError::io(format!("create directory {}", path.display()), e)
    })?;

    logger.info(
        "Directory created",
        Some(json!({
            "module": MODULE_NAME,
            "path": path.display().to_string(),
        })),
    );
    Ok(())
}

fn backup_path(path: &Path) -> PathBuf {
    // Extend the OsString rather than round-tripping through a lossy
    // display string; non-UTF-8 paths must keep their exact bytes.
    let mut name = path.as_os_str().to_os_string();
    name.push(".backup");
    PathBuf::from(name)
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn record_count(value: &Value) -> usize {
    match value {
        Value::Array(items) => items.len(),
        Value::Object(map) => map.len(),
        _ => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::LogLevel;

    fn quiet_logger() -> StructuredLogger {
        StructuredLogger::with_settings(LogLevel::Fatal, "logs", false, false)
    }

    #[test]
    fn write_then_read_roundtrips() {
        let dir = tempfile::tempdir().expect("temp dir");
        let logger = quiet_logger();
        let path = dir.path().join("orders.json");
        let value = json!([{"id": 1, "drink": "latte"}]);

        write_json(&logger, &path, &value, "save orders").expect("write");
        let loaded = read_json(&logger, &path, "load orders").expect("read");
        assert_eq!(loaded, value);

        // First write of a fresh file has nothing to back up.
        assert!(!dir.path().join("orders.json.backup").exists());
    }

    #[test]
    fn overwrite_leaves_a_backup_of_the_previous_contents() {
        let dir = tempfile::tempdir().expect("temp dir");
        let logger = quiet_logger();
        let path = dir.path().join("menu.json");

        write_json(&logger, &path, &json!({"v": 1}), "save menu").expect("write");
        write_json(&logger, &path, &json!({"v": 2}), "save menu").expect("write");

        let backup = fs::read_to_string(dir.path().join("menu.json.backup")).expect("backup");
        let backup: Value = serde_json::from_str(&backup).expect("backup json");
        assert_eq!(backup, json!({"v": 1}));

        let current = read_json(&logger, &path, "load menu").expect("read");
        assert_eq!(current, json!({"v": 2}));
    }

    #[test]
    fn backup_path_appends_the_suffix_to_the_full_path() {
        assert_eq!(
            backup_path(Path::new("data/orders.json")),
            PathBuf::from("data/orders.json.backup")
        );
        assert_eq!(
            backup_path(Path::new("/var/lib/flametree/menu.json")),
            PathBuf::from("/var/lib/flametree/menu.json.backup")
        );
    }

    #[test]
    fn read_failures_propagate() {
        let dir = tempfile::tempdir().expect("temp dir");
        let logger = quiet_logger();

        let missing = read_json(&logger, &dir.path().join("absent.json"), "load");
        assert!(matches!(missing, Err(TelemetryError::Io { .. })));

        let bad = dir.path().join("bad.json");
        fs::write(&bad, "not json").expect("write");
        let malformed = read_json(&logger, &bad, "load");
        assert!(matches!(malformed, Err(TelemetryError::Serialization { .. })));
    }

    #[test]
    fn ensure_directory_is_idempotent() {
        let dir = tempfile::tempdir().expect("temp dir");
        let logger = quiet_logger();
        let nested = dir.path().join("data/store");

        ensure_directory(&logger, &nested).expect("create");
        assert!(nested.is_dir());
        ensure_directory(&logger, &nested).expect("repeat");
    }
}
