//! Daily retention sweep for log and backup files
//!
//! Runs only in production mode, firing once per day at 02:00 UTC. Each
//! firing deletes aged daily log files, then aged `.backup` siblings in the
//! data directory. Failures are logged and the next firing proceeds
//! independently.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::task::JoinHandle;

use crate::logger::StructuredLogger;

const MODULE_NAME: &str = "Retention";
const SWEEP_HOUR_UTC: u32 = 2;

pub struct LogRetentionScheduler {
    logger: Arc<StructuredLogger>,
    data_dir: PathBuf,
    retention_days: u64,
}

impl LogRetentionScheduler {
    pub fn new(logger: Arc<StructuredLogger>, data_dir: impl Into<PathBuf>, retention_days: u64) -> Self {
        Self {
            logger,
            data_dir: data_dir.into(),
            retention_days,
        }
    }

    /// Run the sweep loop in the background until the task is aborted.
    pub fn spawn(self) -> JoinHandle<()> {
        self.logger.info(
            "Log cleanup task scheduled",
            Some(json!({
                "module": MODULE_NAME,
                "firesAtUtc": format!("{SWEEP_HOUR_UTC:02}:00"),
                "retentionDays": self.retention_days,
            })),
        );

        tokio::spawn(async move {
            loop {
                let wait = duration_until_next_sweep(Utc::now());
                tokio::time::sleep(wait).await;
                self.run_sweep();
            }
        })
    }

    /// One full sweep: aged log files, then aged data backups.
    pub fn run_sweep(&self) {
        self.logger.info(
            "Log cleanup sweep starting",
            Some(json!({
                "module": MODULE_NAME,
                "retentionDays": self.retention_days,
            })),
        );

        self.logger.cleanup_old_logs(self.retention_days);
        cleanup_backup_files(&self.logger, &self.data_dir, self.retention_days);

        self.logger.info(
            "Log cleanup sweep finished",
            Some(json!({ "module": MODULE_NAME })),
        );
    }
}

/// Delete `*.backup` files older than the retention window. Matching is by
/// suffix, not extension, since backups are named `<original>.backup`.
pub fn cleanup_backup_files(logger: &StructuredLogger, directory: &Path, days_to_keep: u64) {
    let cutoff = SystemTime::now() - Duration::from_secs(days_to_keep * 86_400);

    let entries = match fs::read_dir(directory) {
        Ok(entries) => entries,
        Err(e) => {
            logger.error(
                "Backup cleanup failed",
                Some(json!({
                    "module": MODULE_NAME,
                    "directory": directory.display().to_string(),
                    "error": e.to_string(),
                })),
            );
            return;
        }
    };

    let mut cleaned = 0usize;
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.ends_with(".backup") {
            continue;
        }

        let Ok(modified) = entry.metadata().and_then(|m| m.modified()) else {
            continue;
        };

        if modified < cutoff {
            match fs::remove_file(entry.path()) {
                Ok(()) => cleaned += 1,
                Err(e) => logger.error(
                    "Failed to remove expired backup file",
                    Some(json!({
                        "module": MODULE_NAME,
                        "file": name,
                        "error": e.to_string(),
                    })),
                ),
            }
        }
    }

    if cleaned > 0 {
        logger.info(
            "Backup file cleanup finished",
            Some(json!({
                "module": MODULE_NAME,
                "directory": directory.display().to_string(),
                "cleanedCount": cleaned,
                "daysToKeep": days_to_keep,
            })),
        );
    }
}

fn duration_until_next_sweep(now: DateTime<Utc>) -> Duration {
    let fire_today = now
        .date_naive()
        .and_hms_opt(SWEEP_HOUR_UTC, 0, 0)
        .map(|t| t.and_utc());

    let target = match fire_today {
        Some(fire) if now < fire => fire,
        Some(fire) => fire + chrono::Duration::days(1),
        None => now + chrono::Duration::days(1),
    };

    (target - now)
        .to_std()
        .unwrap_or(Duration::from_secs(86_400))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::LogLevel;
    use chrono::TimeZone;

    fn quiet_logger(log_dir: &Path) -> Arc<StructuredLogger> {
        Arc::new(StructuredLogger::with_settings(
            LogLevel::Fatal,
            log_dir,
            false,
            false,
        ))
    }

    #[test]
    fn sweep_removes_expired_backups_and_keeps_fresh_files() {
        let dir = tempfile::tempdir().expect("temp dir");
        let logger = quiet_logger(dir.path());

        fs::write(dir.path().join("orders.json.backup"), "{}").expect("write");
        fs::write(dir.path().join("orders.json"), "{}").expect("write");

        cleanup_backup_files(&logger, dir.path(), 30);
        assert!(dir.path().join("orders.json.backup").exists());

        std::thread::sleep(std::time::Duration::from_millis(20));
        cleanup_backup_files(&logger, dir.path(), 0);
        assert!(!dir.path().join("orders.json.backup").exists());
        // Only the backup suffix is swept.
        assert!(dir.path().join("orders.json").exists());
    }

    #[test]
    fn sweep_over_empty_directory_is_a_noop() {
        let dir = tempfile::tempdir().expect("temp dir");
        let logger = quiet_logger(dir.path());
        cleanup_backup_files(&logger, dir.path(), 30);
        cleanup_backup_files(&logger, Path::new("no/such/dir"), 30);
    }

    #[test]
    fn full_sweep_covers_logs_and_backups() {
        let logs = tempfile::tempdir().expect("temp dir");
        let data = tempfile::tempdir().expect("temp dir");
        let logger = quiet_logger(logs.path());

        fs::write(logs.path().join("2025-07-01.log"), "old").expect("write");
        fs::write(data.path().join("menu.json.backup"), "{}").expect("write");
        std::thread::sleep(std::time::Duration::from_millis(20));

        let scheduler = LogRetentionScheduler::new(logger, data.path(), 0);
        scheduler.run_sweep();

        assert!(!logs.path().join("2025-07-01.log").exists());
        assert!(!data.path().join("menu.json.backup").exists());
    }

    #[test]
    fn next_sweep_lands_on_the_fixed_hour() {
        let before = Utc.with_ymd_and_hms(2025, 7, 12, 1, 0, 0).unwrap();
        assert_eq!(duration_until_next_sweep(before), Duration::from_secs(3600));

        let after = Utc.with_ymd_and_hms(2025, 7, 12, 3, 0, 0).unwrap();
        assert_eq!(
            duration_until_next_sweep(after),
            Duration::from_secs(23 * 3600)
        );
    }
}
