use crate::paths::AppPaths;
use crate::Result;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const BATCH_LOG_ROTATE_BYTES: u64 = 10 * 1024 * 1024;
const BATCH_LOG_MAX_BACKUPS: usize = 3;
const BATCH_LOG_MAX_AGE_DAYS: u64 = 30;

/// JSONL journal for one batch. Writes are best-effort: a journal that cannot
/// be written never affects the batch itself.
#[derive(Debug, Clone)]
pub struct BatchJournal {
    path: PathBuf,
    batch_id: String,
    tag: String,
    rotate_bytes: u64,
    max_backups: usize,
}

impl BatchJournal {
    pub fn open(paths: &AppPaths, batch_id: &str, tag: &str) -> Self {
        Self {
            path: paths.batch_log_path(batch_id),
            batch_id: batch_id.to_string(),
            tag: tag.to_string(),
            rotate_bytes: BATCH_LOG_ROTATE_BYTES,
            max_backups: BATCH_LOG_MAX_BACKUPS,
        }
    }

    /// Rolls the journal over to `<file>.1` once it reaches `rotate_bytes`,
    /// keeping at most `max_backups` older files.
    pub fn with_rotation(mut self, rotate_bytes: u64, max_backups: usize) -> Self {
        self.rotate_bytes = rotate_bytes;
        self.max_backups = max_backups;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(&self, level: &str, event: &str, data: serde_json::Value) {
        let _ = self.append(level, event, data);
    }

    fn append(&self, level: &str, event: &str, data: serde_json::Value) -> Result<()> {
        let line = serde_json::json!({
            "ts_ms": now_ms(),
            "batch_id": self.batch_id,
            "tag": self.tag,
            "level": level,
            "event": event,
            "data": data
        })
        .to_string();

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        self.rotate_if_needed()?;
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?
            .write_all(format!("{line}\n").as_bytes())?;
        Ok(())
    }

    fn rotate_if_needed(&self) -> std::io::Result<()> {
        let full = std::fs::metadata(&self.path).is_ok_and(|m| m.len() >= self.rotate_bytes);
        if !full {
            return Ok(());
        }
        if self.max_backups == 0 {
            return ignore_missing(std::fs::remove_file(&self.path));
        }

        ignore_missing(std::fs::remove_file(self.backup_path(self.max_backups)))?;
        for n in (1..self.max_backups).rev() {
            ignore_missing(std::fs::rename(self.backup_path(n), self.backup_path(n + 1)))?;
        }
        std::fs::rename(&self.path, self.backup_path(1))
    }

    fn backup_path(&self, n: usize) -> PathBuf {
        let mut name = self.path.as_os_str().to_os_string();
        name.push(format!(".{n}"));
        PathBuf::from(name)
    }
}

fn ignore_missing(res: std::io::Result<()>) -> std::io::Result<()> {
    match res {
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// Deletes batch journals (and their backups) older than the retention window.
pub fn prune_batch_logs(paths: &AppPaths) -> Result<usize> {
    prune_logs_older_than(
        &paths.batch_logs_dir(),
        Duration::from_secs(BATCH_LOG_MAX_AGE_DAYS * 24 * 60 * 60),
    )
}

fn prune_logs_older_than(dir: &Path, max_age: Duration) -> Result<usize> {
    if !dir.exists() {
        return Ok(0);
    }
    let now = SystemTime::now();
    let mut removed = 0_usize;
    for entry in std::fs::read_dir(dir)? {
        let entry = match entry {
            Ok(v) => v,
            Err(_) => continue,
        };
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let modified = match entry.metadata().and_then(|m| m.modified()) {
            Ok(v) => v,
            Err(_) => continue,
        };
        let age = now.duration_since(modified).unwrap_or_default();
        if age > max_age && std::fs::remove_file(&path).is_ok() {
            removed += 1;
        }
    }
    Ok(removed)
}

pub(crate) fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_journal_rolls_over_and_drops_the_oldest_backup() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = AppPaths::new(dir.path().to_path_buf());
        let journal = BatchJournal::open(&paths, "b-rot", "AUDIO").with_rotation(200, 2);

        for n in 0..30 {
            journal.record("info", "job_log", serde_json::json!({ "n": n }));
        }

        let main = journal.path().to_path_buf();
        let first = journal.backup_path(1);
        let second = journal.backup_path(2);
        assert!(main.exists());
        assert!(first.exists());
        assert!(second.exists());
        assert!(!journal.backup_path(3).exists());

        let read = |p: &Path| -> Vec<serde_json::Value> {
            std::fs::read_to_string(p)
                .expect("read journal")
                .lines()
                .map(|l| serde_json::from_str(l).expect("json line"))
                .collect()
        };
        let newest = read(&main);
        assert_eq!(newest.last().expect("last line")["data"]["n"], 29);
        let older = read(&first);
        let seq = |line: &serde_json::Value| line["data"]["n"].as_i64();
        assert!(seq(older.last().expect("backup line")) < seq(&newest[0]));
        assert!(!read(&second).is_empty());
    }

    #[test]
    fn journal_appends_one_json_object_per_line() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = AppPaths::new(dir.path().to_path_buf());
        let journal = BatchJournal::open(&paths, "b-1", "VIDEO");

        journal.record("info", "batch_started", serde_json::json!({ "jobs": 2 }));
        journal.record("error", "job_failed", serde_json::json!({ "url": "u" }));

        let raw = std::fs::read_to_string(journal.path()).expect("read");
        let lines: Vec<serde_json::Value> = raw
            .lines()
            .map(|l| serde_json::from_str(l).expect("json line"))
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["event"], "batch_started");
        assert_eq!(lines[0]["tag"], "VIDEO");
        assert_eq!(lines[0]["data"]["jobs"], 2);
        assert_eq!(lines[1]["level"], "error");
        assert_eq!(lines[1]["batch_id"], "b-1");
    }

    #[test]
    fn prune_removes_only_stale_logs() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = AppPaths::new(dir.path().to_path_buf());
        std::fs::create_dir_all(paths.batch_logs_dir()).expect("mkdir");

        let stale = paths.batch_log_path("old");
        let fresh = paths.batch_log_path("new");
        std::fs::write(&stale, "{}\n").expect("write stale");
        std::fs::write(&fresh, "{}\n").expect("write fresh");

        let forty_days_ago = SystemTime::now() - Duration::from_secs(40 * 24 * 60 * 60);
        filetime::set_file_mtime(&stale, filetime::FileTime::from_system_time(forty_days_ago))
            .expect("set mtime");

        let removed = prune_batch_logs(&paths).expect("prune");
        assert_eq!(removed, 1);
        assert!(!stale.exists());
        assert!(fresh.exists());
    }

    #[test]
    fn prune_of_missing_dir_is_a_no_op() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = AppPaths::new(dir.path().join("nowhere"));
        assert_eq!(prune_batch_logs(&paths).expect("prune"), 0);
    }
}
