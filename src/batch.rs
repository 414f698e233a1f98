use crate::args::JobSpec;
use crate::config::DownloaderConfig;
use crate::events::EventSender;
use crate::paths::AppPaths;
use crate::runner::ProcessRunner;
use crate::urls::{clean_list, UrlFilter};
use crate::worker::{BatchHandle, BatchWorker};
use crate::{EngineError, Result};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

/// Owns the active batch of each tag and routes cancellation to it.
///
/// A new submission under a tag that is still running cancels the running
/// batch; the new worker then waits for it before launching anything, so a tag
/// never has two tool processes at once.
#[derive(Debug)]
pub struct BatchManager {
    events: EventSender,
    runner: ProcessRunner,
    config: DownloaderConfig,
    paths: Option<AppPaths>,
    active: Mutex<HashMap<String, BatchHandle>>,
}

impl BatchManager {
    pub fn new(events: EventSender, program: impl Into<PathBuf>, config: DownloaderConfig) -> Self {
        Self {
            events,
            runner: ProcessRunner::new(program, &config),
            config,
            paths: None,
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Journal every batch under `paths`.
    pub fn with_paths(mut self, paths: AppPaths) -> Self {
        self.paths = Some(paths);
        self
    }

    pub fn config(&self) -> &DownloaderConfig {
        &self.config
    }

    pub fn submit(&self, tag: &str, jobs: Vec<JobSpec>) -> Result<BatchHandle> {
        if jobs.is_empty() {
            return Err(EngineError::EmptyBatch {
                tag: tag.to_string(),
            });
        }

        let mut active = self.lock();
        active.retain(|_, handle| !handle.is_finished());

        let mut worker = BatchWorker::new(
            tag,
            jobs,
            self.runner.clone(),
            self.config.clone(),
            self.events.clone(),
        );
        if let Some(paths) = &self.paths {
            worker = worker.with_journal(paths);
        }
        if let Some(previous) = active.get(tag) {
            previous.cancel();
            worker = worker.after(previous.clone());
        }

        let handle = worker.start()?;
        active.insert(tag.to_string(), handle.clone());
        Ok(handle)
    }

    /// Submits one job per accepted URL in `text`, each shaped like `template`.
    /// Returns the ignored lines alongside the handle.
    pub fn submit_text(
        &self,
        tag: &str,
        text: &str,
        template: &JobSpec,
    ) -> Result<(BatchHandle, UrlFilter)> {
        let filtered = clean_list(text);
        let jobs = filtered
            .accepted
            .iter()
            .map(|url| template.for_url(url.as_str()))
            .collect();
        let handle = self.submit(tag, jobs)?;
        Ok((handle, filtered))
    }

    /// `false` when nothing is running under `tag`.
    pub fn cancel(&self, tag: &str) -> bool {
        match self.active(tag) {
            Some(handle) => {
                handle.cancel();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) -> usize {
        let handles: Vec<BatchHandle> = self
            .lock()
            .values()
            .filter(|h| !h.is_finished())
            .cloned()
            .collect();
        for handle in &handles {
            handle.cancel();
        }
        handles.len()
    }

    pub fn is_active(&self, tag: &str) -> bool {
        self.active(tag).is_some()
    }

    pub fn active(&self, tag: &str) -> Option<BatchHandle> {
        self.lock()
            .get(tag)
            .filter(|h| !h.is_finished())
            .cloned()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, BatchHandle>> {
        self.active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::event_channel;
    use std::time::Duration;

    fn manager(dir: &std::path::Path) -> (BatchManager, crate::events::EventReceiver) {
        let (tx, rx) = event_channel();
        let config = DownloaderConfig {
            poll_interval_ms: 20,
            ..DownloaderConfig::default()
        };
        (
            BatchManager::new(tx, dir.join("no-such-yt-dlp"), config),
            rx,
        )
    }

    #[test]
    fn empty_submission_is_refused() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (manager, _rx) = manager(dir.path());
        let err = manager.submit("VIDEO", Vec::new()).expect_err("refused");
        assert!(matches!(err, EngineError::EmptyBatch { ref tag } if tag == "VIDEO"));
        assert!(!manager.is_active("VIDEO"));
    }

    #[test]
    fn submit_text_with_no_urls_is_refused() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (manager, _rx) = manager(dir.path());
        let template = JobSpec::audio("", dir.path());
        let err = manager
            .submit_text("AUDIO", "hello\nworld\n", &template)
            .expect_err("refused");
        assert!(matches!(err, EngineError::EmptyBatch { .. }));
    }

    #[test]
    fn submit_text_expands_template_and_reports_ignored() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (manager, _rx) = manager(dir.path());
        let template = JobSpec::audio("", dir.path()).with_audio_codec("flac");
        let (handle, filtered) = manager
            .submit_text("AUDIO", "https://youtu.be/a\nnope\nhttps://youtu.be/b", &template)
            .expect("submit");

        assert_eq!(filtered.accepted.len(), 2);
        assert_eq!(filtered.ignored, vec!["nope".to_string()]);
        let summary = handle.wait_timeout(Duration::from_secs(10)).expect("finished");
        assert_eq!(summary.total, 2);
        assert_eq!(summary.failed, 2);
        assert!(!manager.is_active("AUDIO"));
        assert!(!manager.cancel("AUDIO"));
    }

    #[test]
    fn cancel_unknown_tag_is_a_no_op() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (manager, _rx) = manager(dir.path());
        assert!(!manager.cancel("VIDEO"));
        assert_eq!(manager.cancel_all(), 0);
        assert!(manager.active("VIDEO").is_none());
    }

    #[test]
    fn journal_is_written_when_paths_are_given() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = AppPaths::new(dir.path().to_path_buf());
        let (tx, _rx) = event_channel();
        let manager =
            BatchManager::new(tx, dir.path().join("no-such-yt-dlp"), DownloaderConfig::default())
                .with_paths(paths.clone());

        let handle = manager
            .submit("VIDEO", vec![JobSpec::video("https://youtu.be/a", dir.path())])
            .expect("submit");
        handle.wait();

        let raw = std::fs::read_to_string(paths.batch_log_path(handle.batch_id())).expect("journal");
        let events: Vec<String> = raw
            .lines()
            .map(|l| {
                let v: serde_json::Value = serde_json::from_str(l).expect("json");
                v["event"].as_str().unwrap_or_default().to_string()
            })
            .collect();
        assert_eq!(events.first().map(String::as_str), Some("batch_started"));
        assert!(events.iter().any(|e| e == "command"));
        assert!(events.iter().any(|e| e == "job_failed"));
        assert!(events.iter().any(|e| e == "batch_completed"));
    }
}
