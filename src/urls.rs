use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;

use crate::worker::{JOB_FAILED_MARKER, JOB_SUCCEEDED_MARKER};

const IGNORED_PREVIEW_LIMIT: usize = 5;

fn video_url_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(https?://)?(www\.)?(youtube\.com|youtu\.be)/.+$").expect("valid url regex")
    })
}

pub fn is_supported_url(value: &str) -> bool {
    video_url_re().is_match(value.trim())
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UrlFilter {
    pub accepted: Vec<String>,
    pub ignored: Vec<String>,
}

impl UrlFilter {
    /// Short, user-facing description of the ignored lines, or `None` when
    /// nothing was ignored.
    pub fn ignored_summary(&self) -> Option<String> {
        if self.ignored.is_empty() {
            return None;
        }
        let mut out = String::from("These lines were ignored:\n");
        out.push_str(
            &self
                .ignored
                .iter()
                .take(IGNORED_PREVIEW_LIMIT)
                .cloned()
                .collect::<Vec<_>>()
                .join("\n"),
        );
        if self.ignored.len() > IGNORED_PREVIEW_LIMIT {
            out.push_str(&format!(
                "\n… and {} more",
                self.ignored.len() - IGNORED_PREVIEW_LIMIT
            ));
        }
        Some(out)
    }
}

/// Splits pasted lines into accepted URLs and ignored lines, keeping order.
pub fn filter_urls<I, S>(lines: I) -> UrlFilter
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out = UrlFilter::default();
    for line in lines {
        let line = line.as_ref().trim();
        if line.is_empty() {
            continue;
        }
        if is_supported_url(line) {
            out.accepted.push(line.to_string());
        } else {
            out.ignored.push(line.to_string());
        }
    }
    out
}

/// Like [`filter_urls`] over a text box, but silently drops the log lines the
/// engine itself echoes into the same box (banners, command lines, markers).
pub fn clean_list(text: &str) -> UrlFilter {
    filter_urls(text.lines().map(str::trim).filter(|l| !is_echoed_log_line(l)))
}

fn is_echoed_log_line(line: &str) -> bool {
    let upper = line.to_uppercase();
    line.starts_with('=')
        || line.starts_with('-')
        || line.starts_with('[')
        || line.starts_with("Paste")
        || upper.contains("DOWNLOAD")
        || upper.contains("RUNNING")
        || upper.contains("COMMAND:")
        || line.contains(JOB_SUCCEEDED_MARKER)
        || line.contains(JOB_FAILED_MARKER)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_urls_keeps_order_and_reports_ignored() {
        let out = filter_urls([
            "https://youtu.be/abc",
            "not a url",
            "https://www.youtube.com/watch?v=xyz",
        ]);
        assert_eq!(
            out.accepted,
            vec![
                "https://youtu.be/abc".to_string(),
                "https://www.youtube.com/watch?v=xyz".to_string()
            ]
        );
        assert_eq!(out.ignored, vec!["not a url".to_string()]);
    }

    #[test]
    fn scheme_and_www_are_optional() {
        assert!(is_supported_url("youtube.com/watch?v=1"));
        assert!(is_supported_url("www.youtube.com/shorts/abc"));
        assert!(is_supported_url("http://youtu.be/x"));
        assert!(!is_supported_url("https://youtube.com/"));
        assert!(!is_supported_url("https://vimeo.com/123"));
        assert!(!is_supported_url("ftp://youtube.com/watch?v=1"));
    }

    #[test]
    fn clean_list_drops_echoed_log_lines() {
        let text = "\n============\nDOWNLOAD STARTED\n[download]  5.0% of 3MiB\nRunning command:\n\
                    https://youtu.be/a\n✅ Finished: https://youtu.be/old\n  garbage  \n";
        let out = clean_list(text);
        assert_eq!(out.accepted, vec!["https://youtu.be/a".to_string()]);
        assert_eq!(out.ignored, vec!["garbage".to_string()]);
    }

    #[test]
    fn ignored_summary_truncates_after_five() {
        let lines: Vec<String> = (0..7).map(|i| format!("junk {i}")).collect();
        let summary = filter_urls(&lines).ignored_summary().expect("summary");
        assert!(summary.contains("junk 4"));
        assert!(!summary.contains("junk 5"));
        assert!(summary.ends_with("… and 2 more"));
        assert!(filter_urls(["https://youtu.be/a"]).ignored_summary().is_none());
    }
}
