use crate::cmd;
use crate::config::DownloaderConfig;
use crate::{EngineError, Result};
use regex::Regex;
use serde::Serialize;
use std::path::Path;
use std::sync::OnceLock;

const SUMMARY_RULE_WIDTH: usize = 80;

fn bitrate_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d+)k").expect("valid bitrate regex"))
}

/// Arguments for `yt-dlp -F <url>`.
pub fn list_formats_args(url: &str, config: &DownloaderConfig) -> Vec<String> {
    let mut args = Vec::new();
    if let Some(components) = config
        .remote_components
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
    {
        args.push("--remote-components".to_string());
        args.push(components.to_string());
    }
    args.push("-F".to_string());
    args.push(url.trim().to_string());
    args
}

/// Runs the format listing and returns stdout followed by stderr.
pub fn fetch_formats(program: &Path, url: &str, config: &DownloaderConfig) -> Result<String> {
    let output = cmd::command(program)
        .args(list_formats_args(url, config))
        .output()
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => EngineError::ExternalToolMissing {
                tool: program.to_string_lossy().to_string(),
            },
            _ => EngineError::Io(e),
        })?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !output.status.success() && stdout.trim().is_empty() {
        return Err(EngineError::ExternalToolFailed {
            tool: program.to_string_lossy().to_string(),
            code: output.status.code(),
            stderr: stderr.trim().to_string(),
        });
    }

    let mut merged = stdout.trim_end().to_string();
    if !stderr.trim().is_empty() {
        if !merged.is_empty() {
            merged.push('\n');
        }
        merged.push_str(stderr.trim_end());
    }
    Ok(merged)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    AudioOnly,
    VideoOnly,
    Combined,
}

impl StreamKind {
    fn classify(lowercase_line: &str) -> Self {
        if lowercase_line.contains("audio only") {
            Self::AudioOnly
        } else if lowercase_line.contains("video only") {
            Self::VideoOnly
        } else {
            Self::Combined
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioTier {
    Medium,
    Good,
    VeryGood,
    Excellent,
}

impl AudioTier {
    pub fn from_kbps(kbps: u32) -> Self {
        if kbps >= 480 {
            Self::Excellent
        } else if kbps >= 256 {
            Self::VeryGood
        } else if kbps >= 160 {
            Self::Good
        } else {
            Self::Medium
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Excellent => "🟢 EXCELLENT",
            Self::VeryGood => "🟡 VERY GOOD",
            Self::Good => "🟠 GOOD",
            Self::Medium => "🔴 MEDIUM",
        }
    }

    pub fn comment(&self) -> &'static str {
        match self {
            Self::Excellent => "✅ EXCELLENT – near YouTube's max (512 kbps 5.1)",
            Self::VeryGood => "✅ VERY GOOD – high-quality stereo (max 384 kbps)",
            Self::Good => "✓ GOOD – standard quality",
            Self::Medium => "⚠ MEDIUM – lower-quality audio",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FormatRow {
    pub id: String,
    pub kind: StreamKind,
    /// First `<digits>k` token on the line, 0 when there is none.
    pub bitrate_kbps: u32,
    pub line: String,
}

impl FormatRow {
    fn parse(line: &str) -> Option<Self> {
        let id = line.split_whitespace().next()?.to_string();
        let lower = line.to_lowercase();
        let bitrate_kbps = bitrate_re()
            .captures(&lower)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse().ok())
            .unwrap_or(0);
        Some(Self {
            id,
            kind: StreamKind::classify(&lower),
            bitrate_kbps,
            line: line.to_string(),
        })
    }

    pub fn audio_tier(&self) -> Option<AudioTier> {
        (self.kind == StreamKind::AudioOnly).then(|| AudioTier::from_kbps(self.bitrate_kbps))
    }

    fn annotated(&self) -> String {
        match self.audio_tier() {
            Some(tier) => format!("{} {}", self.line, tier.label()),
            None => self.line.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FormatFilter {
    All,
    Audio,
    /// Audio-only at 256 kbps or more.
    HighAudio,
    /// Audio-only at 480 kbps or more.
    HighestAudio,
    Video,
}

impl FormatFilter {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "all" => Some(Self::All),
            "audio" => Some(Self::Audio),
            "high_audio" => Some(Self::HighAudio),
            "highest_audio" => Some(Self::HighestAudio),
            "video" => Some(Self::Video),
            _ => None,
        }
    }

    fn accepts(&self, row: &FormatRow) -> bool {
        let audio = row.kind == StreamKind::AudioOnly;
        match self {
            Self::All => true,
            Self::Audio => audio,
            Self::HighAudio => audio && row.bitrate_kbps >= 256,
            Self::HighestAudio => audio && row.bitrate_kbps >= 480,
            Self::Video => !audio,
        }
    }

    fn summarizes_audio(&self) -> bool {
        matches!(self, Self::Audio | Self::HighAudio | Self::HighestAudio)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FormatTable {
    /// Everything up to and including the header and its separator row.
    pub preamble: Vec<String>,
    pub rows: Vec<FormatRow>,
}

/// `None` when the output has no `ID / EXT / RESOLUTION` header row.
pub fn parse_format_table(output: &str) -> Option<FormatTable> {
    let lines: Vec<&str> = output.split('\n').collect();
    let header = lines
        .iter()
        .position(|l| l.contains("ID") && l.contains("EXT") && l.contains("RESOLUTION"))?;
    let body_start = (header + 2).min(lines.len());

    let preamble = lines[..body_start].iter().map(|l| l.to_string()).collect();
    let rows = lines[body_start..]
        .iter()
        .map(|l| l.trim_end_matches('\r'))
        .filter(|l| !l.trim().is_empty())
        .filter_map(FormatRow::parse)
        .collect();
    Some(FormatTable { preamble, rows })
}

impl FormatTable {
    pub fn audio_rows(&self) -> impl Iterator<Item = &FormatRow> {
        self.rows.iter().filter(|r| r.kind == StreamKind::AudioOnly)
    }

    /// Highest-bitrate row among those the filter keeps; first one wins ties.
    pub fn best_audio(&self, filter: FormatFilter) -> Option<&FormatRow> {
        self.rows
            .iter()
            .filter(|r| r.kind == StreamKind::AudioOnly && filter.accepts(r))
            .fold(None, |best: Option<&FormatRow>, row| match best {
                Some(b) if b.bitrate_kbps >= row.bitrate_kbps => Some(b),
                _ => Some(row),
            })
    }

    pub fn render(&self, filter: FormatFilter) -> String {
        let mut out: Vec<String> = self.preamble.clone();
        let kept: Vec<&FormatRow> = self.rows.iter().filter(|r| filter.accepts(r)).collect();
        out.extend(kept.iter().map(|r| r.annotated()));

        if filter.summarizes_audio() {
            if let Some(best) = self.best_audio(filter) {
                let rule = "=".repeat(SUMMARY_RULE_WIDTH);
                out.push(format!("\n{rule}"));
                out.push("📊 AUDIO QUALITY SUMMARY:".to_string());
                out.push(rule);
                out.push(format!(
                    "🎵 Highest available bitrate: {} kbps",
                    best.bitrate_kbps
                ));
                out.push(AudioTier::from_kbps(best.bitrate_kbps).comment().to_string());
                out.push(format!("\n📋 Found {} audio format(s)", kept.len()));
                out.push(format!(
                    "\n💡 Recommended: use format ID {} for best quality",
                    best.id
                ));
            }
        }
        out.join("\n")
    }
}

/// Filters raw `-F` output; output without a format table comes back as is.
pub fn render_filtered(output: &str, filter: FormatFilter) -> String {
    match parse_format_table(output) {
        Some(table) => table.render(filter),
        None => output.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
[youtube] Extracting URL: https://youtu.be/abc
[info] Available formats for abc:
ID  EXT   RESOLUTION FPS CH |   FILESIZE   TBR PROTO | VCODEC          VBR ACODEC      ABR ASR MORE INFO
---------------------------------------------------------------------------------------------------------
139 m4a   audio only      2 |    1.01MiB   49k https | audio only          mp4a.40.5   49k 22k low, m4a_dash
140 m4a   audio only      2 |    2.68MiB  129k https | audio only          mp4a.40.2  129k 44k medium, m4a_dash
251 webm  audio only      2 |    2.87MiB  139k https | audio only          opus       139k 48k medium, webm_dash
774 webm  audio only      2 |   10.10MiB  492k https | audio only          opus       492k 48k high, webm_dash
137 mp4   1920x1080   30    |   60.29MiB 2923k https | avc1.640028   2923k video only          1080p, mp4_dash
18  mp4   640x360     30  2 |    9.96MiB  483k https | avc1.42001E         mp4a.40.2       44k 360p
";

    #[test]
    fn parses_rows_after_header_and_separator() {
        let table = parse_format_table(SAMPLE).expect("table");
        assert_eq!(table.preamble.len(), 4);
        assert_eq!(table.rows.len(), 6);
        assert_eq!(table.rows[0].id, "139");
        assert_eq!(table.rows[0].bitrate_kbps, 49);
        assert_eq!(table.rows[3].kind, StreamKind::AudioOnly);
        assert_eq!(table.rows[4].kind, StreamKind::VideoOnly);
        assert_eq!(table.rows[5].kind, StreamKind::Combined);
        assert_eq!(table.audio_rows().count(), 4);
    }

    #[test]
    fn output_without_header_is_unchanged() {
        let raw = "ERROR: [youtube] abc: Video unavailable";
        assert!(parse_format_table(raw).is_none());
        assert_eq!(render_filtered(raw, FormatFilter::Audio), raw);
    }

    #[test]
    fn audio_tiers_follow_bitrate_thresholds() {
        assert_eq!(AudioTier::from_kbps(512), AudioTier::Excellent);
        assert_eq!(AudioTier::from_kbps(480), AudioTier::Excellent);
        assert_eq!(AudioTier::from_kbps(256), AudioTier::VeryGood);
        assert_eq!(AudioTier::from_kbps(160), AudioTier::Good);
        assert_eq!(AudioTier::from_kbps(159), AudioTier::Medium);
    }

    #[test]
    fn audio_filter_annotates_and_summarizes() {
        let rendered = render_filtered(SAMPLE, FormatFilter::Audio);
        assert!(rendered.contains("opus       492k 48k high, webm_dash 🟢 EXCELLENT"));
        assert!(rendered.contains("22k low, m4a_dash 🔴 MEDIUM"));
        assert!(!rendered.contains("1920x1080"));
        assert!(rendered.contains("Highest available bitrate: 492 kbps"));
        assert!(rendered.contains("Found 4 audio format(s)"));
        assert!(rendered.contains("use format ID 774 for best quality"));
    }

    #[test]
    fn high_audio_filters_by_bitrate() {
        let table = parse_format_table(SAMPLE).expect("table");
        let rendered = table.render(FormatFilter::HighAudio);
        assert!(rendered.contains("774 webm"));
        assert!(!rendered.contains("251 webm"));
        assert!(rendered.contains("Found 1 audio format(s)"));

        assert!(table.best_audio(FormatFilter::HighestAudio).is_some());
    }

    #[test]
    fn video_filter_keeps_video_and_combined_without_summary() {
        let rendered = render_filtered(SAMPLE, FormatFilter::Video);
        assert!(rendered.contains("137 mp4"));
        assert!(rendered.contains("18  mp4"));
        assert!(!rendered.contains("audio only      2"));
        assert!(!rendered.contains("AUDIO QUALITY SUMMARY"));
    }

    #[test]
    fn list_formats_args_end_with_url() {
        let args = list_formats_args(" https://youtu.be/abc ", &DownloaderConfig::default());
        assert_eq!(
            args,
            vec!["--remote-components", "ejs:github", "-F", "https://youtu.be/abc"]
        );
    }

    #[test]
    fn filter_names_parse() {
        assert_eq!(FormatFilter::parse("HIGH_AUDIO"), Some(FormatFilter::HighAudio));
        assert_eq!(FormatFilter::parse("bogus"), None);
    }
}
