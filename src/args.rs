use crate::config::DownloaderConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Format id meaning "let yt-dlp pick".
pub const BEST_FORMAT_SENTINEL: &str = "best";
pub const OUTPUT_TEMPLATE: &str = "%(title)s.%(ext)s";
pub const MERGE_CONTAINER: &str = "mp4";
const VIDEO_FALLBACK_CHAIN: &str = "bestvideo[ext=mp4]+bestaudio[ext=m4a]/bestvideo+bestaudio/best";

pub const VIDEO_PRESETS: &[(&str, &str)] = &[
    ("Best Quality (Auto)", BEST_FORMAT_SENTINEL),
    ("8K – AV01 – 403", "403"),
    ("8K – AV1 – 416", "416"),
    ("8K – AV1 – 417", "417"),
    ("8K – VP9 – 571", "571"),
    ("8K – VP9 – 272", "272"),
    ("8K – AV1 – 402", "402"),
    ("8K – AV1 – 701", "701"),
    ("8K – AV1 – 700", "700"),
    ("4K – AV01 – 401", "401"),
    ("4K – VP9 – 315", "315"),
    ("4K – VP9 – 337", "337"),
    ("4K – AV01 – 400", "400"),
    ("4K – AV1 – 399", "399"),
    ("4K – AV01 – 398", "398"),
    ("4K – VP9 – 313", "313"),
    ("1440p – VP9 – 308", "308"),
    ("1440p – VP9 – 271", "271"),
    ("1440p – VP9 – 336", "336"),
    ("1440p – AV1 – 302", "302"),
    ("1440p – AVC1 – 264", "264"),
    ("1080p – VP9 – 303", "303"),
    ("1080p – VP9 – 248", "248"),
    ("1080p – VP9 – 335", "335"),
    ("1080p – AV1 – 301", "301"),
    ("1080p – AVC1 – 137", "137"),
    ("720p – AVC1 – 136", "136"),
    ("720p – VP9 – 247", "247"),
];

pub const AUDIO_TRACK_PRESETS: &[(&str, &str)] = &[
    ("Best Audio (Opus)", "251"),
    ("High Audio (Opus)", "250"),
    ("Medium Audio (Opus)", "249"),
    ("AAC Audio (M4A)", "140"),
    ("Low Audio (AAC)", "139"),
];

pub const AUDIO_CODECS: &[&str] = &["mp3", "flac", "alac", "wav", "m4a", "opus", "ogg"];

pub fn preset_id<'a>(presets: &'a [(&'a str, &'a str)], label: &str) -> Option<&'a str> {
    presets
        .iter()
        .find(|(name, _)| *name == label)
        .map(|(_, id)| *id)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobMode {
    Video,
    Audio,
}

/// One download request. Which format fields matter depends on `mode`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSpec {
    pub url: String,
    pub mode: JobMode,
    #[serde(default)]
    pub video_format_id: Option<String>,
    #[serde(default)]
    pub audio_format_id: Option<String>,
    #[serde(default)]
    pub audio_codec: Option<String>,
    pub output_dir: PathBuf,
    #[serde(default)]
    pub cookies_path: Option<String>,
}

impl JobSpec {
    pub fn video(url: impl Into<String>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            mode: JobMode::Video,
            video_format_id: None,
            audio_format_id: None,
            audio_codec: None,
            output_dir: output_dir.into(),
            cookies_path: None,
        }
    }

    pub fn audio(url: impl Into<String>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            mode: JobMode::Audio,
            ..Self::video(url, output_dir)
        }
    }

    pub fn with_video_format(mut self, id: impl Into<String>) -> Self {
        self.video_format_id = Some(id.into());
        self
    }

    pub fn with_audio_format(mut self, id: impl Into<String>) -> Self {
        self.audio_format_id = Some(id.into());
        self
    }

    pub fn with_audio_codec(mut self, codec: impl Into<String>) -> Self {
        self.audio_codec = Some(codec.into());
        self
    }

    pub fn with_cookies(mut self, path: impl Into<String>) -> Self {
        self.cookies_path = Some(path.into());
        self
    }

    /// Same options, different URL; used to expand a template over a URL list.
    pub fn for_url(&self, url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..self.clone()
        }
    }
}

/// yt-dlp format selector for a video job, fallbacks included.
pub fn video_format_selector(video_id: Option<&str>, audio_id: Option<&str>) -> String {
    match non_empty(video_id) {
        Some(video) if video != BEST_FORMAT_SENTINEL => {
            let audio = non_empty(audio_id).unwrap_or("bestaudio");
            format!("{video}+{audio}/{VIDEO_FALLBACK_CHAIN}")
        }
        _ => VIDEO_FALLBACK_CHAIN.to_string(),
    }
}

pub fn output_template(output_dir: &Path) -> String {
    output_dir.join(OUTPUT_TEMPLATE).to_string_lossy().to_string()
}

/// Builds the yt-dlp argument vector (program excluded) for one job.
///
/// The only I/O is the cookie check: an existing cookies file is passed as a
/// cookie jar, anything else that is set falls back to the configured browser.
pub fn build_args(spec: &JobSpec, config: &DownloaderConfig) -> Vec<String> {
    let mut args: Vec<String> = Vec::new();

    if let Some(components) = non_empty(config.remote_components.as_deref()) {
        args.push("--remote-components".to_string());
        args.push(components.to_string());
    }

    match spec.mode {
        JobMode::Audio => {
            let codec = non_empty(spec.audio_codec.as_deref())
                .unwrap_or(config.default_audio_codec.as_str());
            args.extend([
                "-f".to_string(),
                "bestaudio".to_string(),
                "--extract-audio".to_string(),
                "--audio-format".to_string(),
                codec.to_string(),
                "--audio-quality".to_string(),
                "0".to_string(),
            ]);
        }
        JobMode::Video => {
            args.extend([
                "-f".to_string(),
                video_format_selector(
                    spec.video_format_id.as_deref(),
                    spec.audio_format_id.as_deref(),
                ),
                "--merge-output-format".to_string(),
                MERGE_CONTAINER.to_string(),
            ]);
        }
    }

    args.push("--newline".to_string());
    args.push("-o".to_string());
    args.push(output_template(&spec.output_dir));

    if let Some(cookies) = non_empty(spec.cookies_path.as_deref()) {
        let cookie_file = crate::paths::expand_tilde(cookies);
        if cookie_file.is_file() {
            args.push("--cookies".to_string());
            args.push(cookie_file.to_string_lossy().to_string());
        } else {
            args.push("--cookies-from-browser".to_string());
            args.push(config.cookies_browser.clone());
        }
    }

    args.push(spec.url.clone());
    args
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
