use crate::paths::AppPaths;
use crate::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_COOKIES_BROWSER: &str = "chrome";
pub const DEFAULT_REMOTE_COMPONENTS: &str = "ejs:github";
pub const DEFAULT_AUDIO_CODEC: &str = "mp3";
const DEFAULT_TERMINATE_GRACE_MS: u64 = 5_000;
const DEFAULT_POLL_INTERVAL_MS: u64 = 200;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloaderConfig {
    /// Explicit yt-dlp executable; checked before any other location.
    pub ytdlp_path: Option<String>,
    pub default_output_dir: Option<String>,
    /// Browser profile used when a cookies path is set but is not a file.
    pub cookies_browser: String,
    /// Value for `--remote-components`; `None` omits the flag.
    pub remote_components: Option<String>,
    pub default_audio_codec: String,
    pub terminate_grace_ms: u64,
    pub poll_interval_ms: u64,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            ytdlp_path: None,
            default_output_dir: None,
            cookies_browser: DEFAULT_COOKIES_BROWSER.to_string(),
            remote_components: Some(DEFAULT_REMOTE_COMPONENTS.to_string()),
            default_audio_codec: DEFAULT_AUDIO_CODEC.to_string(),
            terminate_grace_ms: DEFAULT_TERMINATE_GRACE_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }
}

impl DownloaderConfig {
    pub fn terminate_grace(&self) -> Duration {
        Duration::from_millis(self.terminate_grace_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    fn validate(&self) -> Result<()> {
        if self.cookies_browser.trim().is_empty() {
            return Err(EngineError::Config("cookies_browser is empty".to_string()));
        }
        if self.default_audio_codec.trim().is_empty() {
            return Err(EngineError::Config("default_audio_codec is empty".to_string()));
        }
        Ok(())
    }
}

pub fn load_downloader_config(paths: &AppPaths) -> Result<DownloaderConfig> {
    let path = paths.downloader_config_path();
    if !path.exists() {
        return Ok(DownloaderConfig::default());
    }
    let bytes = std::fs::read(&path)?;
    let parsed: DownloaderConfig = serde_json::from_slice(&bytes).map_err(|e| {
        EngineError::Config(format!(
            "failed to parse downloader config at {}: {e}",
            path.to_string_lossy()
        ))
    })?;
    parsed.validate()?;
    Ok(parsed)
}

pub fn save_downloader_config(paths: &AppPaths, config: &DownloaderConfig) -> Result<()> {
    config.validate()?;
    let path = paths.downloader_config_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(config)?;
    std::fs::write(&path, format!("{json}\n"))?;
    Ok(())
}
