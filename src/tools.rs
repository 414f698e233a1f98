use crate::config::DownloaderConfig;
use crate::paths::{self, AppPaths};
use crate::{EngineError, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};

pub const YTDLP_TOOL: &str = "yt-dlp";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolSource {
    Configured,
    Bundled,
    Venv,
    SystemPath,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResolvedTool {
    pub path: PathBuf,
    pub source: ToolSource,
}

#[derive(Debug, Clone, Serialize)]
pub struct YtDlpToolsStatus {
    pub available: bool,
    pub source: Option<ToolSource>,
    pub ytdlp_path: String,
    pub ytdlp_version: Option<String>,
}

/// Finds the yt-dlp executable, in order: configured override, bundled copy,
/// virtual environment, then `PATH`.
///
/// Missing yt-dlp is a startup failure; callers should refuse to run batches.
pub fn locate_ytdlp(paths: &AppPaths, config: &DownloaderConfig) -> Result<ResolvedTool> {
    let exe_dir = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(Path::to_path_buf));
    if let Some(found) = ytdlp_file_candidates(paths, config, exe_dir.as_deref())
        .into_iter()
        .find(|(_, path)| path.is_file())
    {
        return Ok(ResolvedTool {
            path: found.1,
            source: found.0,
        });
    }

    which::which(YTDLP_TOOL)
        .map(|path| ResolvedTool {
            path,
            source: ToolSource::SystemPath,
        })
        .map_err(|_| EngineError::ExternalToolMissing {
            tool: YTDLP_TOOL.to_string(),
        })
}

pub fn ytdlp_tools_status(paths: &AppPaths, config: &DownloaderConfig) -> YtDlpToolsStatus {
    match locate_ytdlp(paths, config) {
        Ok(resolved) => {
            let version = tool_version_first_line_with_arg(&resolved.path, "--version");
            YtDlpToolsStatus {
                available: version.is_some(),
                source: Some(resolved.source),
                ytdlp_path: resolved.path.to_string_lossy().to_string(),
                ytdlp_version: version,
            }
        }
        Err(_) => YtDlpToolsStatus {
            available: false,
            source: None,
            ytdlp_path: String::new(),
            ytdlp_version: None,
        },
    }
}

/// File-system locations to check before falling back to a `PATH` lookup.
fn ytdlp_file_candidates(
    paths: &AppPaths,
    config: &DownloaderConfig,
    exe_dir: Option<&Path>,
) -> Vec<(ToolSource, PathBuf)> {
    let mut candidates = Vec::new();

    if let Some(configured) = config.ytdlp_path.as_deref() {
        let trimmed = configured.trim();
        if !trimmed.is_empty() {
            candidates.push((ToolSource::Configured, paths::expand_tilde(trimmed)));
        }
    }

    if let Some(exe_dir) = exe_dir {
        // macOS app bundles keep helpers in Contents/Resources/bin.
        if let Some(contents) = exe_dir.parent() {
            candidates.push((
                ToolSource::Bundled,
                paths::with_exe_suffix(contents.join("Resources").join("bin").join(YTDLP_TOOL)),
            ));
        }
        candidates.push((
            ToolSource::Bundled,
            paths::with_exe_suffix(exe_dir.join("bin").join(YTDLP_TOOL)),
        ));
    }
    candidates.push((ToolSource::Bundled, paths.bundled_ytdlp_path()));

    if let Some(exe_dir) = exe_dir {
        candidates.push((
            ToolSource::Venv,
            paths::venv_tool_path(&exe_dir.join("venv"), YTDLP_TOOL),
        ));
    }
    candidates.push((
        ToolSource::Venv,
        paths::venv_tool_path(&paths.venv_dir(), YTDLP_TOOL),
    ));

    candidates
}

fn tool_version_first_line_with_arg(
    program: impl AsRef<std::ffi::OsStr>,
    arg: &str,
) -> Option<String> {
    let output = crate::cmd::command(program).arg(arg).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8_lossy(&output.stdout);
    let first = text.lines().next()?.trim();
    if first.is_empty() {
        return None;
    }
    Some(first.to_string())
}
