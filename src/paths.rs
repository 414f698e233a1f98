use std::path::{Path, PathBuf};

const BASE_DIR_ENV_VAR: &str = "KEXI_BASE_DIR";
const APP_DIR_NAME: &str = "kexi-downloader";
const COOKIES_FILE_NAME: &str = "cookies.txt";

#[derive(Debug, Clone)]
pub struct AppPaths {
    pub base_dir: PathBuf,
}

impl AppPaths {
    pub fn new(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// `KEXI_BASE_DIR` if set, otherwise the platform data directory.
    pub fn from_env() -> Option<Self> {
        if let Ok(v) = std::env::var(BASE_DIR_ENV_VAR) {
            let t = v.trim();
            if !t.is_empty() {
                return Some(Self::new(expand_tilde(t)));
            }
        }
        dirs::data_dir().map(|d| Self::new(d.join(APP_DIR_NAME)))
    }

    pub fn config_dir(&self) -> PathBuf {
        self.base_dir.join("config")
    }

    pub fn downloader_config_path(&self) -> PathBuf {
        self.config_dir().join("downloader.json")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.base_dir.join("logs")
    }

    pub fn batch_logs_dir(&self) -> PathBuf {
        self.logs_dir().join("batches")
    }

    pub fn batch_log_path(&self, batch_id: &str) -> PathBuf {
        self.batch_logs_dir().join(format!("{batch_id}.jsonl"))
    }

    pub fn tools_dir(&self) -> PathBuf {
        self.base_dir.join("tools")
    }

    pub fn bundled_ytdlp_path(&self) -> PathBuf {
        with_exe_suffix(self.tools_dir().join("yt-dlp").join("yt-dlp"))
    }

    pub fn venv_dir(&self) -> PathBuf {
        self.base_dir.join("venv")
    }

    pub fn default_download_dir(&self) -> PathBuf {
        if let Some(dir) = dirs::download_dir() {
            return dir;
        }
        if let Some(home) = dirs::home_dir() {
            return home.join("Downloads");
        }
        self.base_dir.join("downloads")
    }

    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.config_dir())?;
        std::fs::create_dir_all(self.batch_logs_dir())?;
        std::fs::create_dir_all(self.tools_dir())?;
        Ok(())
    }
}

/// Path of the tool binary inside a virtual environment.
pub fn venv_tool_path(venv_dir: &Path, tool: &str) -> PathBuf {
    if cfg!(windows) {
        with_exe_suffix(venv_dir.join("Scripts").join(tool))
    } else {
        venv_dir.join("bin").join(tool)
    }
}

pub fn with_exe_suffix(mut path: PathBuf) -> PathBuf {
    if cfg!(windows) {
        path.set_extension("exe");
    }
    path
}

pub fn expand_tilde(raw: &str) -> PathBuf {
    let rest = if raw == "~" {
        Some("")
    } else {
        raw.strip_prefix("~/").or_else(|| raw.strip_prefix("~\\"))
    };
    match (rest, dirs::home_dir()) {
        (Some(rest), Some(home)) if rest.is_empty() => home,
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(raw),
    }
}

/// Resolves the folder a batch writes into and creates it.
///
/// An empty input selects `fallback`. Relative paths are resolved against the
/// current directory so the tool receives an absolute output template.
pub fn ensure_output_dir(input: &str, fallback: &Path) -> std::io::Result<PathBuf> {
    let trimmed = input.trim();
    let mut dir = if trimmed.is_empty() {
        fallback.to_path_buf()
    } else {
        expand_tilde(trimmed)
    };
    if !dir.is_absolute() {
        dir = std::env::current_dir()?.join(dir);
    }
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

pub fn cookie_file_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    let home = dirs::home_dir();
    if let Some(home) = &home {
        candidates.push(home.join("Downloads").join(COOKIES_FILE_NAME));
    }
    if let Ok(cwd) = std::env::current_dir() {
        candidates.push(cwd.join(COOKIES_FILE_NAME));
    }
    if let Some(home) = &home {
        candidates.push(home.join(COOKIES_FILE_NAME));
    }
    candidates
}

pub fn find_cookies_file() -> Option<PathBuf> {
    first_existing_file(&cookie_file_candidates())
}

pub fn first_existing_file(candidates: &[PathBuf]) -> Option<PathBuf> {
    candidates.iter().find(|p| p.is_file()).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_output_dir_creates_nested_folder() {
        let dir = tempfile::tempdir().expect("tempdir");
        let target = dir.path().join("a").join("b");
        let out = ensure_output_dir(&target.to_string_lossy(), dir.path()).expect("ensure");
        assert_eq!(out, target);
        assert!(target.is_dir());
    }

    #[test]
    fn ensure_output_dir_uses_fallback_for_blank_input() {
        let dir = tempfile::tempdir().expect("tempdir");
        let fallback = dir.path().join("downloads");
        let out = ensure_output_dir("   ", &fallback).expect("ensure");
        assert_eq!(out, fallback);
        assert!(fallback.is_dir());
    }

    #[test]
    fn first_existing_file_skips_missing_and_directories() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = dir.path().join("missing.txt");
        let folder = dir.path().join("cookies.txt");
        std::fs::create_dir_all(&folder).expect("mkdir");
        let real = dir.path().join("real.txt");
        std::fs::write(&real, "# Netscape HTTP Cookie File\n").expect("write");

        let found = first_existing_file(&[missing, folder, real.clone()]);
        assert_eq!(found, Some(real));
    }

    #[test]
    fn expand_tilde_leaves_plain_paths_alone() {
        assert_eq!(expand_tilde("/srv/media"), PathBuf::from("/srv/media"));
        assert_eq!(expand_tilde("relative/dir"), PathBuf::from("relative/dir"));
    }

    #[test]
    fn batch_log_path_lives_under_logs() {
        let paths = AppPaths::new(PathBuf::from("/base"));
        assert_eq!(
            paths.batch_log_path("abc"),
            PathBuf::from("/base/logs/batches/abc.jsonl")
        );
    }
}
