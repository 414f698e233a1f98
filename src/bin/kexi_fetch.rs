use std::io::Read;
use std::path::PathBuf;
use std::time::Duration;

use kexi_engine::args::{JobSpec, AUDIO_CODECS};
use kexi_engine::batch::BatchManager;
use kexi_engine::config::{self, DownloaderConfig};
use kexi_engine::events::{event_channel, EventPayload};
use kexi_engine::formats::{self, FormatFilter};
use kexi_engine::paths::{self, AppPaths};
use kexi_engine::worker::BatchState;
use kexi_engine::{journal, tools, urls};

const EVENT_POLL: Duration = Duration::from_millis(200);

fn main() -> Result<(), String> {
    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|a| a == "-h" || a == "--help") {
        print_help();
        return Ok(());
    }

    let mut base_dir: Option<PathBuf> = None;
    let mut audio = false;
    let mut codec: Option<String> = None;
    let mut video_format: Option<String> = None;
    let mut audio_format: Option<String> = None;
    let mut out_dir: Option<String> = None;
    let mut cookies: Option<String> = None;
    let mut auto_cookies = false;
    let mut list_formats = false;
    let mut filter = FormatFilter::All;
    let mut tag: Option<String> = None;
    let mut status = false;
    let mut inputs: Vec<String> = Vec::new();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--base-dir" => base_dir = Some(PathBuf::from(take_value(&args, &mut i)?)),
            "--audio" => audio = true,
            "--codec" => {
                let v = take_value(&args, &mut i)?;
                if !AUDIO_CODECS.contains(&v.as_str()) {
                    return Err(format!(
                        "unsupported codec: {v} (one of {})",
                        AUDIO_CODECS.join(", ")
                    ));
                }
                codec = Some(v);
            }
            "--video-format" => video_format = Some(take_value(&args, &mut i)?),
            "--audio-format" => audio_format = Some(take_value(&args, &mut i)?),
            "--out" => out_dir = Some(take_value(&args, &mut i)?),
            "--cookies" => cookies = Some(take_value(&args, &mut i)?),
            "--auto-cookies" => auto_cookies = true,
            "--list-formats" => list_formats = true,
            "--filter" => {
                let v = take_value(&args, &mut i)?;
                filter = FormatFilter::parse(&v)
                    .ok_or_else(|| format!("unknown filter: {v} (try --help)"))?;
            }
            "--tag" => tag = Some(take_value(&args, &mut i)?),
            "--status" => status = true,
            other if other.starts_with("--") => {
                return Err(format!("unknown arg: {other} (try --help)"))
            }
            other => inputs.push(other.to_string()),
        }
        i += 1;
    }

    let paths = match base_dir {
        Some(dir) => AppPaths::new(dir),
        None => AppPaths::from_env()
            .ok_or_else(|| "could not determine base dir; pass --base-dir".to_string())?,
    };
    paths.ensure_dirs().map_err(|e| e.to_string())?;
    let config = config::load_downloader_config(&paths).map_err(|e| e.to_string())?;

    let prune_paths = paths.clone();
    std::thread::spawn(move || {
        let _ = journal::prune_batch_logs(&prune_paths);
    });

    if status {
        let report = tools::ytdlp_tools_status(&paths, &config);
        let json = serde_json::to_string_pretty(&report).map_err(|e| e.to_string())?;
        println!("{json}");
        return Ok(());
    }

    let tool = tools::locate_ytdlp(&paths, &config).map_err(|e| e.to_string())?;

    let text = if inputs.is_empty() {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .map_err(|e| e.to_string())?;
        buf
    } else {
        inputs.join("\n")
    };

    if list_formats {
        let filtered = urls::clean_list(&text);
        report_ignored(&filtered);
        for url in &filtered.accepted {
            let raw = formats::fetch_formats(&tool.path, url, &config).map_err(|e| e.to_string())?;
            println!("{}", formats::render_filtered(&raw, filter));
        }
        return Ok(());
    }

    let requested_dir = out_dir
        .or_else(|| config.default_output_dir.clone())
        .unwrap_or_default();
    let output_dir = paths::ensure_output_dir(&requested_dir, &paths.default_download_dir())
        .map_err(|e| format!("cannot create output folder: {e}"))?;

    let cookies = cookies.or_else(|| {
        auto_cookies
            .then(paths::find_cookies_file)
            .flatten()
            .map(|p| p.to_string_lossy().to_string())
    });

    let mut template = if audio {
        JobSpec::audio("", output_dir.clone())
    } else {
        JobSpec::video("", output_dir.clone())
    };
    if let Some(v) = codec {
        template = template.with_audio_codec(v);
    }
    if let Some(v) = video_format {
        template = template.with_video_format(v);
    }
    if let Some(v) = audio_format {
        template = template.with_audio_format(v);
    }
    if let Some(v) = cookies {
        template = template.with_cookies(v);
    }

    let tag = tag.unwrap_or_else(|| if audio { "AUDIO" } else { "VIDEO" }.to_string());
    let (tx, rx) = event_channel();
    let manager = BatchManager::new(tx, tool.path.clone(), config).with_paths(paths);

    println!("yt-dlp: {}", tool.path.to_string_lossy());
    println!("Saving to: {}", output_dir.to_string_lossy());

    let (handle, filtered) = manager
        .submit_text(&tag, &text, &template)
        .map_err(|e| e.to_string())?;
    report_ignored(&filtered);

    loop {
        let finished = handle.is_finished();
        while let Some(event) = rx.next_timeout(EVENT_POLL) {
            if let EventPayload::Log(line) = event.payload {
                println!("[{}] {line}", event.tag);
            }
        }
        if finished {
            break;
        }
    }

    let summary = handle.wait();
    println!(
        "{}: {} succeeded, {} failed, {} canceled, {} skipped",
        summary.state.as_str(),
        summary.succeeded,
        summary.failed,
        summary.canceled,
        summary.skipped
    );
    if summary.failed > 0 || summary.state == BatchState::Cancelled {
        return Err(format!(
            "{} of {} job(s) did not finish",
            summary.total - summary.succeeded,
            summary.total
        ));
    }
    Ok(())
}

fn take_value(args: &[String], i: &mut usize) -> Result<String, String> {
    let flag = &args[*i];
    *i += 1;
    args.get(*i)
        .cloned()
        .ok_or_else(|| format!("{flag} requires a value"))
}

fn report_ignored(filtered: &urls::UrlFilter) {
    if let Some(summary) = filtered.ignored_summary() {
        eprintln!("{summary}");
    }
}

fn print_help() {
    let defaults = DownloaderConfig::default();
    println!(
        r#"kexi_fetch

Downloads YouTube videos or audio through yt-dlp, one batch at a time.
URLs come from the arguments, or from stdin (one per line) when none are given.

Usage:
  kexi_fetch https://youtu.be/<id> [more urls...]
  kexi_fetch --audio --codec flac < urls.txt
  kexi_fetch --list-formats --filter high_audio https://youtu.be/<id>

Options:
  --base-dir <path>       Override base dir (default: $KEXI_BASE_DIR or the platform data dir)
  --audio                 Extract audio instead of downloading video
  --codec <name>          Audio codec (default: {codec})
  --video-format <id>     Video format id ("best" lets yt-dlp choose)
  --audio-format <id>     Audio track merged with --video-format
  --out <dir>             Output folder (default: config, then Downloads)
  --cookies <path>        cookies.txt to pass; a missing file falls back to --cookies-from-browser {browser}
  --auto-cookies          Look for cookies.txt in Downloads, the current dir and home
  --list-formats          Print the available formats instead of downloading
  --filter <name>         all | audio | high_audio | highest_audio | video
  --tag <name>            Batch tag shown on every output line
  --status                Print yt-dlp discovery status as JSON
"#,
        codec = defaults.default_audio_codec,
        browser = defaults.cookies_browser,
    );
}
