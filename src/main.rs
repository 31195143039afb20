use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;
use viddedup::{DedupConfig, DedupOutcome, VideoDeduplicator, VideoReference};

const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "mkv", "webm", "avi", "m4v"];

/// Report near-duplicate videos by perceptual fingerprint
#[derive(Parser)]
#[command(version)]
struct Cli {
    /// TOML config file. `VIDDEDUP_*` environment variables override it
    #[arg(long)]
    config: Option<PathBuf>,
    /// Maximum Hamming distance treated as the same video
    #[arg(long)]
    threshold: Option<u32>,
    /// Frames sampled per video
    #[arg(long)]
    frame_count: Option<usize>,
    /// Print one JSON document instead of a line per file
    #[arg(long)]
    json: bool,
    /// Video files, or folders whose videos are checked in name order
    #[arg(required = true)]
    paths: Vec<PathBuf>,
}

#[derive(Serialize)]
struct FileReport {
    path: PathBuf,
    #[serde(flatten)]
    outcome: DedupOutcome,
}

#[derive(Serialize, Default)]
struct ScanReport {
    files: Vec<FileReport>,
    unique: usize,
    duplicates: usize,
    no_signal: usize,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = DedupConfig::load(cli.config.as_deref())?;
    if let Some(threshold) = cli.threshold {
        config.threshold = threshold;
    }
    if let Some(frame_count) = cli.frame_count {
        config.frame_count = frame_count;
    }

    let videos = collect_videos(&cli.paths)?;
    tracing::info!(
        "Checking {} videos (threshold {}, {} frames each)",
        videos.len(),
        config.threshold,
        config.frame_count
    );

    let mut dedup = VideoDeduplicator::with_ffmpeg(&config)?;

    let mut report = ScanReport::default();
    for video in videos {
        let outcome = dedup.check_and_register(&video, VideoReference::from_path(&video))?;
        match &outcome {
            DedupOutcome::Unique => report.unique += 1,
            DedupOutcome::Duplicate { .. } => report.duplicates += 1,
            DedupOutcome::NoSignal { .. } => report.no_signal += 1,
        }

        if !cli.json {
            println!("{}", describe(&video, &outcome));
        }
        report.files.push(FileReport {
            path: video,
            outcome,
        });
    }

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "{} unique, {} duplicates, {} without signal",
            report.unique, report.duplicates, report.no_signal
        );
    }

    Ok(())
}

fn describe(video: &Path, outcome: &DedupOutcome) -> String {
    match outcome {
        DedupOutcome::Unique => format!("{}: unique", video.display()),
        DedupOutcome::Duplicate { original, distance } => format!(
            "{}: duplicate of {} (distance {})",
            video.display(),
            original,
            distance
        ),
        DedupOutcome::NoSignal { policy } => {
            format!("{}: no signal ({:?})", video.display(), policy)
        }
    }
}

fn is_video(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| VIDEO_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Expand folders one level deep; files given directly are kept as is.
fn collect_videos(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut videos = Vec::new();
    for path in paths {
        if path.is_dir() {
            let mut entries = Vec::new();
            for entry in std::fs::read_dir(path)
                .with_context(|| format!("Failed to read directory {:?}", path))?
            {
                let entry_path = entry?.path();
                if entry_path.is_file() && is_video(&entry_path) {
                    entries.push(entry_path);
                }
            }
            entries.sort();
            videos.extend(entries);
        } else {
            videos.push(path.clone());
        }
    }
    Ok(videos)
}
