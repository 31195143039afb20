//! Discover, download, deduplicate, normalize, upload and log.
//!
//! Platform search, transcoding, storage and the provenance sink are
//! collaborators behind small traits; this module only sequences them and
//! keeps one failing item from stopping the run.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

use crate::brand::BrandFilter;
use crate::video_dedup::{VideoDecoder, VideoDeduplicator, VideoReference};

/// A video fetched to local disk along with its platform metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadedVideo {
    pub platform: String,
    pub source_url: String,
    pub file_path: PathBuf,
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
    pub hashtags: Vec<String>,
}

pub trait Downloader {
    /// `Ok(None)` when the video is skipped or not brand related.
    fn fetch(&mut self, url: &str) -> Result<Option<DownloadedVideo>>;
}

pub trait Transcoder {
    /// `Ok(None)` when the video could not be normalized.
    fn normalize(&mut self, video: &DownloadedVideo, output_stem: &str) -> Result<Option<PathBuf>>;
}

pub trait Uploader {
    /// Returns the storage identifier of the uploaded file.
    fn upload(&mut self, path: &Path, platform: &str) -> Result<Option<String>>;
}

pub trait ProvenanceLog {
    fn append(&mut self, record: &ProvenanceRecord) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DedupStatus {
    Original,
    Duplicate,
    Quarantined,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvenanceRecord {
    pub record_id: Uuid,
    pub storage_id: Option<String>,
    pub platform: String,
    pub source_url: String,
    pub filename: String,
    pub logged_at: DateTime<Utc>,
    pub hashtags: Vec<String>,
    pub dedup_status: DedupStatus,
}

impl ProvenanceRecord {
    pub fn new(
        video: &DownloadedVideo,
        storage_id: Option<String>,
        dedup_status: DedupStatus,
    ) -> Self {
        Self {
            record_id: Uuid::new_v4(),
            storage_id,
            platform: video.platform.clone(),
            source_url: video.source_url.clone(),
            filename: video
                .file_path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default(),
            logged_at: Utc::now(),
            hashtags: video.hashtags.clone(),
            dedup_status,
        }
    }
}

/// Appends one JSON object per line.
#[derive(Debug, Clone)]
pub struct JsonLinesProvenanceLog {
    path: PathBuf,
}

impl JsonLinesProvenanceLog {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create log directory {:?}", parent))?;
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ProvenanceLog for JsonLinesProvenanceLog {
    fn append(&mut self, record: &ProvenanceRecord) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open provenance log {:?}", self.path))?;

        let line = serde_json::to_string(record).context("Failed to serialize provenance record")?;
        writeln!(file, "{}", line).context("Failed to write provenance record")?;

        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PipelineReport {
    pub seen: usize,
    pub skipped: usize,
    pub duplicates: usize,
    pub quarantined: usize,
    pub uploaded: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemResult {
    Skipped,
    Duplicate,
    Quarantined,
    Uploaded,
    Failed,
}

pub struct Pipeline<D> {
    dedup: VideoDeduplicator<D>,
    downloader: Box<dyn Downloader>,
    transcoder: Box<dyn Transcoder>,
    uploader: Box<dyn Uploader>,
    provenance: Box<dyn ProvenanceLog>,
    brand_filter: Option<BrandFilter>,
    item_delay: Duration,
}

impl<D: VideoDecoder> Pipeline<D> {
    pub fn new(
        dedup: VideoDeduplicator<D>,
        downloader: Box<dyn Downloader>,
        transcoder: Box<dyn Transcoder>,
        uploader: Box<dyn Uploader>,
        provenance: Box<dyn ProvenanceLog>,
    ) -> Self {
        Self {
            dedup,
            downloader,
            transcoder,
            uploader,
            provenance,
            brand_filter: None,
            item_delay: Duration::ZERO,
        }
    }

    pub fn with_brand_filter(mut self, filter: BrandFilter) -> Self {
        self.brand_filter = Some(filter);
        self
    }

    /// Pause between items, to stay under platform rate limits.
    pub fn with_item_delay(mut self, delay: Duration) -> Self {
        self.item_delay = delay;
        self
    }

    pub fn deduplicator(&self) -> &VideoDeduplicator<D> {
        &self.dedup
    }

    pub fn run<S: AsRef<str>>(&mut self, urls: &[S]) -> PipelineReport {
        let mut report = PipelineReport::default();

        for (i, url) in urls.iter().enumerate() {
            let url = url.as_ref();
            log::info!("Processing video {}/{}: {}", i + 1, urls.len(), url);
            report.seen += 1;

            let result = self.process(url).unwrap_or_else(|err| {
                log::error!("Error processing video {}: {:#}", url, err);
                ItemResult::Failed
            });

            match result {
                ItemResult::Skipped => report.skipped += 1,
                ItemResult::Duplicate => report.duplicates += 1,
                ItemResult::Quarantined => report.quarantined += 1,
                ItemResult::Uploaded => report.uploaded += 1,
                ItemResult::Failed => report.failed += 1,
            }

            if !self.item_delay.is_zero() && i + 1 < urls.len() {
                std::thread::sleep(self.item_delay);
            }
        }

        log::info!("Processing completed: {:?}", report);
        report
    }

    fn process(&mut self, url: &str) -> Result<ItemResult> {
        let Some(video) = self.downloader.fetch(url)? else {
            log::info!("Video not brand-related or failed to download: {}", url);
            return Ok(ItemResult::Skipped);
        };

        if let Some(filter) = &self.brand_filter
            && !filter.matches_metadata(&video)
        {
            log::info!("Metadata does not mention the brand, skipping: {}", url);
            discard(&video.file_path);
            return Ok(ItemResult::Skipped);
        }

        let reference = VideoReference::from_path(&video.file_path);
        let outcome = self.dedup.check_and_register(&video.file_path, reference)?;

        if outcome.is_duplicate() {
            log::info!("Duplicate detected, skipping: {:?}", video.file_path);
            self.provenance
                .append(&ProvenanceRecord::new(&video, None, DedupStatus::Duplicate))?;
            discard(&video.file_path);
            return Ok(ItemResult::Duplicate);
        }

        if outcome.is_quarantined() {
            log::warn!("No fingerprint, holding for review: {:?}", video.file_path);
            self.provenance
                .append(&ProvenanceRecord::new(&video, None, DedupStatus::Quarantined))?;
            return Ok(ItemResult::Quarantined);
        }

        let stem = video
            .file_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let output_stem = format!("{}_{}", video.platform, stem);

        let Some(processed) = self.transcoder.normalize(&video, &output_stem)? else {
            log::error!("Failed to normalize video: {:?}", video.file_path);
            return Ok(ItemResult::Failed);
        };

        let result = match self.uploader.upload(&processed, &video.platform)? {
            Some(storage_id) => {
                log::info!("Uploaded {:?} as {}", processed, storage_id);
                self.provenance.append(&ProvenanceRecord::new(
                    &video,
                    Some(storage_id),
                    DedupStatus::Original,
                ))?;
                discard(&processed);
                ItemResult::Uploaded
            }
            None => {
                log::error!("Failed to upload {:?}", processed);
                ItemResult::Failed
            }
        };

        discard(&video.file_path);
        Ok(result)
    }
}

fn discard(path: &Path) {
    if let Err(err) = fs::remove_file(path) {
        log::warn!("Failed to remove {:?}: {}", path, err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DedupConfig, MissingSignalPolicy};
    use crate::video_dedup::video::testing::{FakeClip, FakeDecoder, split_frame};
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    struct FakeDownloader {
        videos: HashMap<String, DownloadedVideo>,
    }

    impl Downloader for FakeDownloader {
        fn fetch(&mut self, url: &str) -> Result<Option<DownloadedVideo>> {
            if url.contains("broken") {
                anyhow::bail!("connection reset");
            }
            Ok(self.videos.get(url).cloned())
        }
    }

    struct FakeTranscoder {
        output_dir: PathBuf,
    }

    impl Transcoder for FakeTranscoder {
        fn normalize(
            &mut self,
            _video: &DownloadedVideo,
            output_stem: &str,
        ) -> Result<Option<PathBuf>> {
            let output = self.output_dir.join(format!("{}.mp4", output_stem));
            fs::write(&output, b"normalized")?;
            Ok(Some(output))
        }
    }

    #[derive(Clone, Default)]
    struct FakeUploader {
        uploaded: Arc<Mutex<Vec<PathBuf>>>,
    }

    impl Uploader for FakeUploader {
        fn upload(&mut self, path: &Path, platform: &str) -> Result<Option<String>> {
            let mut uploaded = self.uploaded.lock().unwrap();
            uploaded.push(path.to_path_buf());
            Ok(Some(format!("{}-{}", platform, uploaded.len())))
        }
    }

    #[derive(Clone, Default)]
    struct MemoryLog {
        records: Arc<Mutex<Vec<ProvenanceRecord>>>,
    }

    impl ProvenanceLog for MemoryLog {
        fn append(&mut self, record: &ProvenanceRecord) -> Result<()> {
            self.records.lock().unwrap().push(record.clone());
            Ok(())
        }
    }

    struct Fixture {
        dir: TempDir,
        decoder: FakeDecoder,
        videos: HashMap<String, DownloadedVideo>,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            fs::create_dir(dir.path().join("processed")).unwrap();
            Self {
                dir,
                decoder: FakeDecoder::default(),
                videos: HashMap::new(),
            }
        }

        fn add(&mut self, url: &str, file: &str, clip: FakeClip) -> PathBuf {
            let path = self.dir.path().join(file);
            fs::write(&path, b"raw video").unwrap();
            self.decoder = self.decoder.clone().with_clip(path.to_str().unwrap(), clip);
            self.videos.insert(
                url.to_string(),
                DownloadedVideo {
                    platform: "youtube".to_string(),
                    source_url: url.to_string(),
                    file_path: path.clone(),
                    title: "Ancient Bliss ritual".to_string(),
                    description: String::new(),
                    tags: vec![],
                    hashtags: vec!["#ancientbliss".to_string()],
                },
            );
            path
        }

        fn pipeline(
            &self,
            policy: MissingSignalPolicy,
            uploader: FakeUploader,
            log: MemoryLog,
        ) -> Pipeline<FakeDecoder> {
            let config = DedupConfig {
                on_missing_signal: policy,
                ..DedupConfig::default()
            };
            let dedup = VideoDeduplicator::new(self.decoder.clone(), &config).unwrap();
            Pipeline::new(
                dedup,
                Box::new(FakeDownloader {
                    videos: self.videos.clone(),
                }),
                Box::new(FakeTranscoder {
                    output_dir: self.dir.path().join("processed"),
                }),
                Box::new(uploader),
                Box::new(log),
            )
        }
    }

    #[test]
    fn test_run_uploads_originals_and_drops_duplicates() {
        let mut fixture = Fixture::new();
        let a = fixture.add("u/a", "a.mp4", FakeClip::uniform(split_frame(0, 255), 60));
        let b = fixture.add("u/b", "b.mp4", FakeClip::uniform(split_frame(6, 250), 45));
        let c = fixture.add("u/c", "c.mp4", FakeClip::uniform(split_frame(255, 0), 60));

        let uploader = FakeUploader::default();
        let log = MemoryLog::default();
        let mut pipeline =
            fixture.pipeline(MissingSignalPolicy::Accept, uploader.clone(), log.clone());

        let report = pipeline.run(&["u/a", "u/b", "u/c", "u/missing", "u/broken"]);

        assert_eq!(
            report,
            PipelineReport {
                seen: 5,
                skipped: 1,
                duplicates: 1,
                quarantined: 0,
                uploaded: 2,
                failed: 1,
            }
        );

        let records = log.records.lock().unwrap();
        let statuses: Vec<(String, DedupStatus, Option<String>)> = records
            .iter()
            .map(|r| (r.filename.clone(), r.dedup_status, r.storage_id.clone()))
            .collect();
        assert_eq!(
            statuses,
            vec![
                ("a.mp4".to_string(), DedupStatus::Original, Some("youtube-1".to_string())),
                ("b.mp4".to_string(), DedupStatus::Duplicate, None),
                ("c.mp4".to_string(), DedupStatus::Original, Some("youtube-2".to_string())),
            ]
        );

        let uploaded = uploader.uploaded.lock().unwrap();
        assert!(uploaded[0].ends_with("youtube_a.mp4"));
        assert!(uploaded.iter().all(|p| !p.exists()));
        assert!(!a.exists() && !b.exists() && !c.exists());
        assert_eq!(pipeline.deduplicator().index().len(), 2);
    }

    #[test]
    fn test_quarantined_item_stays_on_disk() {
        let mut fixture = Fixture::new();
        let empty = fixture.add("u/empty", "empty.mp4", FakeClip::default());

        let log = MemoryLog::default();
        let mut pipeline =
            fixture.pipeline(MissingSignalPolicy::Quarantine, FakeUploader::default(), log.clone());

        let report = pipeline.run(&["u/empty"]);

        assert_eq!(report.quarantined, 1);
        assert!(empty.exists());
        assert_eq!(
            log.records.lock().unwrap()[0].dedup_status,
            DedupStatus::Quarantined
        );
    }

    #[test]
    fn test_brand_filter_skips_unrelated_metadata() {
        let mut fixture = Fixture::new();
        let path = fixture.add("u/a", "a.mp4", FakeClip::uniform(split_frame(0, 255), 60));

        let filter = BrandFilter::new(["some other brand"]).unwrap();
        let mut pipeline = fixture
            .pipeline(MissingSignalPolicy::Accept, FakeUploader::default(), MemoryLog::default())
            .with_brand_filter(filter);

        let report = pipeline.run(&["u/a"]);

        assert_eq!(report.skipped, 1);
        assert!(!path.exists());
        assert!(pipeline.deduplicator().index().is_empty());
    }

    #[test]
    fn test_json_lines_log_appends_records() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = JsonLinesProvenanceLog::new(dir.path().join("logs/metadata.jsonl")).unwrap();
        let video = DownloadedVideo {
            platform: "youtube".to_string(),
            source_url: "https://example.com/v/1".to_string(),
            file_path: PathBuf::from("/tmp/raw/abc.mp4"),
            title: String::new(),
            description: String::new(),
            tags: vec![],
            hashtags: vec!["#spa".to_string()],
        };

        let storage_id = Some("file-1".to_string());
        let original = ProvenanceRecord::new(&video, storage_id, DedupStatus::Original);
        log.append(&original).unwrap();
        log.append(&ProvenanceRecord::new(&video, None, DedupStatus::Duplicate))
            .unwrap();

        let contents = fs::read_to_string(log.path()).unwrap();
        let lines: Vec<serde_json::Value> = contents
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["dedup_status"], "original");
        assert_eq!(lines[0]["storage_id"], "file-1");
        assert_eq!(lines[0]["filename"], "abc.mp4");
        assert_eq!(lines[1]["dedup_status"], "duplicate");
        assert!(lines[1]["storage_id"].is_null());
    }
}
