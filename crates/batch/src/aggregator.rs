use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use walkdir::WalkDir;
use zhangdan_core::TransactionRecord;
use zhangdan_ocr::{
    record_issues, sha256_hex, ImageExtraction, ImagePipeline, OcrBackend, PipelineError,
    RecognitionError,
};

use crate::dedup::dedup_records;
use crate::stats::Statistics;

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("Input directory not found: {0}")]
    InputNotFound(PathBuf),
    #[error("Failed to scan {path}: {source}")]
    Scan {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },
    #[error("No images found in {0}")]
    NoImages(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Images processed at the same time.
    pub concurrency: usize,
    /// Per-image limit for preprocessing plus recognition.
    pub timeout_secs: u64,
    /// Lowercase file extensions treated as images.
    pub extensions: Vec<String>,
    /// Descend into subdirectories.
    pub recursive: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            concurrency: std::thread::available_parallelism().map_or(4, |n| n.get()),
            timeout_secs: 120,
            extensions: ["png", "jpg", "jpeg", "bmp", "tiff", "webp"]
                .iter()
                .map(|e| e.to_string())
                .collect(),
            recursive: false,
        }
    }
}

impl BatchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }

    fn accepts(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| self.extensions.iter().any(|x| x.eq_ignore_ascii_case(ext)))
    }
}

/// Why an image contributed no records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum SkipReason {
    Unreadable(String),
    Recognition(String),
    Timeout,
    NoRecords,
    /// Byte-identical to the named, earlier image.
    DuplicateImage(String),
    Cancelled,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::Unreadable(e) => write!(f, "unreadable: {e}"),
            SkipReason::Recognition(e) => write!(f, "recognition failed: {e}"),
            SkipReason::Timeout => write!(f, "timed out"),
            SkipReason::NoRecords => write!(f, "no transactions found"),
            SkipReason::DuplicateImage(first) => write!(f, "same content as {first}"),
            SkipReason::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedImage {
    pub image: String,
    pub reason: SkipReason,
}

/// Per-image counters kept for troubleshooting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageDiagnostics {
    pub image: String,
    pub fragments: usize,
    pub lines: usize,
    pub records: usize,
    pub unparsed_lines: usize,
    pub discarded_records: usize,
    pub uncategorized: usize,
    /// Records with validation issues, before deduplication.
    pub incomplete_records: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchSummary {
    pub images_found: usize,
    /// Images that yielded at least one record.
    pub images_processed: usize,
    pub images_skipped: usize,
    pub records_extracted: usize,
    pub duplicates_removed: usize,
    pub unparsed_lines: usize,
    pub discarded_records: usize,
    pub uncategorized: usize,
    /// Final records with at least one validation issue.
    pub incomplete_records: usize,
    /// Validation issues across all final records.
    pub record_issues: usize,
    pub cancelled: bool,
}

/// The merged record set with everything needed to report on it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchResult {
    pub records: Vec<TransactionRecord>,
    pub statistics: Statistics,
    pub summary: BatchSummary,
    pub diagnostics: Vec<ImageDiagnostics>,
    pub skipped: Vec<SkippedImage>,
}

/// What happened to one image.
#[derive(Debug)]
pub enum ImageOutcome {
    Extracted(ImageExtraction),
    Skipped(SkipReason),
}

/// Image files under `dir` with an accepted extension, sorted by path.
pub fn discover_images(dir: &Path, config: &BatchConfig) -> Result<Vec<PathBuf>, BatchError> {
    if !dir.is_dir() {
        return Err(BatchError::InputNotFound(dir.to_path_buf()));
    }
    let max_depth = if config.recursive { usize::MAX } else { 1 };

    let mut images = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(max_depth) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(source) if source.depth() == 0 => {
                return Err(BatchError::Scan { path: dir.to_path_buf(), source });
            }
            Err(e) => {
                warn!("Skipping unreadable directory entry: {e}");
                continue;
            }
        };
        if entry.file_type().is_file() && config.accepts(entry.path()) {
            images.push(entry.into_path());
        }
    }
    images.sort();
    Ok(images)
}

/// Merge per-image outcomes, in the order given, into one deduplicated set.
pub fn merge_outcomes(outcomes: Vec<(String, ImageOutcome)>) -> BatchResult {
    let mut summary = BatchSummary { images_found: outcomes.len(), ..BatchSummary::default() };
    let mut records = Vec::new();
    let mut diagnostics = Vec::new();
    let mut skipped = Vec::new();

    for (image, outcome) in outcomes {
        let reason = match outcome {
            ImageOutcome::Extracted(extraction) => {
                let report = extraction.report;
                diagnostics.push(ImageDiagnostics {
                    image: image.clone(),
                    fragments: extraction.fragments.len(),
                    lines: extraction.lines.len(),
                    records: report.records.len(),
                    unparsed_lines: report.unparsed_lines,
                    discarded_records: report.discarded_records,
                    uncategorized: extraction.uncategorized,
                    incomplete_records: extraction.incomplete,
                });
                summary.unparsed_lines += report.unparsed_lines;
                summary.discarded_records += report.discarded_records;
                if report.records.is_empty() {
                    SkipReason::NoRecords
                } else {
                    summary.images_processed += 1;
                    records.extend(report.records);
                    continue;
                }
            }
            ImageOutcome::Skipped(reason) => reason,
        };
        if reason == SkipReason::Cancelled {
            summary.cancelled = true;
        }
        warn!(image = %image, %reason, "image skipped");
        skipped.push(SkippedImage { image, reason });
    }

    summary.images_skipped = skipped.len();
    summary.records_extracted = records.len();
    summary.duplicates_removed = dedup_records(&mut records);
    summary.uncategorized = records.iter().filter(|r| !r.is_categorized()).count();
    for record in &records {
        let issues = record_issues(record).len();
        summary.record_issues += issues;
        summary.incomplete_records += usize::from(issues > 0);
    }

    BatchResult { statistics: Statistics::compute(&records), records, summary, diagnostics, skipped }
}

/// Runs the image pipeline over a directory.
pub struct BatchRunner<R: OcrBackend + 'static> {
    pipeline: Arc<ImagePipeline<R>>,
    config: BatchConfig,
    cancelled: Arc<AtomicBool>,
}

impl<R: OcrBackend + 'static> BatchRunner<R> {
    pub fn new(pipeline: ImagePipeline<R>, config: BatchConfig) -> Self {
        Self { pipeline: Arc::new(pipeline), config, cancelled: Arc::new(AtomicBool::new(false)) }
    }

    /// Flag that, once set, makes every image not yet started skip as
    /// cancelled. Images already in recognition finish normally.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub async fn run(&self, input_dir: &Path) -> Result<BatchResult, BatchError> {
        let paths = discover_images(input_dir, &self.config)?;
        if paths.is_empty() {
            return Err(BatchError::NoImages(input_dir.to_path_buf()));
        }
        info!(dir = %input_dir.display(), images = paths.len(), "starting batch");

        let names: Vec<String> = paths.iter().map(|p| display_name(input_dir, p)).collect();
        let mut outcomes: Vec<Option<ImageOutcome>> = Vec::with_capacity(paths.len());
        outcomes.resize_with(paths.len(), || None);

        // Content hashes are taken in directory order so the first copy of a
        // screenshot is the one that gets processed.
        let mut first_by_hash: HashMap<String, usize> = HashMap::new();
        let mut pending = Vec::new();
        for (idx, path) in paths.iter().enumerate() {
            let hash = match tokio::fs::read(path).await {
                Ok(bytes) => sha256_hex(&bytes),
                Err(e) => {
                    let reason = SkipReason::Unreadable(e.to_string());
                    outcomes[idx] = Some(ImageOutcome::Skipped(reason));
                    continue;
                }
            };
            match first_by_hash.get(&hash) {
                Some(&first) => {
                    let reason = SkipReason::DuplicateImage(names[first].clone());
                    outcomes[idx] = Some(ImageOutcome::Skipped(reason));
                }
                None => {
                    first_by_hash.insert(hash, idx);
                    pending.push(idx);
                }
            }
        }

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let mut tasks = JoinSet::new();
        for idx in pending {
            let pipeline = Arc::clone(&self.pipeline);
            let cancelled = Arc::clone(&self.cancelled);
            let semaphore = Arc::clone(&semaphore);
            let path = paths[idx].clone();
            let name = names[idx].clone();
            let timeout = self.config.timeout();

            tasks.spawn(async move {
                let Ok(permit) = semaphore.acquire_owned().await else {
                    return (idx, ImageOutcome::Skipped(SkipReason::Cancelled));
                };
                if cancelled.load(Ordering::SeqCst) {
                    return (idx, ImageOutcome::Skipped(SkipReason::Cancelled));
                }
                (idx, process_one(pipeline, path, name, timeout, permit).await)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((idx, outcome)) => outcomes[idx] = Some(outcome),
                Err(e) => warn!("Image task failed: {e}"),
            }
        }

        let merged: Vec<(String, ImageOutcome)> = names
            .into_iter()
            .zip(outcomes)
            .map(|(name, outcome)| {
                let outcome = outcome.unwrap_or_else(|| {
                    ImageOutcome::Skipped(SkipReason::Recognition("worker panicked".into()))
                });
                (name, outcome)
            })
            .collect();

        let result = merge_outcomes(merged);
        info!(
            records = result.records.len(),
            processed = result.summary.images_processed,
            skipped = result.summary.images_skipped,
            duplicates = result.summary.duplicates_removed,
            "batch finished"
        );
        Ok(result)
    }
}

async fn process_one<R: OcrBackend + 'static>(
    pipeline: Arc<ImagePipeline<R>>,
    path: PathBuf,
    name: String,
    timeout: Duration,
    permit: OwnedSemaphorePermit,
) -> ImageOutcome {
    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(e) => return ImageOutcome::Skipped(SkipReason::Unreadable(e.to_string())),
    };

    debug!(image = %name, bytes = bytes.len(), "recognizing");
    // The permit lives as long as the worker thread, so an abandoned
    // recognition still counts against the concurrency limit.
    let work = tokio::task::spawn_blocking(move || {
        let _permit = permit;
        pipeline.process_bytes(&name, &bytes, Some(&path))
    });

    // A timed-out blocking call keeps its thread until the engine returns;
    // its result is dropped.
    match tokio::time::timeout(timeout, work).await {
        Err(_) | Ok(Ok(Err(PipelineError::Recognition(RecognitionError::Timeout(_))))) => {
            ImageOutcome::Skipped(SkipReason::Timeout)
        }
        Ok(Err(e)) => ImageOutcome::Skipped(SkipReason::Recognition(e.to_string())),
        Ok(Ok(Err(PipelineError::Io(e)))) => ImageOutcome::Skipped(SkipReason::Unreadable(e.to_string())),
        Ok(Ok(Err(PipelineError::Recognition(e)))) => {
            ImageOutcome::Skipped(SkipReason::Recognition(e.to_string()))
        }
        Ok(Ok(Ok(extraction))) => ImageOutcome::Extracted(extraction),
    }
}

fn display_name(root: &Path, path: &Path) -> String {
    path.strip_prefix(root).unwrap_or(path).to_string_lossy().replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use zhangdan_classify::ClassificationEngine;
    use zhangdan_core::{RecognizedFragment, Region};
    use std::time::Instant;
    use zhangdan_ocr::{CommandRecognizer, MockRecognizer, PipelineConfig, PreparedImage};

    /// Reads the "image" as UTF-8 text, one OCR line per text line.
    struct TextRecognizer;

    impl OcrBackend for TextRecognizer {
        fn recognize(&self, image: &PreparedImage<'_>) -> Result<Vec<RecognizedFragment>, RecognitionError> {
            let text = std::str::from_utf8(image.bytes)
                .map_err(|e| RecognitionError::ImageDecode(e.to_string()))?;
            Ok(text
                .lines()
                .enumerate()
                .map(|(i, l)| RecognizedFragment::new(l, 0.9, Region::new(0.0, i as f32 * 40.0, 500.0, 30.0)))
                .collect())
        }
    }

    struct SlowRecognizer(Duration);

    impl OcrBackend for SlowRecognizer {
        fn recognize(&self, _image: &PreparedImage<'_>) -> Result<Vec<RecognizedFragment>, RecognitionError> {
            std::thread::sleep(self.0);
            Ok(vec![])
        }
    }

    fn runner<R: OcrBackend + 'static>(recognizer: R) -> BatchRunner<R> {
        runner_with(recognizer, BatchConfig { concurrency: 2, ..BatchConfig::default() })
    }

    fn runner_with<R: OcrBackend + 'static>(recognizer: R, config: BatchConfig) -> BatchRunner<R> {
        let pipeline = ImagePipeline::new(
            recognizer,
            &PipelineConfig::default(),
            ClassificationEngine::with_default_rules(),
        );
        BatchRunner::new(pipeline, config)
    }

    fn write(dir: &Path, name: &str, content: &str) {
        std::fs::write(dir.join(name), content).unwrap();
    }

    #[tokio::test]
    async fn records_from_all_images_are_merged_in_file_order() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "b.png", "07-29 15:26 工资 +8,000.00");
        write(dir.path(), "a.png", "2024-05-01 12:30 外卖订单 美团 -35.00 余额:128.50 微信支付");

        let result = runner(TextRecognizer).run(dir.path()).await.unwrap();

        let titles: Vec<_> = result.records.iter().map(|r| r.title.as_deref()).collect();
        assert_eq!(titles, vec![Some("外卖订单"), Some("工资")]);
        assert_eq!(result.records[0].source_image, "a.png");
        assert_eq!(result.summary.images_processed, 2);
        assert_eq!(result.statistics.category_count("餐饮类"), 1);
        assert_eq!(result.statistics.category_count("工资收入类"), 1);
    }

    #[tokio::test]
    async fn identical_records_in_two_images_are_deduplicated() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.png", "07-30 15:36 还车贷 -30.07");
        write(dir.path(), "b.png", "07-30 15:36 还车贷 -30.07\n");

        let result = runner(TextRecognizer).run(dir.path()).await.unwrap();

        assert_eq!(result.records.len(), 1);
        assert_eq!(result.records[0].source_image, "a.png");
        assert_eq!(result.summary.duplicates_removed, 1);
        assert_eq!(result.summary.records_extracted, 2);
    }

    #[tokio::test]
    async fn byte_identical_images_are_processed_once() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.png", "07-30 15:36 还车贷 -30.07");
        write(dir.path(), "copy.png", "07-30 15:36 还车贷 -30.07");

        let result = runner(TextRecognizer).run(dir.path()).await.unwrap();

        assert_eq!(result.records.len(), 1);
        assert_eq!(result.summary.duplicates_removed, 0);
        assert_eq!(
            result.skipped,
            vec![SkippedImage {
                image: "copy.png".into(),
                reason: SkipReason::DuplicateImage("a.png".into())
            }]
        );
    }

    #[tokio::test]
    async fn recognition_failures_skip_images_without_failing_the_batch() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.png", "x");
        write(dir.path(), "b.jpg", "y");

        let result = runner(MockRecognizer::failing("engine down")).run(dir.path()).await.unwrap();

        assert!(result.records.is_empty());
        assert_eq!(result.summary.images_skipped, 2);
        assert!(result.skipped.iter().all(|s| matches!(s.reason, SkipReason::Recognition(_))));
    }

    #[tokio::test]
    async fn image_without_transactions_is_skipped_with_diagnostics() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "noise.png", "12 / 34\n微信支付");

        let result = runner(TextRecognizer).run(dir.path()).await.unwrap();

        assert_eq!(result.skipped[0].reason, SkipReason::NoRecords);
        assert_eq!(result.diagnostics[0].lines, 2);
        assert_eq!(result.diagnostics[0].unparsed_lines, 1);
        assert_eq!(result.diagnostics[0].discarded_records, 1);
    }

    #[tokio::test]
    async fn slow_recognition_times_out() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "slow.png", "x");
        let config = BatchConfig { timeout_secs: 1, ..BatchConfig::default() };

        let result = runner_with(SlowRecognizer(Duration::from_millis(1500)), config)
            .run(dir.path())
            .await
            .unwrap();

        assert_eq!(result.skipped[0].reason, SkipReason::Timeout);
    }

    #[cfg(unix)]
    #[test]
    fn hung_ocr_command_does_not_hold_the_runtime_open() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.png", "x");
        let argv = vec!["sh".to_string(), "-c".to_string(), "exec sleep 30".to_string()];
        let recognizer = CommandRecognizer::new(&argv).unwrap().with_timeout(Duration::from_secs(1));
        let config = BatchConfig { timeout_secs: 1, ..BatchConfig::default() };

        let started = Instant::now();
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let result = runtime.block_on(runner_with(recognizer, config).run(dir.path())).unwrap();
        drop(runtime);

        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(
            result.skipped,
            vec![SkippedImage { image: "a.png".into(), reason: SkipReason::Timeout }]
        );
    }

    #[tokio::test]
    async fn slow_workers_keep_their_concurrency_slot() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.png", "x");
        write(dir.path(), "b.png", "y");
        let config = BatchConfig { concurrency: 1, timeout_secs: 1, ..BatchConfig::default() };

        let started = Instant::now();
        let result = runner_with(SlowRecognizer(Duration::from_millis(2500)), config)
            .run(dir.path())
            .await
            .unwrap();

        // The second image starts once the first worker thread returns at
        // 2.5s, not when its timeout fires at 1s.
        assert!(started.elapsed() >= Duration::from_secs(3));
        assert!(result.skipped.iter().all(|s| s.reason == SkipReason::Timeout));
    }

    #[tokio::test]
    async fn cancelled_batch_skips_remaining_images() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.png", "07-30 15:36 还车贷 -30.07");
        write(dir.path(), "b.png", "07-29 15:26 工资 +8,000.00");

        let runner = runner(TextRecognizer);
        runner.cancel();
        let result = runner.run(dir.path()).await.unwrap();

        assert!(result.records.is_empty());
        assert!(result.summary.cancelled);
        assert!(result.skipped.iter().all(|s| s.reason == SkipReason::Cancelled));
    }

    #[tokio::test]
    async fn empty_directory_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "notes.txt", "not an image");

        let err = runner(TextRecognizer).run(dir.path()).await.unwrap_err();
        assert!(matches!(err, BatchError::NoImages(_)));
    }

    #[tokio::test]
    async fn missing_directory_is_fatal() {
        let err = runner(TextRecognizer).run(Path::new("/no/such/dir")).await.unwrap_err();
        assert!(matches!(err, BatchError::InputNotFound(_)));
    }

    #[test]
    fn discovery_filters_sorts_and_respects_recursion() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        write(dir.path(), "b.PNG", "");
        write(dir.path(), "a.jpg", "");
        write(dir.path(), "a.jpg.ocr.json", "[]");
        write(&dir.path().join("sub"), "c.webp", "");

        let flat = discover_images(dir.path(), &BatchConfig::default()).unwrap();
        let names: Vec<_> = flat.iter().map(|p| display_name(dir.path(), p)).collect();
        assert_eq!(names, vec!["a.jpg", "b.PNG"]);

        let config = BatchConfig { recursive: true, ..BatchConfig::default() };
        let deep = discover_images(dir.path(), &config).unwrap();
        let names: Vec<_> = deep.iter().map(|p| display_name(dir.path(), p)).collect();
        assert_eq!(names, vec!["a.jpg", "b.PNG", "sub/c.webp"]);
    }

    #[test]
    fn merge_counts_uncategorized_after_dedup() {
        let mut record = TransactionRecord::new("a.png");
        record.title = Some("神秘款项".into());
        let extraction = ImageExtraction {
            source_image: "a.png".into(),
            fragments: vec![],
            lines: vec![],
            report: zhangdan_ocr::ExtractionReport {
                records: vec![record],
                unparsed_lines: 2,
                discarded_records: 0,
            },
            uncategorized: 1,
            incomplete: 1,
        };
        let result = merge_outcomes(vec![
            ("a.png".into(), ImageOutcome::Extracted(extraction)),
            ("b.png".into(), ImageOutcome::Skipped(SkipReason::Timeout)),
        ]);
        assert_eq!(result.summary.images_found, 2);
        assert_eq!(result.summary.uncategorized, 1);
        assert_eq!(result.summary.unparsed_lines, 2);
        assert_eq!(result.summary.images_skipped, 1);
        // No time on the only record.
        assert_eq!(result.summary.incomplete_records, 1);
        assert_eq!(result.summary.record_issues, 1);
        assert_eq!(result.diagnostics[0].incomplete_records, 1);
    }
}
