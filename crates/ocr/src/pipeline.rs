use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info, warn};
use zhangdan_classify::ClassificationEngine;
use zhangdan_core::{RecognizedFragment, TextLine};

use crate::enrich::{record_issues, EnrichConfig, RecordEnricher};
use crate::extract::{ExtractorConfig, FieldExtractor};
use crate::normalize::{LineNormalizer, NormalizerConfig};
use crate::preprocess::{self, PreprocessConfig};
use crate::recognizer::{OcrBackend, PreparedImage, RecognitionError};
use crate::types::ExtractionReport;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("OCR recognition failed: {0}")]
    Recognition(#[from] RecognitionError),
}

/// Tunables for every per-image stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub preprocess: PreprocessConfig,
    pub normalize: NormalizerConfig,
    pub extract: ExtractorConfig,
    pub enrich: EnrichConfig,
}

/// Everything learned from one screenshot.
#[derive(Debug, Clone)]
pub struct ImageExtraction {
    pub source_image: String,
    pub fragments: Vec<RecognizedFragment>,
    pub lines: Vec<TextLine>,
    /// Classified records plus unparsed/discarded counters.
    pub report: ExtractionReport,
    /// Records that fell through to the uncategorized label.
    pub uncategorized: usize,
    /// Records with at least one entry from [`record_issues`].
    pub incomplete: usize,
}

/// Orchestrates: preprocess → OCR → line normalization → field extraction →
/// enrichment → classification → validation.
///
/// Every stage is synchronous; batch callers run it on a blocking thread.
pub struct ImagePipeline<R: OcrBackend> {
    recognizer: R,
    preprocess: PreprocessConfig,
    normalizer: LineNormalizer,
    extractor: FieldExtractor,
    enricher: RecordEnricher,
    classifier: ClassificationEngine,
}

impl<R: OcrBackend> ImagePipeline<R> {
    pub fn new(recognizer: R, config: &PipelineConfig, classifier: ClassificationEngine) -> Self {
        Self {
            recognizer,
            preprocess: config.preprocess.clone(),
            normalizer: LineNormalizer::new(config.normalize.clone()),
            extractor: FieldExtractor::new(config.extract.clone()),
            enricher: RecordEnricher::new(config.enrich.clone()),
            classifier,
        }
    }

    pub fn classifier(&self) -> &ClassificationEngine {
        &self.classifier
    }

    /// Process a file on disk.
    pub fn process_file(&self, path: &Path) -> Result<ImageExtraction, PipelineError> {
        let bytes = std::fs::read(path)?;
        let name = path.file_name().map_or_else(
            || path.display().to_string(),
            |n| n.to_string_lossy().into_owned(),
        );
        self.process_bytes(&name, &bytes, Some(path))
    }

    /// Process raw bytes. `source_path` is passed through to backends that
    /// look for files next to the image.
    pub fn process_bytes(
        &self,
        source_image: &str,
        data: &[u8],
        source_path: Option<&Path>,
    ) -> Result<ImageExtraction, PipelineError> {
        // 1. Preprocess; a failure falls back to the original bytes.
        let prepared = preprocess::preprocess_or_original(data, &self.preprocess);

        // 2. Run OCR.
        let fragments = self
            .recognizer
            .recognize(&PreparedImage { bytes: &prepared, source_path })?;

        // 3. Rebuild reading order.
        let lines = self.normalizer.normalize(fragments.clone());

        // 4. Extract records.
        let mut report = self.extractor.extract(&lines, source_image);

        // 5. Fill payment methods named in the record text.
        for record in &mut report.records {
            self.enricher.enrich(record);
        }

        // 6. Classify.
        let uncategorized = self.classifier.apply_all(&mut report.records);

        // 7. Validate.
        let mut incomplete = 0;
        for record in &report.records {
            let issues = record_issues(record);
            if issues.is_empty() {
                continue;
            }
            incomplete += 1;
            let issues: Vec<String> = issues.iter().map(ToString::to_string).collect();
            warn!(image = source_image, title = ?record.title, ?issues, "incomplete transaction");
        }

        info!(
            image = source_image,
            fragments = fragments.len(),
            records = report.records.len(),
            uncategorized,
            incomplete,
            "image processed"
        );
        debug!(image = source_image, unparsed = report.unparsed_lines, "extraction details");

        Ok(ImageExtraction {
            source_image: source_image.to_string(),
            fragments,
            lines,
            report,
            uncategorized,
            incomplete,
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
