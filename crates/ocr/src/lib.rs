pub mod enrich;
pub mod extract;
pub mod hash;
pub mod normalize;
pub mod pipeline;
pub mod preprocess;
pub mod recognizer;
pub mod types;

pub use enrich::{record_issues, EnrichConfig, RecordEnricher, RecordIssue};
pub use extract::{
    has_clock, match_amount, match_balance, match_counterparty, match_time, ExtractorConfig, FieldExtractor,
};
pub use hash::sha256_hex;
pub use normalize::{LineNormalizer, NormalizerConfig};
pub use pipeline::{ImageExtraction, ImagePipeline, PipelineConfig, PipelineError};
pub use preprocess::{preprocess, preprocess_or_original, PreprocessConfig, PreprocessError};
pub use recognizer::{
    parse_fragments_json, parse_tesseract_tsv, CommandRecognizer, MockRecognizer, OcrBackend, PreparedImage,
    RecognitionError, SidecarRecognizer,
};
#[cfg(feature = "tesseract")]
pub use recognizer::tesseract_backend::TesseractRecognizer;
pub use types::{ExtractionReport, LineFields, Matched};
