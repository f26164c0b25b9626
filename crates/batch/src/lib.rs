pub mod aggregator;
pub mod dedup;
pub mod export;
pub mod stats;

pub use aggregator::{
    discover_images, merge_outcomes, BatchConfig, BatchError, BatchResult, BatchRunner,
    BatchSummary, ImageDiagnostics, ImageOutcome, SkipReason, SkippedImage,
};
pub use dedup::dedup_records;
pub use export::{export, write_csv, write_json, write_xlsx, ExportError, Sheet, Workbook};
pub use stats::{CountRow, FieldCompleteness, Statistics};
