use serde::Deserialize;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread::JoinHandle;
use std::time::Duration;
use thiserror::Error;
use wait_timeout::ChildExt;
use zhangdan_core::{RecognizedFragment, Region};

#[derive(Debug, Error)]
pub enum RecognitionError {
    #[error("Image decode error: {0}")]
    ImageDecode(String),
    #[error("OCR engine error: {0}")]
    Engine(String),
    #[error("Unreadable OCR output: {0}")]
    Output(String),
    #[error("OCR engine did not finish within {0:?}")]
    Timeout(Duration),
    #[error("Tesseract not available: build with the `tesseract` feature")]
    NotAvailable,
}

/// Image bytes handed to a backend, plus the file they came from when known.
#[derive(Debug, Clone, Copy)]
pub struct PreparedImage<'a> {
    pub bytes: &'a [u8],
    pub source_path: Option<&'a Path>,
}

/// Abstraction over an OCR engine.
///
/// A backend either returns every fragment it recognized or an error, never
/// a partial list alongside a failure.
pub trait OcrBackend: Send + Sync {
    fn recognize(&self, image: &PreparedImage<'_>) -> Result<Vec<RecognizedFragment>, RecognitionError>;
}

impl<T: OcrBackend + ?Sized> OcrBackend for Box<T> {
    fn recognize(&self, image: &PreparedImage<'_>) -> Result<Vec<RecognizedFragment>, RecognitionError> {
        (**self).recognize(image)
    }
}

// ── Mock backend (always available, used for tests) ───────────────────────────

/// Returns preset fragments regardless of the image.
pub struct MockRecognizer {
    result: Result<Vec<RecognizedFragment>, String>,
}

impl MockRecognizer {
    pub fn new(fragments: Vec<RecognizedFragment>) -> Self {
        Self { result: Ok(fragments) }
    }

    /// One full-width fragment per line, stacked 40px apart.
    pub fn from_lines(lines: &[&str]) -> Self {
        let fragments = lines
            .iter()
            .enumerate()
            .map(|(i, text)| {
                RecognizedFragment::new(*text, 0.95, Region::new(10.0, i as f32 * 40.0, 600.0, 30.0))
            })
            .collect();
        Self::new(fragments)
    }

    /// A backend that fails every call with an engine error.
    pub fn failing(message: impl Into<String>) -> Self {
        Self { result: Err(message.into()) }
    }
}

impl OcrBackend for MockRecognizer {
    fn recognize(&self, _image: &PreparedImage<'_>) -> Result<Vec<RecognizedFragment>, RecognitionError> {
        self.result.clone().map_err(RecognitionError::Engine)
    }
}

// ── JSON fragment format (sidecar files and external commands) ────────────────

#[derive(Deserialize)]
#[serde(untagged)]
enum RawBox {
    /// Four corner points, as EasyOCR and PaddleOCR report them.
    Corners([[f32; 2]; 4]),
    /// `[x, y, width, height]`.
    Rect([f32; 4]),
    Region(Region),
}

#[derive(Deserialize)]
struct RawFragment {
    text: String,
    #[serde(default = "full_confidence")]
    confidence: f32,
    #[serde(alias = "box", alias = "region")]
    bbox: RawBox,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawDocument {
    List(Vec<RawFragment>),
    Wrapped { fragments: Vec<RawFragment> },
}

fn full_confidence() -> f32 {
    1.0
}

/// Parse OCR output in the JSON fragment format: either an array of
/// `{text, confidence, bbox}` objects or `{"fragments": [...]}`.
pub fn parse_fragments_json(json: &str) -> Result<Vec<RecognizedFragment>, RecognitionError> {
    let doc: RawDocument =
        serde_json::from_str(json).map_err(|e| RecognitionError::Output(e.to_string()))?;
    let raw = match doc {
        RawDocument::List(list) => list,
        RawDocument::Wrapped { fragments } => fragments,
    };
    Ok(raw
        .into_iter()
        .map(|f| {
            let region = match f.bbox {
                RawBox::Corners(points) => Region::from_corners(&points),
                RawBox::Rect([x, y, w, h]) => Region::new(x, y, w, h),
                RawBox::Region(r) => r,
            };
            RecognizedFragment::new(f.text, f.confidence, region)
        })
        .collect())
}

// ── Sidecar backend ──────────────────────────────────────────────────────────

/// Reads fragments an external OCR run left next to the image, e.g.
/// `shot.png` → `shot.png.ocr.json`.
pub struct SidecarRecognizer {
    suffix: String,
}

impl SidecarRecognizer {
    pub fn new(suffix: impl Into<String>) -> Self {
        Self { suffix: suffix.into() }
    }

    pub fn sidecar_path(&self, image_path: &Path) -> PathBuf {
        let mut name = image_path.file_name().unwrap_or_default().to_os_string();
        name.push(&self.suffix);
        image_path.with_file_name(name)
    }
}

impl Default for SidecarRecognizer {
    fn default() -> Self {
        Self::new(".ocr.json")
    }
}

impl OcrBackend for SidecarRecognizer {
    fn recognize(&self, image: &PreparedImage<'_>) -> Result<Vec<RecognizedFragment>, RecognitionError> {
        let path = image
            .source_path
            .ok_or_else(|| RecognitionError::Engine("sidecar OCR needs the image path".into()))?;
        let sidecar = self.sidecar_path(path);
        let json = std::fs::read_to_string(&sidecar)
            .map_err(|e| RecognitionError::Engine(format!("{}: {e}", sidecar.display())))?;
        parse_fragments_json(&json)
    }
}

// ── External command backend ─────────────────────────────────────────────────

/// Pipes the image into an external program's stdin and reads the JSON
/// fragment format from its stdout.
pub struct CommandRecognizer {
    program: String,
    args: Vec<String>,
    timeout: Option<Duration>,
}

impl CommandRecognizer {
    /// `argv[0]` is the program; the rest are passed as arguments.
    pub fn new(argv: &[String]) -> Result<Self, RecognitionError> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| RecognitionError::Engine("empty OCR command".into()))?;
        Ok(Self { program: program.clone(), args: args.to_vec(), timeout: None })
    }

    /// Kill the program once it has run for `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn engine_error(&self, e: std::io::Error) -> RecognitionError {
        RecognitionError::Engine(format!("{}: {e}", self.program))
    }
}

impl OcrBackend for CommandRecognizer {
    fn recognize(&self, image: &PreparedImage<'_>) -> Result<Vec<RecognizedFragment>, RecognitionError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| self.engine_error(e))?;

        // Pipes are serviced from their own threads so a chatty child cannot
        // deadlock against a full buffer while we wait on it.
        let writer = child.stdin.take().map(|mut stdin| {
            let bytes = image.bytes.to_vec();
            std::thread::spawn(move || stdin.write_all(&bytes))
        });
        let stdout = child.stdout.take().map(drain);
        let stderr = child.stderr.take().map(drain);

        let status = match self.timeout {
            Some(limit) => match child.wait_timeout(limit).map_err(|e| self.engine_error(e))? {
                Some(status) => status,
                None => {
                    // Pipe threads are left behind; they end when the pipes close.
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(RecognitionError::Timeout(limit));
                }
            },
            None => child.wait().map_err(|e| self.engine_error(e))?,
        };
        if let Some(handle) = writer {
            // A child that exits without draining stdin is judged by its exit status below.
            let _ = handle.join();
        }
        let stdout = collect(stdout);
        let stderr = collect(stderr);

        if !status.success() {
            let stderr = String::from_utf8_lossy(&stderr);
            return Err(RecognitionError::Engine(format!(
                "{} exited with {}: {}",
                self.program,
                status,
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8(stdout).map_err(|e| RecognitionError::Output(e.to_string()))?;
        parse_fragments_json(&stdout)
    }
}

fn drain<R: Read + Send + 'static>(mut pipe: R) -> JoinHandle<Vec<u8>> {
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        buf
    })
}

fn collect(handle: Option<JoinHandle<Vec<u8>>>) -> Vec<u8> {
    handle.and_then(|h| h.join().ok()).unwrap_or_default()
}

// ── Tesseract backend (optional, gated behind `tesseract` feature) ─────────────

/// Parse Tesseract's TSV output into word-level fragments. Tesseract reports
/// confidence on a 0–100 scale and `-1` for non-word rows.
pub fn parse_tesseract_tsv(tsv: &str) -> Vec<RecognizedFragment> {
    tsv.lines()
        .skip(1)
        .filter_map(|row| {
            let cols: Vec<&str> = row.split('\t').collect();
            if cols.len() < 12 || cols[0] != "5" {
                return None;
            }
            let num = |i: usize| cols[i].trim().parse::<f32>().ok();
            let text = cols[11].trim();
            let conf = num(10)?;
            if text.is_empty() || conf < 0.0 {
                return None;
            }
            let region = Region::new(num(6)?, num(7)?, num(8)?, num(9)?);
            Some(RecognizedFragment::new(text, conf / 100.0, region))
        })
        .collect()
}

#[cfg(feature = "tesseract")]
pub mod tesseract_backend {
    use super::{parse_tesseract_tsv, OcrBackend, PreparedImage, RecognitionError};
    use leptess::LepTess;
    use zhangdan_core::RecognizedFragment;

    pub struct TesseractRecognizer {
        data_path: Option<String>,
        lang: String,
    }

    impl TesseractRecognizer {
        pub fn new(data_path: Option<String>, lang: &str) -> Self {
            Self { data_path, lang: lang.to_string() }
        }
    }

    impl OcrBackend for TesseractRecognizer {
        fn recognize(
            &self,
            image: &PreparedImage<'_>,
        ) -> Result<Vec<RecognizedFragment>, RecognitionError> {
            let mut lt = LepTess::new(self.data_path.as_deref(), &self.lang)
                .map_err(|e| RecognitionError::Engine(e.to_string()))?;
            lt.set_image_from_mem(image.bytes)
                .map_err(|e| RecognitionError::ImageDecode(e.to_string()))?;
            let tsv = lt.get_tsv_text(0).map_err(|e| RecognitionError::Engine(e.to_string()))?;
            Ok(parse_tesseract_tsv(&tsv))
        }
    }
}
