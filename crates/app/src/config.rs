use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::info;
use zhangdan_batch::BatchConfig;
use zhangdan_classify::{load_rules_toml, ClassificationEngine, ClassificationRule};
use zhangdan_ocr::{
    CommandRecognizer, EnrichConfig, ExtractorConfig, NormalizerConfig, OcrBackend, PipelineConfig,
    PreprocessConfig, SidecarRecognizer,
};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub normalize: NormalizerConfig,
    pub extract: ExtractorConfig,
    pub enrich: EnrichConfig,
    pub preprocess: PreprocessConfig,
    pub batch: BatchConfig,
    pub ocr: OcrSection,
    /// Appended after the built-in rules.
    pub rules: Vec<ClassificationRule>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// `<image>.ocr.json` files written by an external OCR run.
    #[default]
    Sidecar,
    /// An external program reading the image on stdin.
    Command,
    Tesseract,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrSection {
    pub backend: BackendKind,
    /// For backend = "command": program and arguments.
    pub command: Vec<String>,
    /// For backend = "sidecar".
    pub sidecar_suffix: String,
    /// For backend = "tesseract".
    pub language: String,
    pub tessdata: Option<String>,
}

impl Default for OcrSection {
    fn default() -> Self {
        Self {
            backend: BackendKind::Sidecar,
            command: Vec::new(),
            sidecar_suffix: ".ocr.json".to_string(),
            language: "chi_sim".to_string(),
            tessdata: None,
        }
    }
}

impl Config {
    pub fn pipeline(&self) -> PipelineConfig {
        PipelineConfig {
            preprocess: self.preprocess.clone(),
            normalize: self.normalize.clone(),
            extract: self.extract.clone(),
            enrich: self.enrich.clone(),
        }
    }
}

pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let Some(p) = path else {
        return Ok(Config::default());
    };
    let s = fs::read_to_string(p).with_context(|| format!("read {}", p.display()))?;
    toml::from_str(&s).with_context(|| format!("parse {}", p.display()))
}

/// Built-in rules, then `[[rules]]` from the config, then `[[rule]]` tables
/// from a separate rules file.
pub fn build_classifier(config: &Config, rules_file: Option<&Path>) -> Result<ClassificationEngine> {
    let mut engine = ClassificationEngine::with_default_rules();
    for rule in config.rules.iter().cloned() {
        engine.add_rule(rule).context("invalid rule in config")?;
    }
    if let Some(p) = rules_file {
        let s = fs::read_to_string(p).with_context(|| format!("read {}", p.display()))?;
        let rules = load_rules_toml(&s).with_context(|| format!("parse {}", p.display()))?;
        for rule in rules {
            engine
                .add_rule(rule)
                .with_context(|| format!("invalid rule in {}", p.display()))?;
        }
    }
    info!(rules = engine.len(), "classification rules loaded");
    Ok(engine)
}

/// `timeout` bounds an external OCR program; it is killed once it passes.
pub fn build_backend(ocr: &OcrSection, timeout: Duration) -> Result<Box<dyn OcrBackend>> {
    match ocr.backend {
        BackendKind::Sidecar => Ok(Box::new(SidecarRecognizer::new(ocr.sidecar_suffix.clone()))),
        BackendKind::Command => {
            if ocr.command.is_empty() {
                bail!("ocr.backend = \"command\" needs ocr.command");
            }
            Ok(Box::new(CommandRecognizer::new(&ocr.command)?.with_timeout(timeout)))
        }
        BackendKind::Tesseract => tesseract_backend(ocr),
    }
}

#[cfg(feature = "tesseract")]
fn tesseract_backend(ocr: &OcrSection) -> Result<Box<dyn OcrBackend>> {
    Ok(Box::new(zhangdan_ocr::TesseractRecognizer::new(ocr.tessdata.clone(), &ocr.language)))
}

#[cfg(not(feature = "tesseract"))]
fn tesseract_backend(_ocr: &OcrSection) -> Result<Box<dyn OcrBackend>> {
    Err(zhangdan_ocr::RecognitionError::NotAvailable.into())
}
