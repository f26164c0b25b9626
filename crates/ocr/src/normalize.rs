use serde::{Deserialize, Serialize};
use tracing::debug;
use zhangdan_core::{RecognizedFragment, TextLine};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizerConfig {
    /// Fragments below this confidence are dropped outright.
    pub min_confidence: f32,
    /// Maximum vertical-center distance (px) for a fragment to join a line.
    pub line_tolerance: f32,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self { min_confidence: 0.15, line_tolerance: 10.0 }
    }
}

/// Rebuilds reading order from fragment geometry.
pub struct LineNormalizer {
    config: NormalizerConfig,
}

impl LineNormalizer {
    pub fn new(config: NormalizerConfig) -> Self {
        Self { config }
    }

    /// Group fragments into lines, top to bottom, each read left to right.
    pub fn normalize(&self, fragments: Vec<RecognizedFragment>) -> Vec<TextLine> {
        let total = fragments.len();
        let mut kept: Vec<RecognizedFragment> = fragments
            .into_iter()
            .filter(|f| !f.text.trim().is_empty())
            .filter(|f| f.confidence >= self.config.min_confidence)
            .collect();
        kept.sort_by(|a, b| a.region.y_center().total_cmp(&b.region.y_center()));

        let mut groups: Vec<Vec<RecognizedFragment>> = Vec::new();
        for fragment in kept {
            let joins_last = groups.last().is_some_and(|g| {
                (mean_y(g) - fragment.region.y_center()).abs() < self.config.line_tolerance
            });
            match groups.last_mut() {
                Some(group) if joins_last => group.push(fragment),
                _ => groups.push(vec![fragment]),
            }
        }

        let lines: Vec<TextLine> = groups.into_iter().map(into_line).collect();
        debug!(fragments = total, lines = lines.len(), "fragments normalized");
        lines
    }
}

impl Default for LineNormalizer {
    fn default() -> Self {
        Self::new(NormalizerConfig::default())
    }
}

fn mean_y(group: &[RecognizedFragment]) -> f32 {
    group.iter().map(|f| f.region.y_center()).sum::<f32>() / group.len() as f32
}

fn into_line(mut fragments: Vec<RecognizedFragment>) -> TextLine {
    fragments.sort_by(|a, b| a.region.x.total_cmp(&b.region.x));
    let text = fragments.iter().map(|f| f.text.trim()).collect::<Vec<_>>().join(" ");
    TextLine { text, y_center: mean_y(&fragments), fragments }
}
