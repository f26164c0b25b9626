use serde::{Deserialize, Serialize};

/// Axis-aligned bounding box in image pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Region {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Region {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width: width.max(0.0), height: height.max(0.0) }
    }

    /// Smallest box enclosing a quadrilateral given as four corner points,
    /// the shape most detectors report.
    pub fn from_corners(points: &[[f32; 2]; 4]) -> Self {
        let xs = points.iter().map(|p| p[0]);
        let ys = points.iter().map(|p| p[1]);
        let min_x = xs.clone().fold(f32::INFINITY, f32::min);
        let max_x = xs.fold(f32::NEG_INFINITY, f32::max);
        let min_y = ys.clone().fold(f32::INFINITY, f32::min);
        let max_y = ys.fold(f32::NEG_INFINITY, f32::max);
        Self::new(min_x, min_y, max_x - min_x, max_y - min_y)
    }

    pub fn y_center(&self) -> f32 {
        self.y + self.height / 2.0
    }
}

/// One recognized text token as reported by an OCR engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognizedFragment {
    pub text: String,
    /// Engine confidence (0.0–1.0).
    pub confidence: f32,
    pub region: Region,
}

impl RecognizedFragment {
    pub fn new(text: impl Into<String>, confidence: f32, region: Region) -> Self {
        Self { text: text.into(), confidence: confidence.clamp(0.0, 1.0), region }
    }
}

/// Fragments sharing one visual line, in left-to-right order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextLine {
    pub text: String,
    pub y_center: f32,
    pub fragments: Vec<RecognizedFragment>,
}

impl TextLine {
    /// A synthetic line with no geometry, for feeding already-ordered text
    /// straight into the extractor.
    pub fn from_text(text: impl Into<String>, y_center: f32) -> Self {
        Self { text: text.into(), y_center, fragments: vec![] }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fragment_clamps_confidence() {
        let f = RecognizedFragment::new("x", 1.7, Region::default());
        assert_eq!(f.confidence, 1.0);
        let f = RecognizedFragment::new("x", -0.2, Region::default());
        assert_eq!(f.confidence, 0.0);
    }

    #[test]
    fn region_from_corners_encloses_points() {
        let r = Region::from_corners(&[[10.0, 20.0], [110.0, 22.0], [112.0, 52.0], [8.0, 50.0]]);
        assert_eq!(r.x, 8.0);
        assert_eq!(r.y, 20.0);
        assert_eq!(r.width, 104.0);
        assert_eq!(r.height, 32.0);
        assert_eq!(r.y_center(), 36.0);
    }

    #[test]
    fn region_serializes_as_plain_object() {
        let json = serde_json::to_string(&Region::new(1.0, 2.0, 3.0, 4.0)).unwrap();
        assert_eq!(json, r#"{"x":1.0,"y":2.0,"width":3.0,"height":4.0}"#);
    }
}
