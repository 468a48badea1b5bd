//! Bounding boxes and detections fed to the tracker.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Small constant guarding the aspect ratio against zero-height boxes.
const RATIO_EPSILON: f64 = 1e-6;

/// Axis-aligned box in pixel coordinates, `(x1, y1)` top-left and
/// `(x2, y2)` bottom-right.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl BBox {
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self { x1, y1, x2, y2 }
    }

    #[inline]
    pub fn width(&self) -> f64 {
        self.x2 - self.x1
    }

    #[inline]
    pub fn height(&self) -> f64 {
        self.y2 - self.y1
    }

    #[inline]
    pub fn area(&self) -> f64 {
        self.width() * self.height()
    }

    /// Box centre `(cx, cy)`.
    #[inline]
    pub fn center(&self) -> (f64, f64) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    /// All four coordinates are finite.
    pub fn is_finite(&self) -> bool {
        self.to_array().iter().all(|v| v.is_finite())
    }

    pub fn to_array(&self) -> [f64; 4] {
        [self.x1, self.y1, self.x2, self.y2]
    }

    /// Measurement form `[x, y, s, r]`: centre, area and width/height ratio.
    pub fn to_z(&self) -> [f64; 4] {
        let w = self.width();
        let h = self.height();
        let (x, y) = self.center();
        [x, y, w * h, w / (h + RATIO_EPSILON)]
    }

    /// Inverse of [`BBox::to_z`]: `w = sqrt(s * r)`, `h = s / w`.
    ///
    /// Degenerate states (negative area, zero width) yield non-finite
    /// coordinates, which callers treat as a broken estimate.
    pub fn from_z(x: f64, y: f64, s: f64, r: f64) -> Self {
        let w = (s * r).sqrt();
        let h = s / w;
        Self {
            x1: x - w / 2.0,
            y1: y - h / 2.0,
            x2: x + w / 2.0,
            y2: y + h / 2.0,
        }
    }
}

/// A single detector output for one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    /// Detected box.
    pub bbox: BBox,
    /// Detector confidence.
    pub score: f64,
}

impl Detection {
    /// Create a detection, rejecting non-finite or empty boxes.
    pub fn new(bbox: BBox, score: f64) -> Result<Self> {
        if !bbox.is_finite() || !score.is_finite() {
            return Err(Error::InvalidDetection(format!(
                "non-finite values in box {:?} (score {})",
                bbox.to_array(),
                score
            )));
        }
        if bbox.width() <= 0.0 || bbox.height() <= 0.0 {
            return Err(Error::InvalidDetection(format!(
                "box {:?} has non-positive width or height",
                bbox.to_array()
            )));
        }
        Ok(Self { bbox, score })
    }

    /// Create a detection from corner coordinates.
    pub fn from_xyxy(x1: f64, y1: f64, x2: f64, y2: f64, score: f64) -> Result<Self> {
        Self::new(BBox::new(x1, y1, x2, y2), score)
    }

    /// Create a detection from a `[x1, y1, x2, y2, score]` row.
    pub fn from_row(row: &[f64]) -> Result<Self> {
        match *row {
            [x1, y1, x2, y2, score] => Self::from_xyxy(x1, y1, x2, y2, score),
            _ => Err(Error::InvalidDetection(format!(
                "expected 5 values [x1, y1, x2, y2, score], got {}",
                row.len()
            ))),
        }
    }
}
