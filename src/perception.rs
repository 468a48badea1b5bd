//! Per-track perception heuristics feeding the session aggregator.
//!
//! Each estimator works from the tracked box alone, so the pipeline runs
//! without depth data or face crops. Implementations backed by real models
//! plug in through the traits.

use serde::{Deserialize, Serialize};

use crate::detection::BBox;
use crate::payload::{AgeGroup, Gender};
use crate::{Error, Result};

/// Closest distance the box-height heuristic reports.
pub const MIN_DISTANCE_CM: f64 = 50.0;
/// Farthest distance the box-height heuristic reports.
pub const MAX_DISTANCE_CM: f64 = 500.0;
/// Boxes shorter than this are treated as far away.
pub const MIN_BOX_HEIGHT_PX: f64 = 10.0;

/// Frame geometry and heuristic calibration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerceptionConfig {
    pub frame_width: u32,
    pub frame_height: u32,

    /// Fraction of the half-frame, per axis, counted as the attention zone.
    pub central_zone: f64,

    /// Tracks estimated farther than this are not observed.
    pub max_distance_cm: f64,

    /// Box height over frame height at the reference distance.
    pub person_height_ratio_ref: f64,
    pub distance_at_ref_cm: f64,
}

impl Default for PerceptionConfig {
    fn default() -> Self {
        Self {
            frame_width: 640,
            frame_height: 480,
            central_zone: 0.7,
            max_distance_cm: 500.0,
            person_height_ratio_ref: 0.8,
            distance_at_ref_cm: 200.0,
        }
    }
}

impl PerceptionConfig {
    pub fn validate(&self) -> Result<()> {
        if self.frame_width == 0 || self.frame_height == 0 {
            return Err(Error::InvalidConfig("frame size must be non-zero".to_string()));
        }
        if !(0.0..=1.0).contains(&self.central_zone) {
            return Err(Error::InvalidConfig(format!(
                "central_zone must be within [0, 1], got {}",
                self.central_zone
            )));
        }
        if !(self.person_height_ratio_ref > 0.0 && self.distance_at_ref_cm > 0.0) {
            return Err(Error::InvalidConfig(
                "distance calibration must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Decides whether a tracked person is looking at the screen.
pub trait AttentionEstimator: Send {
    fn is_looking(&self, bbox: &BBox) -> bool;
}

/// Estimates the distance between a tracked person and the screen.
pub trait DistanceEstimator: Send {
    fn distance_cm(&self, bbox: &BBox) -> f64;
}

/// Estimates non-biometric demographics of a tracked person.
///
/// `Unknown` values are not recorded as votes.
pub trait DemographicsEstimator: Send {
    fn estimate(&mut self, bbox: &BBox) -> (AgeGroup, Gender);
}

/// Counts a person as looking when the box centre lies in the central part
/// of the frame on both axes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CentralZoneAttention {
    pub frame_width: f64,
    pub frame_height: f64,
    pub zone: f64,
}

impl CentralZoneAttention {
    pub fn new(frame_width: u32, frame_height: u32, zone: f64) -> Self {
        Self {
            frame_width: f64::from(frame_width),
            frame_height: f64::from(frame_height),
            zone,
        }
    }

    pub fn from_config(config: &PerceptionConfig) -> Self {
        Self::new(config.frame_width, config.frame_height, config.central_zone)
    }
}

impl AttentionEstimator for CentralZoneAttention {
    fn is_looking(&self, bbox: &BBox) -> bool {
        let (cx, cy) = bbox.center();
        let half_w = self.frame_width / 2.0;
        let half_h = self.frame_height / 2.0;

        let dist_x = (cx - half_w).abs() / half_w;
        let dist_y = (cy - half_h).abs() / half_h;
        dist_x < self.zone && dist_y < self.zone
    }
}

/// Distance from apparent box height, inversely proportional to the share
/// of the frame the person covers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoxHeightDistance {
    pub frame_height: f64,
    pub ref_ratio: f64,
    pub ref_distance_cm: f64,
}

impl BoxHeightDistance {
    pub fn new(frame_height: u32, ref_ratio: f64, ref_distance_cm: f64) -> Self {
        Self {
            frame_height: f64::from(frame_height),
            ref_ratio,
            ref_distance_cm,
        }
    }

    pub fn from_config(config: &PerceptionConfig) -> Self {
        Self::new(
            config.frame_height,
            config.person_height_ratio_ref,
            config.distance_at_ref_cm,
        )
    }
}

impl DistanceEstimator for BoxHeightDistance {
    fn distance_cm(&self, bbox: &BBox) -> f64 {
        let height = bbox.height();
        if !(height >= MIN_BOX_HEIGHT_PX) {
            return MAX_DISTANCE_CM;
        }
        let ratio = height / self.frame_height;
        let distance = (self.ref_ratio / ratio) * self.ref_distance_cm;
        distance.clamp(MIN_DISTANCE_CM, MAX_DISTANCE_CM)
    }
}

/// Estimator for deployments without a demographics model.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDemographics;

impl DemographicsEstimator for NoDemographics {
    fn estimate(&mut self, _bbox: &BBox) -> (AgeGroup, Gender) {
        (AgeGroup::Unknown, Gender::Unknown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn box_at(cx: f64, cy: f64) -> BBox {
        BBox::new(cx - 20.0, cy - 50.0, cx + 20.0, cy + 50.0)
    }

    fn box_of_height(h: f64) -> BBox {
        BBox::new(100.0, 0.0, 140.0, h)
    }

    #[test]
    fn test_central_zone_attention() {
        let att = CentralZoneAttention::from_config(&PerceptionConfig::default());

        assert!(att.is_looking(&box_at(320.0, 240.0)));
        assert!(att.is_looking(&box_at(543.0, 240.0)));
        // Exactly on the zone edge is outside
        assert!(!att.is_looking(&box_at(544.0, 240.0)));
        assert!(!att.is_looking(&box_at(320.0, 20.0)));
        assert!(!att.is_looking(&box_at(10.0, 470.0)));
    }

    #[test]
    fn test_box_height_distance() {
        let dist = BoxHeightDistance::from_config(&PerceptionConfig::default());

        // 80% of a 480 px frame is the reference distance
        assert_relative_eq!(dist.distance_cm(&box_of_height(384.0)), 200.0, epsilon = 1e-9);
        assert_relative_eq!(dist.distance_cm(&box_of_height(480.0)), 160.0, epsilon = 1e-9);
        assert_relative_eq!(dist.distance_cm(&box_of_height(960.0)), 80.0, epsilon = 1e-9);
    }

    #[test]
    fn test_box_height_distance_clamped() {
        let dist = BoxHeightDistance::from_config(&PerceptionConfig::default());

        assert_relative_eq!(dist.distance_cm(&box_of_height(96.0)), MAX_DISTANCE_CM);
        assert_relative_eq!(dist.distance_cm(&box_of_height(2000.0)), MIN_DISTANCE_CM);
        assert_relative_eq!(dist.distance_cm(&box_of_height(5.0)), MAX_DISTANCE_CM);
    }

    #[test]
    fn test_no_demographics() {
        let mut est = NoDemographics;
        assert_eq!(
            est.estimate(&box_of_height(100.0)),
            (AgeGroup::Unknown, Gender::Unknown)
        );
    }

    #[test]
    fn test_perception_config_validation() {
        assert!(PerceptionConfig::default().validate().is_ok());

        let config = PerceptionConfig {
            central_zone: 1.2,
            ..PerceptionConfig::default()
        };
        assert!(config.validate().is_err());

        let config = PerceptionConfig {
            frame_height: 0,
            ..PerceptionConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
