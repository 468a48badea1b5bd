//! A single tracked object: box estimator plus lifecycle counters.

use std::fmt;

use crate::detection::BBox;
use crate::filter::{BoxFilterNoise, KalmanBoxFilter};

/// Lifecycle state derived from a track's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackState {
    /// Matched this frame but fewer than `min_hits` total matches.
    Tentative,
    /// Matched this frame with at least `min_hits` total matches.
    Confirmed,
    /// Predicted but not matched this frame.
    Coasting,
    /// Unmatched for more than `max_age` frames; removed by the tracker.
    Dead,
}

impl fmt::Display for TrackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TrackState::Tentative => "tentative",
            TrackState::Confirmed => "confirmed",
            TrackState::Coasting => "coasting",
            TrackState::Dead => "dead",
        };
        f.write_str(s)
    }
}

/// The tracker's belief about one physical object.
#[derive(Debug, Clone)]
pub struct Track {
    /// Identity, assigned once by the owning tracker.
    id: u64,

    /// Frames since creation.
    pub age: u32,

    /// Total successful matches, the creating detection included.
    pub hits: u32,

    /// Consecutive successful matches.
    pub hit_streak: u32,

    /// Frames since the last successful match.
    pub time_since_update: u32,

    filter: KalmanBoxFilter,
}

impl Track {
    /// Start a track from a detection box with zero velocity. The creating
    /// detection counts as the first hit.
    pub(crate) fn new(id: u64, bbox: &BBox, noise: &BoxFilterNoise) -> Self {
        Self {
            id,
            age: 0,
            hits: 1,
            hit_streak: 1,
            time_since_update: 0,
            filter: KalmanBoxFilter::new(bbox, noise),
        }
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Advance one frame and return the predicted box.
    pub(crate) fn predict(&mut self) -> BBox {
        let bbox = self.filter.predict();
        self.age += 1;
        if self.time_since_update > 0 {
            self.hit_streak = 0;
        }
        self.time_since_update += 1;
        bbox
    }

    /// Absorb a matched detection.
    pub(crate) fn update(&mut self, bbox: &BBox) {
        // A singular correction keeps the predicted state; the match still counts
        self.filter.update(bbox);
        self.time_since_update = 0;
        self.hits += 1;
        self.hit_streak += 1;
    }

    /// Current box estimate.
    pub fn bbox(&self) -> BBox {
        self.filter.bbox()
    }

    /// Underlying state estimator.
    pub fn filter(&self) -> &KalmanBoxFilter {
        &self.filter
    }

    #[cfg(test)]
    pub(crate) fn filter_mut(&mut self) -> &mut KalmanBoxFilter {
        &mut self.filter
    }

    pub(crate) fn is_finite(&self) -> bool {
        self.filter.is_finite() && self.filter.bbox().is_finite()
    }

    /// Lifecycle state under the given thresholds.
    pub fn state(&self, min_hits: u32, max_age: u32) -> TrackState {
        if self.time_since_update > max_age {
            TrackState::Dead
        } else if self.time_since_update > 0 {
            TrackState::Coasting
        } else if self.hits >= min_hits {
            TrackState::Confirmed
        } else {
            TrackState::Tentative
        }
    }
}
