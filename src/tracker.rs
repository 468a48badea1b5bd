//! Main tracker implementation.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::detection::{BBox, Detection};
use crate::filter::BoxFilterNoise;
use crate::matching::associate_detections_to_tracks;
use crate::track::{Track, TrackState};
use crate::{Error, Result};

/// Configuration for the tracker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Frames a track may go unmatched before it is removed.
    pub max_age: u32,

    /// Consecutive matches before a track is reported.
    pub min_hits: u32,

    /// Minimum IoU for a detection to be matched to a track.
    pub iou_threshold: f64,

    /// Minimum detector confidence for an unmatched detection to start a track.
    pub min_score: f64,

    /// Covariance magnitudes of each track's box filter.
    pub noise: BoxFilterNoise,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            max_age: 30,
            min_hits: 3,
            iou_threshold: 0.3,
            min_score: 0.0,
            noise: BoxFilterNoise::default(),
        }
    }
}

impl TrackerConfig {
    /// Create a configuration with default noise and no confidence gate.
    pub fn new(max_age: u32, min_hits: u32, iou_threshold: f64) -> Self {
        Self {
            max_age,
            min_hits,
            iou_threshold,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.min_hits == 0 {
            return Err(Error::InvalidConfig("min_hits must be at least 1".to_string()));
        }
        if !(0.0..=1.0).contains(&self.iou_threshold) {
            return Err(Error::InvalidConfig(format!(
                "iou_threshold must be within [0, 1], got {}",
                self.iou_threshold
            )));
        }
        if !self.min_score.is_finite() {
            return Err(Error::InvalidConfig("min_score must be finite".to_string()));
        }
        if !self.noise.is_valid() {
            return Err(Error::InvalidConfig(
                "noise variances must be finite and positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// A track as seen from outside the tracker.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackedBox {
    pub id: u64,
    pub bbox: BBox,
    pub state: TrackState,
}

/// Multi-object tracker.
///
/// Maintains the set of live tracks across frames: predicts every track,
/// associates the frame's detections by IoU, corrects matched tracks,
/// starts tracks for unmatched detections and removes tracks that went
/// unmatched for more than `max_age` frames.
///
/// Identities come from a counter owned by the instance. They start at 1,
/// increase strictly and are never reused, also across [`Tracker::clear`].
pub struct Tracker {
    config: TrackerConfig,

    /// Live tracks in creation order.
    tracks: Vec<Track>,

    /// Frames processed since creation or the last `clear`.
    frame_count: u64,

    /// Identity handed to the next new track.
    next_id: u64,
}

impl Tracker {
    /// Create a new tracker with the given configuration.
    pub fn new(config: TrackerConfig) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            config,
            tracks: Vec::new(),
            frame_count: 0,
            next_id: 1,
        })
    }

    /// Process one frame of detections and return the reportable tracks.
    ///
    /// A track is reportable when it was matched (or created) this frame
    /// and either has `min_hits` consecutive matches or the tracker is
    /// still within its first `min_hits` frames.
    pub fn update(&mut self, detections: &[Detection]) -> Vec<TrackedBox> {
        self.step(detections);

        let min_hits = self.config.min_hits;
        let in_grace = self.frame_count <= u64::from(min_hits);

        self.tracks
            .iter()
            .filter(|t| t.time_since_update < 1 && (t.hit_streak >= min_hits || in_grace))
            .map(|t| self.tracked_box(t))
            .collect()
    }

    /// Process one frame of detections and return every live track,
    /// tentative and coasting ones included.
    pub fn update_all(&mut self, detections: &[Detection]) -> Vec<TrackedBox> {
        self.step(detections);
        self.tracks.iter().map(|t| self.tracked_box(t)).collect()
    }

    /// Live tracks in creation order.
    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Frames processed so far.
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Number of identities handed out over the tracker's lifetime.
    pub fn total_tracks_created(&self) -> u64 {
        self.next_id - 1
    }

    /// Drop every track and restart the frame count. Identities keep
    /// increasing.
    pub fn clear(&mut self) {
        self.tracks.clear();
        self.frame_count = 0;
    }

    // Internal: one predict / associate / update / spawn / prune cycle
    fn step(&mut self, detections: &[Detection]) {
        self.frame_count += 1;

        self.tracks.retain_mut(|track| {
            track.predict();
            if track.is_finite() {
                true
            } else {
                debug!(track_id = track.id(), "dropping track with non-finite prediction");
                false
            }
        });

        let det_boxes: Vec<BBox> = detections.iter().map(|d| d.bbox).collect();
        let trk_boxes: Vec<BBox> = self.tracks.iter().map(|t| t.bbox()).collect();

        let association =
            associate_detections_to_tracks(&det_boxes, &trk_boxes, self.config.iou_threshold);

        for &(det_idx, trk_idx) in &association.matches {
            self.tracks[trk_idx].update(&detections[det_idx].bbox);
        }

        for &det_idx in &association.unmatched_detections {
            let detection = &detections[det_idx];
            if detection.score >= self.config.min_score {
                self.create_track(detection);
            }
        }

        let max_age = self.config.max_age;
        self.tracks.retain(|track| {
            let alive = track.time_since_update <= max_age;
            if !alive {
                debug!(track_id = track.id(), age = track.age, hits = track.hits, "track expired");
            }
            alive
        });
    }

    fn create_track(&mut self, detection: &Detection) {
        let id = self.next_id;
        self.next_id += 1;

        debug!(track_id = id, score = detection.score, "new track");
        self.tracks.push(Track::new(id, &detection.bbox, &self.config.noise));
    }

    fn tracked_box(&self, track: &Track) -> TrackedBox {
        TrackedBox {
            id: track.id(),
            bbox: track.bbox(),
            state: track.state(self.config.min_hits, self.config.max_age),
        }
    }
}
