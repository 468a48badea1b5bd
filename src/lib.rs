//! # visit-tracker
//!
//! Edge-side visit analytics for digital signage.
//!
//! Per-frame person detections go through a SORT-style multi-object tracker
//! (constant-velocity Kalman filter per box, IoU cost, optimal assignment)
//! and every reported track feeds an in-memory anonymous session. When a
//! session times out it is turned into a [`SessionPayload`] that carries no
//! track identity, and the session record is destroyed.
//!
//! ## Features
//!
//! - 7-dimensional Kalman box filter `[x, y, s, r, vx, vy, vs]`
//! - IoU association solved as a linear sum assignment
//! - Start-up grace period and `min_hits` / `max_age` lifecycle
//! - Session aggregation with attention, distance and demographic votes
//! - Validated, serde-serializable wire payload
//! - Bounded outbound queue decoupling transport from the frame loop
//!
//! ## Example
//!
//! ```rust,ignore
//! use visit_tracker::{Detection, Tracker, TrackerConfig};
//!
//! let mut tracker = Tracker::new(TrackerConfig::default()).unwrap();
//! let detections = vec![Detection::from_xyxy(10.0, 10.0, 50.0, 120.0, 0.9).unwrap()];
//! let tracks = tracker.update(&detections);
//! ```

// Internal numeric kernels (Kalman filter, assignment solver)
pub(crate) mod internal;

// Public modules
pub mod config;
pub mod detection;
pub mod emitter;
pub mod filter;
pub mod matching;
pub mod payload;
pub mod perception;
pub mod pipeline;
pub mod session;
pub mod track;
pub mod tracker;

// Re-exports for convenience
pub use config::Settings;
pub use detection::{BBox, Detection};
pub use emitter::{OutboundQueue, PayloadSink};
pub use filter::{BoxFilterNoise, KalmanBoxFilter};
pub use payload::{AgeGroup, Gender, SessionPayload};
pub use pipeline::{FrameOutput, FrameProcessor};
pub use session::{Observation, SessionAggregator, SessionConfig};
pub use track::{Track, TrackState};
pub use tracker::{TrackedBox, Tracker, TrackerConfig};

// Error types
pub use crate::error::{Error, Result};

mod error {
    use thiserror::Error;

    /// Errors that can occur in the visit-tracker library
    #[derive(Error, Debug)]
    pub enum Error {
        #[error("Invalid configuration: {0}")]
        InvalidConfig(String),

        #[error("Invalid detection: {0}")]
        InvalidDetection(String),

        #[error("Invalid age group: {0}")]
        InvalidAgeGroup(String),

        #[error("Invalid gender estimation: {0}")]
        InvalidGender(String),

        #[error("attention_seconds ({attention_seconds}) exceeds duration_seconds ({duration_seconds})")]
        AttentionExceedsDuration {
            attention_seconds: f64,
            duration_seconds: u64,
        },

        #[error("Invalid payload: {0}")]
        InvalidPayload(String),

        #[error("Transport error: {0}")]
        Transport(String),

        #[error("Outbound queue is closed")]
        QueueClosed,

        #[error("Serialization error: {0}")]
        Serialization(#[from] serde_json::Error),

        #[error("Config parse error: {0}")]
        ConfigParse(#[from] toml::de::Error),

        #[error("IO error: {0}")]
        IoError(#[from] std::io::Error),
    }

    /// Result type for visit-tracker operations
    pub type Result<T> = std::result::Result<T, Error>;
}
