//! Per-frame orchestration: tracker, perception and session aggregation.

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::config::Settings;
use crate::detection::Detection;
use crate::emitter::{OutboundQueue, QueueStats};
use crate::payload::{AgeGroup, Gender, SessionPayload};
use crate::perception::{
    AttentionEstimator, BoxHeightDistance, CentralZoneAttention, DemographicsEstimator,
    DistanceEstimator, NoDemographics, PerceptionConfig,
};
use crate::session::{Observation, SessionAggregator, SessionConfig, SessionStats};
use crate::tracker::{TrackedBox, Tracker, TrackerConfig};
use crate::Result;

/// Result of one processed frame.
#[derive(Debug, Clone, Default)]
pub struct FrameOutput {
    /// Reportable tracks of this frame.
    pub tracks: Vec<TrackedBox>,
    /// Payloads of sessions that expired on this frame.
    pub payloads: Vec<SessionPayload>,
}

/// What happened to the remaining state at shutdown.
#[derive(Debug, Clone, Default)]
pub struct ShutdownReport {
    /// Payloads of sessions flushed at shutdown.
    pub flushed: Vec<SessionPayload>,
    /// Active sessions dropped without emission.
    pub lost_sessions: usize,
    pub queue: Option<QueueStats>,
}

/// Single-stream frame loop. Each camera stream owns its own processor.
pub struct FrameProcessor {
    tracker: Tracker,
    sessions: SessionAggregator,
    attention: Box<dyn AttentionEstimator>,
    distance: Box<dyn DistanceEstimator>,
    demographics: Box<dyn DemographicsEstimator>,
    max_distance_cm: f64,
    queue: Option<OutboundQueue>,
    stats_interval_frames: u64,
    frames: u64,
}

impl FrameProcessor {
    /// Build a processor with the box-based heuristics and no outbound queue.
    pub fn new(
        tracker_config: TrackerConfig,
        session_config: SessionConfig,
        perception: &PerceptionConfig,
    ) -> Result<Self> {
        perception.validate()?;

        Ok(Self {
            tracker: Tracker::new(tracker_config)?,
            sessions: SessionAggregator::new(session_config)?,
            attention: Box::new(CentralZoneAttention::from_config(perception)),
            distance: Box::new(BoxHeightDistance::from_config(perception)),
            demographics: Box::new(NoDemographics),
            max_distance_cm: perception.max_distance_cm,
            queue: None,
            stats_interval_frames: 300,
            frames: 0,
        })
    }

    pub fn from_settings(settings: &Settings) -> Result<Self> {
        settings.validate()?;
        let mut processor = Self::new(
            settings.tracker_config(),
            settings.session_config(),
            &settings.perception,
        )?;
        processor.stats_interval_frames = settings.stats_interval_frames;
        Ok(processor)
    }

    /// Hand every emitted payload to `queue`.
    pub fn with_queue(mut self, queue: OutboundQueue) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn with_attention<A: AttentionEstimator + 'static>(mut self, attention: A) -> Self {
        self.attention = Box::new(attention);
        self
    }

    pub fn with_distance<D: DistanceEstimator + 'static>(mut self, distance: D) -> Self {
        self.distance = Box::new(distance);
        self
    }

    pub fn with_demographics<E: DemographicsEstimator + 'static>(mut self, demographics: E) -> Self {
        self.demographics = Box::new(demographics);
        self
    }

    pub fn tracker(&self) -> &Tracker {
        &self.tracker
    }

    pub fn sessions(&self) -> &SessionAggregator {
        &self.sessions
    }

    pub fn session_stats(&self) -> SessionStats {
        self.sessions.stats()
    }

    /// Process one detection batch observed at `now`.
    pub fn process_frame(&mut self, detections: &[Detection], now: DateTime<Utc>) -> FrameOutput {
        self.frames += 1;
        let tracks = self.tracker.update(detections);

        for track in &tracks {
            let distance_cm = self.distance.distance_cm(&track.bbox);
            if distance_cm > self.max_distance_cm {
                continue;
            }

            let (cx, cy) = track.bbox.center();
            let mut obs = Observation::new(self.attention.is_looking(&track.bbox))
                .with_distance(distance_cm)
                .with_center(cx, cy);

            if self.sessions.needs_demographics(track.id) {
                let (age_group, gender) = self.demographics.estimate(&track.bbox);
                obs = obs.with_demographics(
                    (age_group != AgeGroup::Unknown).then_some(age_group),
                    (gender != Gender::Unknown).then_some(gender),
                );
            }

            self.sessions.observe(track.id, &obs, now);
        }

        let payloads = self.sessions.sweep_and_emit(now);
        self.dispatch(&payloads);

        if self.frames % self.stats_interval_frames == 0 {
            let stats = self.sessions.stats();
            info!(
                frame = self.frames,
                tracks = self.tracker.tracks().len(),
                active_sessions = stats.active_sessions,
                completed_sessions = stats.completed_sessions,
                emitted_sessions = stats.emitted_sessions,
                "frame statistics"
            );
        }

        FrameOutput { tracks, payloads }
    }

    /// Stop processing. With `flush`, every active session is expired and
    /// emitted; otherwise active sessions are lost. Waits for the outbound
    /// queue to drain.
    pub fn shutdown(mut self, flush: bool) -> ShutdownReport {
        let mut report = ShutdownReport::default();

        if flush {
            report.flushed = self.sessions.flush();
            self.dispatch(&report.flushed);
        } else {
            report.lost_sessions = self.sessions.drain_all().len();
            if report.lost_sessions > 0 {
                warn!(sessions = report.lost_sessions, "active sessions dropped at shutdown");
            }
        }

        report.queue = self.queue.take().map(OutboundQueue::shutdown);
        report
    }

    fn dispatch(&self, payloads: &[SessionPayload]) {
        let Some(queue) = &self.queue else {
            return;
        };
        for payload in payloads {
            if let Err(e) = queue.enqueue(payload.clone()) {
                warn!(error = %e, "could not queue session payload");
            }
        }
    }
}
