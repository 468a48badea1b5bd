//! Anonymous viewing sessions keyed by track identity.
//!
//! A session lives only in memory. It is created on the first observation of
//! a track, accumulates per-frame observations and is destroyed once it has
//! not been observed for longer than the timeout. Expired sessions become
//! [`SessionPayload`]s, which never carry the track identity. A person who
//! reappears after expiry starts an entirely new session.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::payload::{AgeGroup, Coordinates, Demographics, Gender, Meta, SessionPayload};
use crate::{Error, Result};

const ATTENTION_EPSILON: f64 = 1e-9;

/// Upper bound on box centres kept per session for the median.
pub const MAX_CENTER_SAMPLES: usize = 1024;

/// Session aggregation parameters and the payload metadata they stamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Seconds without observation after which a session expires.
    pub timeout_secs: f64,

    /// Frame rate used to convert attention frames to seconds.
    pub fps: f64,

    /// Shorter sessions are discarded at expiry.
    pub min_duration_secs: u64,

    pub device_id: u32,
    pub firmware_version: String,
    pub model_version: String,
    pub tracker_version: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 3.0,
            fps: 30.0,
            min_duration_secs: 1,
            device_id: 12,
            firmware_version: "1.8.2".to_string(),
            model_version: "yolov8n".to_string(),
            tracker_version: "SORT".to_string(),
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.timeout_secs.is_finite() && self.timeout_secs > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "session timeout must be positive, got {}",
                self.timeout_secs
            )));
        }
        if !(self.fps.is_finite() && self.fps > 0.0) {
            return Err(Error::InvalidConfig(format!("fps must be positive, got {}", self.fps)));
        }
        if self.min_duration_secs < 1 {
            return Err(Error::InvalidConfig(
                "min_duration_secs must be at least 1".to_string(),
            ));
        }
        if self.device_id < 1 {
            return Err(Error::InvalidConfig("device_id must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// What was seen of one track in one frame.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Observation {
    pub is_looking: bool,
    pub distance_cm: Option<f64>,
    /// Box centre in pixels.
    pub center: Option<(f64, f64)>,
    pub age_group: Option<AgeGroup>,
    pub gender: Option<Gender>,
}

impl Observation {
    pub fn new(is_looking: bool) -> Self {
        Self {
            is_looking,
            ..Self::default()
        }
    }

    pub fn with_distance(mut self, distance_cm: f64) -> Self {
        self.distance_cm = Some(distance_cm);
        self
    }

    pub fn with_center(mut self, x: f64, y: f64) -> Self {
        self.center = Some((x, y));
        self
    }

    pub fn with_demographics(mut self, age_group: Option<AgeGroup>, gender: Option<Gender>) -> Self {
        self.age_group = age_group;
        self.gender = gender;
        self
    }
}

/// Accumulated observations of one track.
#[derive(Debug, Clone)]
pub struct Session {
    track_id: u64,
    pub start_time: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub total_frames: u64,
    pub attention_frames: u64,
    pub distances: Vec<f64>,
    pub centers: Vec<(f64, f64)>,
    pub age_votes: Vec<AgeGroup>,
    pub gender_votes: Vec<Gender>,
    /// Set once any demographic vote has been recorded.
    pub demographics_estimated: bool,
    centers_seen: u64,
    center_stride: u64,
}

impl Session {
    fn new(track_id: u64, now: DateTime<Utc>) -> Self {
        Self {
            track_id,
            start_time: now,
            last_seen: now,
            total_frames: 0,
            attention_frames: 0,
            distances: Vec::new(),
            centers: Vec::new(),
            age_votes: Vec::new(),
            gender_votes: Vec::new(),
            demographics_estimated: false,
            centers_seen: 0,
            center_stride: 1,
        }
    }

    /// Local track identity. Never part of a payload.
    pub fn track_id(&self) -> u64 {
        self.track_id
    }

    fn record(&mut self, obs: &Observation, now: DateTime<Utc>) {
        self.last_seen = now;
        self.total_frames += 1;
        if obs.is_looking {
            self.attention_frames += 1;
        }
        if let Some(d) = obs.distance_cm {
            self.distances.push(d);
        }
        if let Some(c) = obs.center {
            self.record_center(c);
        }

        if !self.demographics_estimated && (obs.age_group.is_some() || obs.gender.is_some()) {
            self.age_votes.extend(obs.age_group);
            self.gender_votes.extend(obs.gender);
            self.demographics_estimated = true;
        }
    }

    /// Whether more than `timeout_secs` have passed since the last observation.
    pub fn is_expired(&self, now: DateTime<Utc>, timeout_secs: f64) -> bool {
        seconds(now - self.last_seen) > timeout_secs
    }

    /// Seconds between the first and last observation.
    pub fn elapsed_seconds(&self) -> f64 {
        seconds(self.last_seen - self.start_time).max(0.0)
    }

    /// Whole seconds between the first and last observation.
    pub fn duration_seconds(&self) -> u64 {
        let millis = (self.last_seen - self.start_time).num_milliseconds().max(0);
        (millis / 1000) as u64
    }

    pub fn attention_seconds(&self, fps: f64) -> f64 {
        self.attention_frames as f64 / fps
    }

    // Keeps an evenly spaced subsample of at most MAX_CENTER_SAMPLES centres.
    // When full, every other sample is dropped and the stride doubles.
    fn record_center(&mut self, center: (f64, f64)) {
        if self.centers_seen % self.center_stride == 0 {
            self.centers.push(center);
            if self.centers.len() >= MAX_CENTER_SAMPLES {
                let mut keep = false;
                self.centers.retain(|_| {
                    keep = !keep;
                    keep
                });
                self.center_stride *= 2;
            }
        }
        self.centers_seen += 1;
    }

    /// Truncated mean of the recorded distances, 0 if none.
    pub fn average_distance_cm(&self) -> u32 {
        if self.distances.is_empty() {
            return 0;
        }
        let mean = self.distances.iter().sum::<f64>() / self.distances.len() as f64;
        mean.max(0.0) as u32
    }

    pub fn age_group(&self) -> AgeGroup {
        majority_vote(&self.age_votes).unwrap_or(AgeGroup::Unknown)
    }

    pub fn gender(&self) -> Gender {
        majority_vote(&self.gender_votes).unwrap_or(Gender::Unknown)
    }

    /// Per-axis median of the recorded box centres.
    pub fn coordinates(&self) -> Coordinates {
        let xs: Vec<f64> = self.centers.iter().map(|c| c.0).collect();
        let ys: Vec<f64> = self.centers.iter().map(|c| c.1).collect();
        Coordinates {
            x: to_pixel(median(xs)),
            y: to_pixel(median(ys)),
        }
    }
}

/// Counters describing the aggregator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct SessionStats {
    pub active_sessions: usize,
    /// Sessions removed at expiry or drain.
    pub completed_sessions: u64,
    pub emitted_sessions: u64,
    /// Sessions too short to emit.
    pub discarded_sessions: u64,
    /// Sessions whose payload failed validation.
    pub rejected_sessions: u64,
    pub timeout_secs: f64,
}

/// Owns every live session of one camera stream.
pub struct SessionAggregator {
    config: SessionConfig,
    sessions: BTreeMap<u64, Session>,
    completed: u64,
    emitted: u64,
    discarded: u64,
    rejected: u64,
}

impl SessionAggregator {
    pub fn new(config: SessionConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            sessions: BTreeMap::new(),
            completed: 0,
            emitted: 0,
            discarded: 0,
            rejected: 0,
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Record one frame's observation of a track, creating its session on
    /// first sight.
    pub fn observe(&mut self, track_id: u64, obs: &Observation, now: DateTime<Utc>) {
        let session = self.sessions.entry(track_id).or_insert_with(|| {
            debug!(track_id, "session started");
            Session::new(track_id, now)
        });
        session.record(obs, now);
    }

    /// Whether the track has no session yet or its session still lacks a
    /// demographic vote.
    pub fn needs_demographics(&self, track_id: u64) -> bool {
        self.sessions
            .get(&track_id)
            .map_or(true, |s| !s.demographics_estimated)
    }

    pub fn get(&self, track_id: u64) -> Option<&Session> {
        self.sessions.get(&track_id)
    }

    pub fn active_count(&self) -> usize {
        self.sessions.len()
    }

    /// Remove and return every session unobserved for longer than the timeout.
    pub fn sweep_expired(&mut self, now: DateTime<Utc>) -> Vec<Session> {
        let timeout = self.config.timeout_secs;
        let expired: Vec<u64> = self
            .sessions
            .iter()
            .filter(|(_, s)| s.is_expired(now, timeout))
            .map(|(&id, _)| id)
            .collect();

        expired
            .into_iter()
            .filter_map(|id| self.remove(id))
            .collect()
    }

    /// Remove and return every live session regardless of age.
    pub fn drain_all(&mut self) -> Vec<Session> {
        let ids: Vec<u64> = self.sessions.keys().copied().collect();
        ids.into_iter().filter_map(|id| self.remove(id)).collect()
    }

    /// Build the payload of a finished session.
    ///
    /// Returns `Ok(None)` for sessions shorter than `min_duration_secs`.
    /// Attention that exceeds the whole-second duration only through
    /// truncation (at most one frame past the elapsed time) is capped at the
    /// duration; anything more fails validation.
    pub fn emit(&self, session: &Session) -> Result<Option<SessionPayload>> {
        let duration_seconds = session.duration_seconds();
        if duration_seconds < self.config.min_duration_secs {
            return Ok(None);
        }

        let mut attention_seconds = session.attention_seconds(self.config.fps);
        let frame_secs = 1.0 / self.config.fps;
        if attention_seconds > duration_seconds as f64
            && attention_seconds <= session.elapsed_seconds() + frame_secs + ATTENTION_EPSILON
        {
            attention_seconds = duration_seconds as f64;
        }

        let payload = SessionPayload {
            device_id: self.config.device_id,
            start_time: session.start_time,
            duration_seconds,
            attention_seconds,
            coordinates: session.coordinates(),
            demographics: Demographics {
                age_group: session.age_group(),
                gender_estimation: session.gender(),
                distance_cm: session.average_distance_cm(),
            },
            meta: Meta {
                firmware_version: self.config.firmware_version.clone(),
                model_version: self.config.model_version.clone(),
                tracker_version: self.config.tracker_version.clone(),
            },
        };
        payload.validate()?;

        Ok(Some(payload))
    }

    /// Sweep expired sessions and turn them into payloads.
    pub fn sweep_and_emit(&mut self, now: DateTime<Utc>) -> Vec<SessionPayload> {
        let expired = self.sweep_expired(now);
        self.emit_all(expired)
    }

    /// Expire every live session immediately and turn them into payloads.
    pub fn flush(&mut self) -> Vec<SessionPayload> {
        let sessions = self.drain_all();
        self.emit_all(sessions)
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            active_sessions: self.sessions.len(),
            completed_sessions: self.completed,
            emitted_sessions: self.emitted,
            discarded_sessions: self.discarded,
            rejected_sessions: self.rejected,
            timeout_secs: self.config.timeout_secs,
        }
    }

    fn remove(&mut self, track_id: u64) -> Option<Session> {
        let session = self.sessions.remove(&track_id)?;
        self.completed += 1;
        debug!(
            track_id,
            frames = session.total_frames,
            "session completed and destroyed"
        );
        Some(session)
    }

    fn emit_all(&mut self, sessions: Vec<Session>) -> Vec<SessionPayload> {
        let mut payloads = Vec::with_capacity(sessions.len());
        for session in &sessions {
            match self.emit(session) {
                Ok(Some(payload)) => {
                    self.emitted += 1;
                    payloads.push(payload);
                }
                Ok(None) => self.discarded += 1,
                Err(e) => {
                    self.rejected += 1;
                    warn!(error = %e, "dropping invalid session payload");
                }
            }
        }
        payloads
    }
}

/// Most frequent value; ties go to the value seen first.
fn majority_vote<T: Copy + PartialEq>(votes: &[T]) -> Option<T> {
    let mut best: Option<(T, usize)> = None;
    for (i, &vote) in votes.iter().enumerate() {
        if votes[..i].contains(&vote) {
            continue;
        }
        let count = votes.iter().filter(|&&v| v == vote).count();
        if best.map_or(true, |(_, c)| count > c) {
            best = Some((vote, count));
        }
    }
    best.map(|(v, _)| v)
}

/// Median, averaging the two middle values for even lengths.
fn median(mut values: Vec<f64>) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) / 2.0)
    } else {
        Some(values[mid])
    }
}

fn to_pixel(v: Option<f64>) -> u32 {
    match v {
        Some(v) if v.is_finite() => v.round().max(0.0) as u32,
        _ => 0,
    }
}

fn seconds(d: Duration) -> f64 {
    d.num_milliseconds() as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 12, 9, 14, 30, 0).unwrap()
    }

    fn at_ms(ms: i64) -> DateTime<Utc> {
        t0() + Duration::milliseconds(ms)
    }

    fn aggregator() -> SessionAggregator {
        SessionAggregator::new(SessionConfig::default()).unwrap()
    }

    // ===== Observe =====

    #[test]
    fn test_observe_creates_and_accumulates() {
        let mut agg = aggregator();
        agg.observe(5, &Observation::new(true).with_distance(200.0), at_ms(0));
        agg.observe(5, &Observation::new(false).with_distance(300.0), at_ms(500));
        agg.observe(5, &Observation::new(true), at_ms(1000));

        assert_eq!(agg.active_count(), 1);
        let s = agg.get(5).unwrap();
        assert_eq!(s.total_frames, 3);
        assert_eq!(s.attention_frames, 2);
        assert_eq!(s.distances, vec![200.0, 300.0]);
        assert_eq!(s.start_time, at_ms(0));
        assert_eq!(s.last_seen, at_ms(1000));
        assert_eq!(s.average_distance_cm(), 250);
    }

    #[test]
    fn test_long_dwell_centres_are_bounded() {
        let mut agg = aggregator();
        for i in 0..5000_i64 {
            let obs = Observation::new(false).with_center(i as f64, 240.0);
            agg.observe(3, &obs, at_ms(i * 33));
        }

        let s = agg.get(3).unwrap();
        assert_eq!(s.total_frames, 5000);
        assert!(s.centers.len() < MAX_CENTER_SAMPLES, "{} centres", s.centers.len());
        let coords = s.coordinates();
        assert!((2480..=2520).contains(&coords.x), "x = {}", coords.x);
        assert_eq!(coords.y, 240);
    }

    #[test]
    fn test_demographics_recorded_once() {
        let mut agg = aggregator();
        assert!(agg.needs_demographics(1));

        agg.observe(1, &Observation::new(false), at_ms(0));
        assert!(agg.needs_demographics(1));

        let obs = Observation::new(false).with_demographics(Some(AgeGroup::From25To34), Some(Gender::Female));
        agg.observe(1, &obs, at_ms(100));
        assert!(!agg.needs_demographics(1));

        let later = Observation::new(false).with_demographics(Some(AgeGroup::Over64), Some(Gender::Male));
        agg.observe(1, &later, at_ms(200));

        let s = agg.get(1).unwrap();
        assert_eq!(s.age_votes, vec![AgeGroup::From25To34]);
        assert_eq!(s.gender_votes, vec![Gender::Female]);
    }

    // ===== Expiry =====

    #[test]
    fn test_expiry_is_strict() {
        let mut agg = aggregator();
        agg.observe(1, &Observation::new(false), at_ms(0));

        assert!(agg.sweep_expired(at_ms(3000)).is_empty());
        assert_eq!(agg.active_count(), 1);

        let expired = agg.sweep_expired(at_ms(3001));
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].track_id(), 1);
        assert_eq!(agg.active_count(), 0);
    }

    #[test]
    fn test_continuous_session_emits_once_after_timeout() {
        let mut agg = aggregator();
        // 3 s at 30 fps, looking every other frame
        for i in 0..=90_i64 {
            let obs = Observation::new(i % 2 == 0).with_center(320.0, 240.0);
            agg.observe(9, &obs, at_ms(i * 100 / 3));
            assert!(agg.sweep_and_emit(at_ms(i * 100 / 3)).is_empty());
        }

        let payloads = agg.sweep_and_emit(at_ms(3000 + 4000));
        assert_eq!(payloads.len(), 1);
        assert_eq!(agg.active_count(), 0);
        assert!(agg.get(9).is_none());

        let p = &payloads[0];
        assert_eq!(p.duration_seconds, 3);
        assert_relative_eq!(p.attention_seconds, 46.0 / 30.0, epsilon = 1e-12);
        assert_eq!(p.coordinates, Coordinates { x: 320, y: 240 });
        assert_eq!(p.start_time, t0());

        assert!(agg.sweep_and_emit(at_ms(20_000)).is_empty());
        let stats = agg.stats();
        assert_eq!(stats.completed_sessions, 1);
        assert_eq!(stats.emitted_sessions, 1);
    }

    #[test]
    fn test_zero_duration_session_discarded() {
        let mut agg = aggregator();
        agg.observe(2, &Observation::new(true), at_ms(0));
        agg.observe(2, &Observation::new(true), at_ms(900));

        assert!(agg.sweep_and_emit(at_ms(5000)).is_empty());
        assert_eq!(agg.active_count(), 0);
        assert_eq!(agg.stats().discarded_sessions, 1);
    }

    #[test]
    fn test_reappearing_track_gets_new_session() {
        let mut agg = aggregator();
        agg.observe(4, &Observation::new(false), at_ms(0));
        agg.sweep_expired(at_ms(10_000));

        agg.observe(4, &Observation::new(false), at_ms(11_000));
        assert_eq!(agg.get(4).unwrap().start_time, at_ms(11_000));
        assert_eq!(agg.get(4).unwrap().total_frames, 1);
    }

    // ===== Emit =====

    #[test]
    fn test_emit_builds_payload() {
        let mut agg = aggregator();
        let demo = Observation::new(true)
            .with_distance(180.7)
            .with_center(100.0, 50.0)
            .with_demographics(Some(AgeGroup::From35To44), None);
        agg.observe(3, &demo, at_ms(0));
        agg.observe(3, &Observation::new(true).with_distance(181.0).with_center(300.0, 60.0), at_ms(1500));
        agg.observe(3, &Observation::new(false).with_center(120.0, 400.0), at_ms(2500));

        let s = agg.get(3).unwrap().clone();
        let p = agg.emit(&s).unwrap().unwrap();

        assert_eq!(p.device_id, 12);
        assert_eq!(p.duration_seconds, 2);
        assert_relative_eq!(p.attention_seconds, 2.0 / 30.0, epsilon = 1e-12);
        assert_eq!(p.coordinates, Coordinates { x: 120, y: 60 });
        assert_eq!(p.demographics.age_group, AgeGroup::From35To44);
        assert_eq!(p.demographics.gender_estimation, Gender::Unknown);
        assert_eq!(p.demographics.distance_cm, 180);
        assert_eq!(p.meta.tracker_version, "SORT");
    }

    #[test]
    fn test_emit_rejects_attention_over_duration() {
        let config = SessionConfig {
            fps: 1.0,
            ..SessionConfig::default()
        };
        let mut agg = SessionAggregator::new(config).unwrap();
        for i in 0..5 {
            agg.observe(1, &Observation::new(true), at_ms(i * 300));
        }
        // 5 attention frames at 1 fps against 1 s duration
        let s = agg.get(1).unwrap().clone();
        assert!(matches!(agg.emit(&s), Err(Error::AttentionExceedsDuration { .. })));

        assert!(agg.sweep_and_emit(at_ms(60_000)).is_empty());
        assert_eq!(agg.stats().rejected_sessions, 1);
    }

    #[test]
    fn test_emit_caps_attention_truncated_by_duration() {
        let mut agg = aggregator();
        // Looking for 61 frames at 30 fps spans 2 s
        for i in 0..=60_i64 {
            agg.observe(1, &Observation::new(true), at_ms(i * 100 / 3));
        }
        let s = agg.get(1).unwrap().clone();
        assert_relative_eq!(s.attention_seconds(30.0), 61.0 / 30.0, epsilon = 1e-12);

        let p = agg.emit(&s).unwrap().unwrap();
        assert_eq!(p.duration_seconds, 2);
        assert_relative_eq!(p.attention_seconds, 2.0);
    }

    #[test]
    fn test_flush_emits_active_sessions() {
        let mut agg = aggregator();
        agg.observe(1, &Observation::new(false), at_ms(0));
        agg.observe(1, &Observation::new(false), at_ms(1200));
        agg.observe(2, &Observation::new(false), at_ms(1200));

        let payloads = agg.flush();
        assert_eq!(payloads.len(), 1);
        assert_eq!(agg.active_count(), 0);
        assert_eq!(agg.stats().completed_sessions, 2);
    }

    #[test]
    fn test_invalid_config() {
        let config = SessionConfig {
            timeout_secs: 0.0,
            ..SessionConfig::default()
        };
        assert!(SessionAggregator::new(config).is_err());

        let config = SessionConfig {
            device_id: 0,
            ..SessionConfig::default()
        };
        assert!(SessionAggregator::new(config).is_err());
    }

    #[test]
    fn test_min_duration_below_one_second_rejected() {
        let config = SessionConfig {
            min_duration_secs: 0,
            ..SessionConfig::default()
        };
        assert!(matches!(
            SessionAggregator::new(config),
            Err(Error::InvalidConfig(_))
        ));

        let mut settings = crate::config::Settings::default();
        settings.session.min_duration_secs = 0;
        assert!(settings.validate().is_err());
    }

    // ===== Helpers =====

    #[test]
    fn test_majority_vote_first_seen_wins_ties() {
        assert_eq!(majority_vote::<Gender>(&[]), None);
        assert_eq!(
            majority_vote(&[Gender::Female, Gender::Male, Gender::Male, Gender::Female]),
            Some(Gender::Female)
        );
        assert_eq!(
            majority_vote(&[Gender::Female, Gender::Male, Gender::Male]),
            Some(Gender::Male)
        );
    }

    #[test]
    fn test_median() {
        assert_eq!(median(vec![]), None);
        assert_eq!(median(vec![3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(vec![4.0, 1.0, 3.0, 2.0]), Some(2.5));
        assert_eq!(to_pixel(Some(-4.0)), 0);
        assert_eq!(to_pixel(Some(2.5)), 3);
    }
}
