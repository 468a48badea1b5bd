//! Anonymous session payload: the wire contract handed to ingestion.
//!
//! A payload never carries the local track identity. Enumerated fields only
//! accept their listed values and every payload is validated before it
//! leaves the aggregator.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Estimated age bracket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub enum AgeGroup {
    #[serde(rename = "0-17")]
    Under18,
    #[serde(rename = "18-24")]
    From18To24,
    #[serde(rename = "25-34")]
    From25To34,
    #[serde(rename = "35-44")]
    From35To44,
    #[serde(rename = "45-54")]
    From45To54,
    #[serde(rename = "55-64")]
    From55To64,
    #[serde(rename = "65+")]
    Over64,
    #[serde(rename = "unknown")]
    #[default]
    Unknown,
}

impl AgeGroup {
    pub const ALL: [AgeGroup; 8] = [
        AgeGroup::Under18,
        AgeGroup::From18To24,
        AgeGroup::From25To34,
        AgeGroup::From35To44,
        AgeGroup::From45To54,
        AgeGroup::From55To64,
        AgeGroup::Over64,
        AgeGroup::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgeGroup::Under18 => "0-17",
            AgeGroup::From18To24 => "18-24",
            AgeGroup::From25To34 => "25-34",
            AgeGroup::From35To44 => "35-44",
            AgeGroup::From45To54 => "45-54",
            AgeGroup::From55To64 => "55-64",
            AgeGroup::Over64 => "65+",
            AgeGroup::Unknown => "unknown",
        }
    }
}

impl fmt::Display for AgeGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgeGroup {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        AgeGroup::ALL
            .into_iter()
            .find(|g| g.as_str() == s)
            .ok_or_else(|| Error::InvalidAgeGroup(s.to_string()))
    }
}

impl TryFrom<String> for AgeGroup {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

/// Estimated gender.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
    #[default]
    Unknown,
}

impl Gender {
    pub const ALL: [Gender; 3] = [Gender::Male, Gender::Female, Gender::Unknown];

    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Male => "male",
            Gender::Female => "female",
            Gender::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Gender {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Gender::ALL
            .into_iter()
            .find(|g| g.as_str() == s)
            .ok_or_else(|| Error::InvalidGender(s.to_string()))
    }
}

impl TryFrom<String> for Gender {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

/// Predominant position during the session, in pixels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coordinates {
    pub x: u32,
    pub y: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Demographics {
    pub age_group: AgeGroup,
    pub gender_estimation: Gender,
    /// Mean distance to the screen in centimetres.
    pub distance_cm: u32,
}

/// Versions of the software that produced the payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meta {
    pub firmware_version: String,
    pub model_version: String,
    pub tracker_version: String,
}

/// One finished, anonymous viewing session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionPayload {
    /// Screen the session was observed at, at least 1.
    pub device_id: u32,
    pub start_time: DateTime<Utc>,
    pub duration_seconds: u64,
    /// Time spent looking at the screen, never above `duration_seconds`.
    pub attention_seconds: f64,
    pub coordinates: Coordinates,
    pub demographics: Demographics,
    pub meta: Meta,
}

impl SessionPayload {
    /// Check the field constraints of the wire contract.
    pub fn validate(&self) -> Result<()> {
        if self.device_id < 1 {
            return Err(Error::InvalidPayload(format!(
                "device_id must be at least 1, got {}",
                self.device_id
            )));
        }
        if !self.attention_seconds.is_finite() || self.attention_seconds < 0.0 {
            return Err(Error::InvalidPayload(format!(
                "attention_seconds must be a non-negative number, got {}",
                self.attention_seconds
            )));
        }
        if self.attention_seconds > self.duration_seconds as f64 {
            return Err(Error::AttentionExceedsDuration {
                attention_seconds: self.attention_seconds,
                duration_seconds: self.duration_seconds,
            });
        }
        Ok(())
    }

    /// Share of the session spent looking at the screen, 0 for
    /// zero-length sessions.
    pub fn attention_rate(&self) -> f64 {
        if self.duration_seconds == 0 {
            0.0
        } else {
            self.attention_seconds / self.duration_seconds as f64
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse and validate a payload.
    pub fn from_json(json: &str) -> Result<Self> {
        let payload: SessionPayload = serde_json::from_str(json)?;
        payload.validate()?;
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::TimeZone;

    fn payload() -> SessionPayload {
        SessionPayload {
            device_id: 12,
            start_time: Utc.with_ymd_and_hms(2025, 12, 9, 14, 30, 0).unwrap(),
            duration_seconds: 14,
            attention_seconds: 9.4,
            coordinates: Coordinates { x: 640, y: 360 },
            demographics: Demographics {
                age_group: AgeGroup::From25To34,
                gender_estimation: Gender::Male,
                distance_cm: 180,
            },
            meta: Meta {
                firmware_version: "1.8.2".to_string(),
                model_version: "yolov8n".to_string(),
                tracker_version: "SORT".to_string(),
            },
        }
    }

    // ===== Enumerations =====

    #[test]
    fn test_age_group_parse() {
        for group in AgeGroup::ALL {
            assert_eq!(group.as_str().parse::<AgeGroup>().unwrap(), group);
        }
        assert!(matches!("55+".parse::<AgeGroup>(), Err(Error::InvalidAgeGroup(s)) if s == "55+"));
    }

    #[test]
    fn test_gender_parse() {
        assert_eq!("female".parse::<Gender>().unwrap(), Gender::Female);
        assert!(matches!("Male".parse::<Gender>(), Err(Error::InvalidGender(_))));
    }

    // ===== Validation =====

    #[test]
    fn test_demographic_defaults_are_unknown() {
        assert_eq!(AgeGroup::default(), AgeGroup::Unknown);
        assert_eq!(Gender::default(), Gender::Unknown);
    }

    #[test]
    fn test_payload_valid() {
        assert!(payload().validate().is_ok());
    }

    #[test]
    fn test_payload_attention_exceeds_duration() {
        let mut p = payload();
        p.attention_seconds = 14.5;
        assert!(matches!(
            p.validate(),
            Err(Error::AttentionExceedsDuration { duration_seconds: 14, .. })
        ));

        // Equal is allowed
        p.attention_seconds = 14.0;
        assert!(p.validate().is_ok());
    }

    #[test]
    fn test_payload_rejects_bad_device_and_attention() {
        let mut p = payload();
        p.device_id = 0;
        assert!(matches!(p.validate(), Err(Error::InvalidPayload(_))));

        let mut p = payload();
        p.attention_seconds = -1.0;
        assert!(matches!(p.validate(), Err(Error::InvalidPayload(_))));
    }

    #[test]
    fn test_attention_rate() {
        assert_relative_eq!(payload().attention_rate(), 9.4 / 14.0, epsilon = 1e-12);

        let mut p = payload();
        p.duration_seconds = 0;
        p.attention_seconds = 0.0;
        assert_relative_eq!(p.attention_rate(), 0.0);
    }

    // ===== JSON =====

    #[test]
    fn test_payload_json_shape() {
        let json = payload().to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["device_id"], 12);
        assert_eq!(value["start_time"], "2025-12-09T14:30:00Z");
        assert_eq!(value["demographics"]["age_group"], "25-34");
        assert_eq!(value["demographics"]["gender_estimation"], "male");
        assert_eq!(value["coordinates"]["x"], 640);
        assert_eq!(value["meta"]["tracker_version"], "SORT");
        assert!(value.get("track_id").is_none());
    }

    #[test]
    fn test_payload_from_json_validates() {
        let json = payload().to_json().unwrap();
        assert_eq!(SessionPayload::from_json(&json).unwrap(), payload());

        let bad_group = json.replace("25-34", "55+");
        assert!(SessionPayload::from_json(&bad_group).is_err());

        let mut p = payload();
        p.attention_seconds = 20.0;
        let too_long = serde_json::to_string(&p).unwrap();
        assert!(matches!(
            SessionPayload::from_json(&too_long),
            Err(Error::AttentionExceedsDuration { .. })
        ));
    }
}
