use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const QUIZ_ATTEMPT: &str = "quiz_attempt";
pub const PASSING_SCORE: f64 = 60.0;
pub const MAX_SCORE: f64 = 100.0;

/// Durable per-(user, concept) summary of quiz attempts.
///
/// `mastery_score` is derived from the two counters and is only ever written
/// through [`MasteryAggregate::record_attempt`] or [`MasteryAggregate::restore`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MasteryAggregate {
    pub user_id: String,
    pub concept_id: String,
    pub mastery_score: f64,
    pub total_attempts: u32,
    pub successful_attempts: u32,
    pub last_updated: DateTime<Utc>,
}

impl MasteryAggregate {
    pub fn fresh(user_id: impl Into<String>, concept_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.into(),
            concept_id: concept_id.into(),
            mastery_score: 0.0,
            total_attempts: 0,
            successful_attempts: 0,
            last_updated: now,
        }
    }

    /// Rebuilds an aggregate from stored counters, clamping `successful` to `total`.
    pub fn restore(
        user_id: impl Into<String>,
        concept_id: impl Into<String>,
        total_attempts: u32,
        successful_attempts: u32,
        last_updated: DateTime<Utc>,
    ) -> Self {
        let successful_attempts = successful_attempts.min(total_attempts);
        Self {
            user_id: user_id.into(),
            concept_id: concept_id.into(),
            mastery_score: ratio(successful_attempts, total_attempts),
            total_attempts,
            successful_attempts,
            last_updated,
        }
    }

    pub fn record_attempt(&mut self, successful: bool, now: DateTime<Utc>) {
        self.total_attempts = self.total_attempts.saturating_add(1);
        if successful {
            self.successful_attempts = self.successful_attempts.saturating_add(1);
        }
        self.mastery_score = ratio(self.successful_attempts, self.total_attempts);
        self.last_updated = now;
    }
}

fn ratio(successful: u32, total: u32) -> f64 {
    if total == 0 {
        return 0.0;
    }
    f64::from(successful) / f64::from(total)
}

/// Open-ended payload attached to a learning event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventDetails(pub Map<String, Value>);

impl EventDetails {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_score(score: impl Into<Value>) -> Self {
        let mut map = Map::new();
        map.insert("score".to_string(), score.into());
        Self(map)
    }

    /// Score on the 0-100 scale. Missing, non-numeric and out-of-range values read as 0.
    pub fn score(&self) -> f64 {
        let raw = match self.0.get("score") {
            Some(Value::Number(n)) => n.as_f64(),
            Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
            _ => None,
        };

        match raw {
            Some(v) if v.is_finite() && (0.0..=MAX_SCORE).contains(&v) => v,
            _ => 0.0,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningEvent {
    pub user_id: String,
    pub concept_id: String,
    pub event_type: String,
    #[serde(default)]
    pub event_details: EventDetails,
}

impl LearningEvent {
    pub fn new(
        user_id: impl Into<String>,
        concept_id: impl Into<String>,
        event_type: impl Into<String>,
        event_details: EventDetails,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            concept_id: concept_id.into(),
            event_type: event_type.into(),
            event_details,
        }
    }

    pub fn quiz_attempt(user_id: &str, concept_id: &str, score: impl Into<Value>) -> Self {
        Self::new(user_id, concept_id, QUIZ_ATTEMPT, EventDetails::with_score(score))
    }

    pub fn affects_mastery(&self) -> bool {
        self.event_type == QUIZ_ATTEMPT
    }

    pub fn is_successful(&self) -> bool {
        self.event_details.score() >= PASSING_SCORE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn details(value: Value) -> EventDetails {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_score_defaults_to_zero_when_absent() {
        assert_eq!(EventDetails::new().score(), 0.0);
    }

    #[test]
    fn test_score_coerces_malformed_values() {
        assert_eq!(details(json!({"score": "abc"})).score(), 0.0);
        assert_eq!(details(json!({"score": null})).score(), 0.0);
        assert_eq!(details(json!({"score": [70]})).score(), 0.0);
        assert_eq!(details(json!({"score": 101})).score(), 0.0);
        assert_eq!(details(json!({"score": -5})).score(), 0.0);
    }

    #[test]
    fn test_score_accepts_numeric_strings() {
        assert_eq!(details(json!({"score": " 75 "})).score(), 75.0);
        assert_eq!(details(json!({"score": 60.5})).score(), 60.5);
    }

    #[test]
    fn test_zero_attempts_reports_zero_mastery() {
        let agg = MasteryAggregate::restore("u", "c", 0, 0, Utc::now());
        assert_eq!(agg.mastery_score, 0.0);
    }

    #[test]
    fn test_restore_clamps_successful_to_total() {
        let agg = MasteryAggregate::restore("u", "c", 2, 5, Utc::now());
        assert_eq!(agg.successful_attempts, 2);
        assert_eq!(agg.mastery_score, 1.0);
    }

    #[test]
    fn test_event_details_default_when_missing() {
        let event: LearningEvent = serde_json::from_value(json!({
            "user_id": "u1",
            "concept_id": "c1",
            "event_type": "video_watched"
        }))
        .unwrap();
        assert!(event.event_details.0.is_empty());
        assert!(!event.affects_mastery());
    }
}
