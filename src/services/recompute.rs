use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::db::{MasteryStore, StoreError};
use crate::mastery::Clock;
use crate::services::batch::{apply_batch, replace_user_history, BatchEvent, MalformedEvent};
use crate::services::event_source::{EventSourceClient, FetchError};

/// What a recompute does with aggregates that already exist for the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecomputeMode {
    /// Delete the user's aggregates and replay history in the same transaction.
    Reset,
    /// Fold history on top of current aggregates. Repeated runs double count.
    Additive,
}

impl RecomputeMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "reset" => Some(Self::Reset),
            "additive" => Some(Self::Additive),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecomputePhase {
    Fetching,
    Processing,
    Done,
    Failed,
}

impl fmt::Display for RecomputePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RecomputePhase::Fetching => "fetching",
            RecomputePhase::Processing => "processing",
            RecomputePhase::Done => "done",
            RecomputePhase::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecomputeResult {
    pub user_id: String,
    pub processed: usize,
    pub skipped: usize,
    pub mode: RecomputeMode,
}

#[derive(Debug, Error)]
pub enum RecomputeError {
    #[error("could not fetch event history: {0}")]
    Fetch(#[from] FetchError),
    #[error("could not apply event history: {0}")]
    Processing(#[from] StoreError),
}

impl RecomputeError {
    /// Phase the orchestrator was in when it failed.
    pub fn phase(&self) -> RecomputePhase {
        match self {
            RecomputeError::Fetch(_) => RecomputePhase::Fetching,
            RecomputeError::Processing(_) => RecomputePhase::Processing,
        }
    }
}

/// Rebuilds a user's aggregates from the upstream event history.
#[derive(Clone)]
pub struct RecomputeOrchestrator {
    store: MasteryStore,
    source: EventSourceClient,
    clock: Arc<dyn Clock>,
    mode: RecomputeMode,
}

impl RecomputeOrchestrator {
    pub fn new(
        store: MasteryStore,
        source: EventSourceClient,
        clock: Arc<dyn Clock>,
        mode: RecomputeMode,
    ) -> Self {
        Self {
            store,
            source,
            clock,
            mode,
        }
    }

    pub fn mode(&self) -> RecomputeMode {
        self.mode
    }

    pub async fn recompute(
        &self,
        user_id: &str,
        cancel: &CancellationToken,
    ) -> Result<RecomputeResult, RecomputeError> {
        let result = self.run(user_id, cancel).await;
        match &result {
            Ok(done) => info!(
                user_id,
                phase = %RecomputePhase::Done,
                processed = done.processed,
                skipped = done.skipped,
                "recompute finished"
            ),
            Err(err) => error!(
                user_id,
                phase = %RecomputePhase::Failed,
                failed_in = %err.phase(),
                error = %err,
                "recompute failed"
            ),
        }
        result
    }

    async fn run(
        &self,
        user_id: &str,
        cancel: &CancellationToken,
    ) -> Result<RecomputeResult, RecomputeError> {
        debug!(user_id, phase = %RecomputePhase::Fetching, "recompute started");
        let records = self.source.fetch_history(user_id, cancel).await?;

        debug!(user_id, phase = %RecomputePhase::Processing, records = records.len(), "replaying history");
        let mut rejected = 0usize;
        let mut events = Vec::with_capacity(records.len());
        for (index, record) in records.into_iter().enumerate() {
            match normalize_record(user_id, record) {
                Ok(event) => events.push(event),
                Err(reason) => {
                    debug!(user_id, index, %reason, "skipping unusable history record");
                    rejected += 1;
                }
            }
        }

        let clock = self.clock.as_ref();
        let outcome = match self.mode {
            RecomputeMode::Reset => replace_user_history(&self.store, clock, user_id, &events).await?,
            RecomputeMode::Additive => apply_batch(&self.store, clock, user_id, &events).await?,
        };

        Ok(RecomputeResult {
            user_id: user_id.to_string(),
            processed: outcome.processed,
            skipped: outcome.skipped + rejected,
            mode: self.mode,
        })
    }
}

/// Turns one upstream record into a batch event.
///
/// Records must be objects; an explicit `user_id` must name the user being
/// recomputed. Field-level checks are left to the batch processor.
pub fn normalize_record(user_id: &str, record: Value) -> Result<BatchEvent, MalformedEvent> {
    let Value::Object(map) = &record else {
        return Err(MalformedEvent::NotAnEvent);
    };

    match map.get("user_id") {
        None | Some(Value::Null) => {}
        Some(Value::String(found)) if found == user_id => {}
        Some(Value::String(found)) => {
            return Err(MalformedEvent::UserMismatch {
                expected: user_id.to_string(),
                found: found.clone(),
            })
        }
        Some(_) => return Err(MalformedEvent::NotAnEvent),
    }

    serde_json::from_value(record).map_err(|_| MalformedEvent::NotAnEvent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_mode_parse() {
        assert_eq!(RecomputeMode::parse("Reset"), Some(RecomputeMode::Reset));
        assert_eq!(RecomputeMode::parse(" additive "), Some(RecomputeMode::Additive));
        assert_eq!(RecomputeMode::parse("wipe"), None);
    }

    #[test]
    fn test_normalize_accepts_ingest_shape() {
        let event = normalize_record(
            "u1",
            json!({
                "id": 17,
                "user_id": "u1",
                "concept_id": "c1",
                "event_type": "quiz_attempt",
                "event_details": { "score": 70 },
                "timestamp": "2024-01-01T00:00:00Z"
            }),
        )
        .unwrap();

        assert_eq!(event, BatchEvent::new("c1", "quiz_attempt", json!({ "score": 70 })));
    }

    #[test]
    fn test_normalize_rejects_foreign_user() {
        let err = normalize_record(
            "u1",
            json!({ "user_id": "u2", "concept_id": "c1", "event_type": "quiz_attempt" }),
        )
        .unwrap_err();

        assert_eq!(
            err,
            MalformedEvent::UserMismatch {
                expected: "u1".into(),
                found: "u2".into()
            }
        );
    }

    #[test]
    fn test_normalize_rejects_non_objects_and_bad_types() {
        assert_eq!(normalize_record("u1", json!("oops")), Err(MalformedEvent::NotAnEvent));
        assert_eq!(normalize_record("u1", json!([1])), Err(MalformedEvent::NotAnEvent));
        assert_eq!(
            normalize_record("u1", json!({ "concept_id": 42, "event_type": "quiz_attempt" })),
            Err(MalformedEvent::NotAnEvent)
        );
    }

    #[test]
    fn test_normalize_leaves_missing_fields_to_batch() {
        let event = normalize_record("u1", json!({ "event_type": "quiz_attempt" })).unwrap();
        assert_eq!(event.concept_id, None);
    }
}
