use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::SqliteConnection;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::db::operations::mastery::{delete_user_mastery, get_mastery, upsert_mastery};
use crate::db::{MasteryStore, StoreError};
use crate::mastery::{fold, Clock, EventDetails, LearningEvent, MasteryAggregate};

/// One event as submitted to a batch. Every field is optional so that shape
/// problems surface as [`MalformedEvent`] instead of a decode failure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchEvent {
    #[serde(default)]
    pub concept_id: Option<String>,
    #[serde(default)]
    pub event_type: Option<String>,
    #[serde(default)]
    pub event_details: Option<Value>,
}

impl BatchEvent {
    pub fn new(concept_id: &str, event_type: &str, event_details: Value) -> Self {
        Self {
            concept_id: Some(concept_id.to_string()),
            event_type: Some(event_type.to_string()),
            event_details: Some(event_details),
        }
    }

    pub fn validate(&self, user_id: &str) -> Result<LearningEvent, MalformedEvent> {
        let concept_id = non_blank(self.concept_id.as_deref()).ok_or(MalformedEvent::MissingConceptId)?;
        let event_type = non_blank(self.event_type.as_deref()).ok_or(MalformedEvent::MissingEventType)?;

        let event_details = match &self.event_details {
            None | Some(Value::Null) => EventDetails::new(),
            Some(Value::Object(map)) => EventDetails(map.clone()),
            Some(_) => return Err(MalformedEvent::DetailsNotObject),
        };

        Ok(LearningEvent::new(user_id, concept_id, event_type, event_details))
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedEvent {
    #[error("record is not a JSON object matching the event shape")]
    NotAnEvent,
    #[error("missing concept_id")]
    MissingConceptId,
    #[error("missing event_type")]
    MissingEventType,
    #[error("event_details is not an object")]
    DetailsNotObject,
    #[error("event belongs to user {found}, expected {expected}")]
    UserMismatch { expected: String, found: String },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchOutcome {
    pub processed: usize,
    pub skipped: usize,
}

/// Folds `events` for one user inside a single transaction.
///
/// Malformed events are skipped and counted. Any storage error rolls the whole
/// batch back and is returned to the caller.
pub async fn apply_batch(
    store: &MasteryStore,
    clock: &dyn Clock,
    user_id: &str,
    events: &[BatchEvent],
) -> Result<BatchOutcome, StoreError> {
    run_batch(store, clock, user_id, events, false).await
}

/// Same as [`apply_batch`] but deletes the user's existing aggregates first,
/// within the same transaction.
pub async fn replace_user_history(
    store: &MasteryStore,
    clock: &dyn Clock,
    user_id: &str,
    events: &[BatchEvent],
) -> Result<BatchOutcome, StoreError> {
    run_batch(store, clock, user_id, events, true).await
}

/// Applies a single event with its own commit.
///
/// Returns the aggregate after the fold, or `None` when a non-quiz event
/// arrives for a pair that has no aggregate yet.
pub async fn apply_event(
    store: &MasteryStore,
    clock: &dyn Clock,
    event: &LearningEvent,
) -> Result<Option<MasteryAggregate>, StoreError> {
    let mut tx = store.begin().await?;

    match fold_one(&mut tx, event, clock).await {
        Ok(result) => {
            tx.commit().await?;
            Ok(result)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                warn!(error = %rollback_err, "rollback after failed event");
            }
            Err(err)
        }
    }
}

async fn run_batch(
    store: &MasteryStore,
    clock: &dyn Clock,
    user_id: &str,
    events: &[BatchEvent],
    reset: bool,
) -> Result<BatchOutcome, StoreError> {
    let mut tx = store.begin().await?;

    match fold_all(&mut tx, clock, user_id, events, reset).await {
        Ok(outcome) => {
            tx.commit().await?;
            info!(
                user_id,
                processed = outcome.processed,
                skipped = outcome.skipped,
                reset,
                "mastery batch committed"
            );
            Ok(outcome)
        }
        Err(err) => {
            error!(user_id, error = %err, "mastery batch failed, rolling back");
            if let Err(rollback_err) = tx.rollback().await {
                warn!(user_id, error = %rollback_err, "rollback after failed batch");
            }
            Err(err)
        }
    }
}

async fn fold_all(
    conn: &mut SqliteConnection,
    clock: &dyn Clock,
    user_id: &str,
    events: &[BatchEvent],
    reset: bool,
) -> Result<BatchOutcome, StoreError> {
    if reset {
        let removed = delete_user_mastery(conn, user_id).await?;
        debug!(user_id, removed, "cleared aggregates before replay");
    }

    let mut outcome = BatchOutcome::default();
    for (index, raw) in events.iter().enumerate() {
        let event = match raw.validate(user_id) {
            Ok(event) => event,
            Err(reason) => {
                debug!(user_id, index, %reason, "skipping malformed event");
                outcome.skipped += 1;
                continue;
            }
        };

        fold_one(conn, &event, clock).await?;
        outcome.processed += 1;
    }

    Ok(outcome)
}

async fn fold_one(
    conn: &mut SqliteConnection,
    event: &LearningEvent,
    clock: &dyn Clock,
) -> Result<Option<MasteryAggregate>, StoreError> {
    let current = get_mastery(conn, &event.user_id, &event.concept_id).await?;

    // Non-quiz events never materialise an empty row.
    if !event.affects_mastery() {
        return Ok(current);
    }

    let next = fold(current, event, clock.now());
    upsert_mastery(conn, &next).await?;
    Ok(Some(next))
}
