use chrono::{DateTime, Utc};

use super::types::{LearningEvent, MasteryAggregate};

/// Folds one event into the aggregate for its (user, concept) pair.
///
/// Only `quiz_attempt` events change counters; anything else hands back the
/// current aggregate untouched (or a zeroed one when none exists yet). The
/// caller decides whether a zeroed aggregate is worth persisting.
pub fn fold(
    current: Option<MasteryAggregate>,
    event: &LearningEvent,
    now: DateTime<Utc>,
) -> MasteryAggregate {
    let mut aggregate = current
        .unwrap_or_else(|| MasteryAggregate::fresh(&event.user_id, &event.concept_id, now));

    if event.affects_mastery() {
        aggregate.record_attempt(event.is_successful(), now);
    }

    aggregate
}
