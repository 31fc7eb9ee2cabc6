//! Event ingest boundary
//!
//! Raw client payloads are untrusted: every field is optional, numbers may
//! be garbage, event types may be misspelled. [`ingest`] is the single
//! validation point that turns a [`RawEvent`] into a [`NormalizedEvent`]
//! or rejects it with a scoped error. Normalization happens exactly once;
//! everything downstream consumes the normalized form.
//!
//! [`IngestPipeline`] drives batches: it resolves each event's concept
//! list, normalizes, appends through the store contract, and advances the
//! student's `last_accessed_at`. One bad event never blocks the rest of
//! the batch.

use crate::error::{Error, Result};
use crate::store::TimelineStore;
use crate::types::{AnalyticsEvent, Concept, EventKind, NormalizedEvent, RawEvent, RewindEvent};
use chrono::Utc;
use std::collections::HashMap;
use uuid::Uuid;

/// Validate and normalize one raw client event.
///
/// `concepts` is the owning lecture's concept list, ordered by
/// `start_time`. Pure with respect to the store: the caller appends.
pub fn ingest(raw: &RawEvent, concepts: &[Concept]) -> Result<NormalizedEvent> {
    let kind: EventKind = raw
        .event_type
        .as_deref()
        .ok_or_else(|| Error::malformed("missing eventType"))?
        .parse()
        .map_err(Error::malformed)?;

    let student_id = require(&raw.user_id, "userId")?;
    let course_id = require(&raw.course_id, "courseId")?;
    let lecture_id = require(&raw.lecture_id, "lectureId")?;
    let timestamp = raw
        .timestamp
        .ok_or_else(|| Error::malformed("missing or unparseable timestamp"))?;

    if concepts.is_empty() {
        return Err(Error::UnknownLecture(lecture_id));
    }

    check_finite(raw.position, "position")?;
    check_finite(raw.from_time, "fromTime")?;
    check_finite(raw.to_time, "toTime")?;
    if let Some(speed) = raw.playback_speed {
        if !speed.is_finite() || speed <= 0.0 {
            return Err(Error::malformed(format!(
                "playbackSpeed must be a positive finite number, got {}",
                speed
            )));
        }
    }

    let id = raw
        .id
        .clone()
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let created_at = Utc::now();

    if kind == EventKind::Rewind {
        let from_time = raw
            .from_time
            .ok_or_else(|| Error::malformed("rewind requires fromTime"))?;
        let to_time = raw
            .to_time
            .ok_or_else(|| Error::malformed("rewind requires toTime"))?;
        if from_time <= to_time {
            return Err(Error::malformed(format!(
                "rewind must move backward: fromTime {} <= toTime {}",
                from_time, to_time
            )));
        }

        return Ok(NormalizedEvent::Rewind {
            student_id,
            course_id,
            lecture_id,
            event: RewindEvent {
                id,
                from_time,
                to_time,
                rewind_amount: from_time - to_time,
                from_concept_id: resolve_concept(concepts, from_time).map(|c| c.id.clone()),
                to_concept_id: resolve_concept(concepts, to_time).map(|c| c.id.clone()),
                timestamp,
                created_at,
            },
        });
    }

    let concept_id = raw
        .position
        .and_then(|p| resolve_concept(concepts, p))
        .map(|c| c.id.clone());

    Ok(NormalizedEvent::Generic(AnalyticsEvent {
        id,
        student_id,
        course_id,
        lecture_id,
        concept_id,
        kind,
        position: raw.position,
        playback_speed: raw.playback_speed,
        timestamp,
        metadata: raw.metadata.clone().unwrap_or(serde_json::Value::Null),
        created_at,
    }))
}

/// Find the concept whose `[start_time, end_time)` interval contains `t`.
///
/// Binary search over the `start_time`-ordered list. A time exactly at a
/// concept's `end_time` resolves to the next concept, never the current
/// one.
pub fn resolve_concept(concepts: &[Concept], t: f64) -> Option<&Concept> {
    let idx = concepts.partition_point(|c| c.start_time <= t);
    let candidate = concepts.get(idx.checked_sub(1)?)?;
    candidate.contains(t).then_some(candidate)
}

fn require(field: &Option<String>, name: &str) -> Result<String> {
    field
        .clone()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| Error::malformed(format!("missing {}", name)))
}

fn check_finite(value: Option<f64>, name: &str) -> Result<()> {
    if let Some(v) = value {
        if !v.is_finite() || v < 0.0 {
            return Err(Error::malformed(format!(
                "{} must be a non-negative finite number, got {}",
                name, v
            )));
        }
    }
    Ok(())
}

/// Outcome of one batch run.
#[derive(Debug, Default)]
pub struct BatchResult {
    /// Events normalized and newly appended
    pub accepted: usize,
    /// Events whose id had already been stored (retry duplicates, no-op)
    pub duplicates: usize,
    /// Dropped events with the reason, keyed by client event id when known
    pub rejected: Vec<(String, String)>,
}

impl BatchResult {
    pub fn total(&self) -> usize {
        self.accepted + self.duplicates + self.rejected.len()
    }
}

/// Batch ingest coordinator: resolve concepts, normalize, append, touch.
pub struct IngestPipeline<S: TimelineStore> {
    store: S,
}

impl<S: TimelineStore> IngestPipeline<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Ingest a batch of raw events.
    ///
    /// Validation failures and unknown lectures are collected per event in
    /// `rejected`; only store failures abort the batch.
    pub fn ingest_batch(&self, raws: &[RawEvent]) -> Result<BatchResult> {
        let mut result = BatchResult::default();
        // Concept lists rarely vary within one export, cache per lecture
        let mut concept_cache: HashMap<String, Option<Vec<Concept>>> = HashMap::new();

        for raw in raws {
            let event_id = raw.id.clone().unwrap_or_else(|| "<no id>".to_string());

            let Some(lecture_id) = raw.lecture_id.clone() else {
                result
                    .rejected
                    .push((event_id, "missing lectureId".to_string()));
                continue;
            };

            let concepts = match concept_cache.get(&lecture_id) {
                Some(cached) => cached.clone(),
                None => {
                    let fetched = self.store.lecture_concepts(&lecture_id)?;
                    concept_cache.insert(lecture_id.clone(), fetched.clone());
                    fetched
                }
            };
            let concepts = concepts.unwrap_or_default();

            match ingest(raw, &concepts) {
                Ok(event) => {
                    let stored =
                        self.store
                            .append(event.student_id(), event.lecture_id(), &event)?;
                    self.store
                        .touch(event.student_id(), event.lecture_id(), event.timestamp())?;
                    if stored {
                        result.accepted += 1;
                    } else {
                        result.duplicates += 1;
                        tracing::debug!(event_id = %event.id(), "Duplicate event ignored");
                    }
                }
                Err(err @ (Error::MalformedEvent { .. } | Error::UnknownLecture(_))) => {
                    tracing::warn!(event_id = %event_id, error = %err, "Event rejected");
                    result.rejected.push((event_id, err.to_string()));
                }
                Err(err) => return Err(err),
            }
        }

        tracing::info!(
            accepted = result.accepted,
            duplicates = result.duplicates,
            rejected = result.rejected.len(),
            "Batch ingest complete"
        );
        Ok(result)
    }
}
