//! Batch ingestion of decision events.
//!
//! The endpoint is partial-success: every event in a batch is validated,
//! clamped, and applied independently, and one rejection never rolls back
//! its peers. `server_ts` is sampled once per request so all events
//! accepted together share it; the `event_id` tie-break keeps the total
//! order strict regardless.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::common::id::{clamp_skew, new_id, Clock};
use crate::common::ApiError;
use crate::domains::projects::models::{DecisionSchema, Project};
use crate::kernel::traits::Store;

use super::models::{ApplyOutcome, DecisionEvent};

pub const MAX_BATCH_SIZE: usize = 200;
pub const MAX_NOTE_LEN: usize = 2000;

#[derive(Debug, Clone, Deserialize)]
pub struct EventInput {
    pub event_id: String,
    pub item_id: String,
    pub decision_id: String,
    #[serde(default)]
    pub note: Option<String>,
    pub ts_client: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventBatch {
    /// Opaque client identifiers, echoed back but never persisted.
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    pub events: Vec<EventInput>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventOutcome {
    Accepted,
    Duplicate,
    Rejected,
}

#[derive(Debug, Clone, Serialize)]
pub struct EventResult {
    pub event_id: String,
    pub status: EventOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<&'static str>,
}

#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub acked: usize,
    pub accepted: usize,
    pub duplicate: usize,
    pub rejected: usize,
    pub server_ts: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub results: Vec<EventResult>,
}

enum Rejection {
    Code(&'static str),
}

/// Validate one event against the active decision schema. Scope (does the
/// item exist) is checked separately against the store.
fn validate_event(input: &EventInput, schema: &DecisionSchema) -> Result<(Uuid, Uuid), Rejection> {
    let event_id =
        Uuid::parse_str(&input.event_id).map_err(|_| Rejection::Code("invalid_event_id"))?;
    // An item id that is not a UUID cannot reference any item.
    let item_id = Uuid::parse_str(&input.item_id).map_err(|_| Rejection::Code("unknown_item"))?;

    if !schema.has_choice(&input.decision_id) {
        return Err(Rejection::Code("invalid_decision_id"));
    }
    if let Some(note) = &input.note {
        if note.chars().count() > MAX_NOTE_LEN {
            return Err(Rejection::Code("invalid_note"));
        }
        if !schema.allow_notes && !note.is_empty() {
            return Err(Rejection::Code("invalid_note"));
        }
    }
    Ok((event_id, item_id))
}

/// Run a batch through validation, skew clamping, and idempotent apply.
pub async fn ingest_batch(
    store: &Arc<dyn Store>,
    clock: &Arc<dyn Clock>,
    skew_window_ms: i64,
    project: &Project,
    user_id: Uuid,
    batch: EventBatch,
) -> Result<IngestResponse, ApiError> {
    if batch.events.len() > MAX_BATCH_SIZE {
        return Err(ApiError::validation(
            "validation_error",
            format!("batch exceeds {} events", MAX_BATCH_SIZE),
        ));
    }
    let schema = project.schema().map_err(ApiError::Internal)?;

    // One server timestamp per request; every event accepted in this batch
    // shares it.
    let server_ts = clock.now_ms();

    let mut results = Vec::with_capacity(batch.events.len());
    let mut accepted = 0usize;
    let mut duplicate = 0usize;
    let mut rejected = 0usize;

    for input in &batch.events {
        let (event_id, item_id) = match validate_event(input, &schema) {
            Ok(ids) => ids,
            Err(Rejection::Code(code)) => {
                rejected += 1;
                results.push(EventResult {
                    event_id: input.event_id.clone(),
                    status: EventOutcome::Rejected,
                    error_code: Some(code),
                });
                continue;
            }
        };

        if !store
            .item_exists(project.id, item_id)
            .await
            .map_err(ApiError::Internal)?
        {
            rejected += 1;
            results.push(EventResult {
                event_id: input.event_id.clone(),
                status: EventOutcome::Rejected,
                error_code: Some("unknown_item"),
            });
            continue;
        }

        let event = DecisionEvent {
            id: new_id(),
            project_id: project.id,
            user_id,
            event_id,
            item_id,
            decision_id: input.decision_id.clone(),
            note: input.note.clone().filter(|n| !n.is_empty()),
            ts_client: input.ts_client,
            ts_client_effective: clamp_skew(input.ts_client, server_ts, skew_window_ms),
            ts_server: server_ts,
            created_at: chrono::Utc::now(),
        };

        match store.apply_event(&event).await.map_err(ApiError::Internal)? {
            ApplyOutcome::Accepted => {
                accepted += 1;
                results.push(EventResult {
                    event_id: input.event_id.clone(),
                    status: EventOutcome::Accepted,
                    error_code: None,
                });
            }
            ApplyOutcome::Duplicate => {
                duplicate += 1;
                results.push(EventResult {
                    event_id: input.event_id.clone(),
                    status: EventOutcome::Duplicate,
                    error_code: None,
                });
            }
        }
    }

    Ok(IngestResponse {
        acked: accepted + duplicate,
        accepted,
        duplicate,
        rejected,
        server_ts,
        client_id: batch.client_id,
        session_id: batch.session_id,
        results,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> DecisionSchema {
        serde_json::from_value(json!({
            "version": 1,
            "choices": [{"id": "keep", "label": "Keep"}, {"id": "drop", "label": "Drop"}],
            "allow_notes": false
        }))
        .unwrap()
    }

    fn input(decision_id: &str, note: Option<&str>) -> EventInput {
        EventInput {
            event_id: Uuid::new_v4().to_string(),
            item_id: Uuid::new_v4().to_string(),
            decision_id: decision_id.into(),
            note: note.map(String::from),
            ts_client: 0,
        }
    }

    #[test]
    fn rejects_unknown_decision_id() {
        let err = validate_event(&input("maybe", None), &schema()).err().unwrap();
        let Rejection::Code(code) = err;
        assert_eq!(code, "invalid_decision_id");
    }

    #[test]
    fn rejects_note_when_notes_disabled() {
        let err = validate_event(&input("keep", Some("looks odd")), &schema())
            .err()
            .unwrap();
        let Rejection::Code(code) = err;
        assert_eq!(code, "invalid_note");
        // Empty notes are fine even when disabled.
        assert!(validate_event(&input("keep", Some("")), &schema()).is_ok());
    }

    #[test]
    fn rejects_oversized_note() {
        let mut schema = schema();
        schema.allow_notes = true;
        let long = "x".repeat(MAX_NOTE_LEN + 1);
        let err = validate_event(&input("keep", Some(&long)), &schema)
            .err()
            .unwrap();
        let Rejection::Code(code) = err;
        assert_eq!(code, "invalid_note");
    }

    #[test]
    fn rejects_malformed_ids() {
        let mut bad_event = input("keep", None);
        bad_event.event_id = "not-a-uuid".into();
        let Rejection::Code(code) = validate_event(&bad_event, &schema()).err().unwrap();
        assert_eq!(code, "invalid_event_id");

        let mut bad_item = input("keep", None);
        bad_item.item_id = "not-a-uuid".into();
        let Rejection::Code(code) = validate_event(&bad_item, &schema()).err().unwrap();
        assert_eq!(code, "unknown_item");
    }
}
