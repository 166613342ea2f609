//! Batch decision-event ingestion.

use axum::extract::{Extension, Path};
use axum::Json;
use uuid::Uuid;

use crate::common::auth::{Action, Caller};
use crate::common::ApiError;
use crate::domains::decisions::ingest::{ingest_batch, EventBatch, IngestResponse};

use super::{project_access, require_caller, AppState};

/// `POST /projects/{pid}/events` - idempotent, partial-success batch
/// ingest.
pub async fn post_events(
    Extension(state): Extension<AppState>,
    caller: Option<Extension<Caller>>,
    Path(project_id): Path<Uuid>,
    Json(batch): Json<EventBatch>,
) -> Result<Json<IngestResponse>, ApiError> {
    let caller = require_caller(caller)?;
    let (project, role) = project_access(&state, &caller, project_id).await?;
    if !role.allows(Action::WriteEvents, &project.org_policy()) {
        return Err(ApiError::Forbidden);
    }

    let response = ingest_batch(
        &state.kernel.store,
        &state.kernel.clock,
        state.kernel.settings.skew_window_ms,
        &project,
        caller.id,
        batch,
    )
    .await?;
    Ok(Json(response))
}
