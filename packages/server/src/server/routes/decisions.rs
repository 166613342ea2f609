//! Caller-scoped latest-decision reads.

use axum::extract::{Extension, Path, Query};
use axum::Json;
use serde::Serialize;
use uuid::Uuid;

use crate::common::auth::Caller;
use crate::common::cursor::{CursorKey, CursorView};
use crate::common::pagination::{trim_page, PageQuery, DECISION_PAGE};
use crate::common::ApiError;
use crate::domains::decisions::models::DecisionLatest;

use super::{project_access, require_caller, AppState};

#[derive(Serialize)]
pub struct DecisionPageResponse {
    pub decisions: Vec<DecisionLatest>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// `GET /projects/{pid}/decisions?cursor&limit` - the calling user's
/// latest decisions, ordered `(ts_server, item_id)`.
pub async fn list_decisions(
    Extension(state): Extension<AppState>,
    caller: Option<Extension<Caller>>,
    Path(project_id): Path<Uuid>,
    Query(page): Query<PageQuery>,
) -> Result<Json<DecisionPageResponse>, ApiError> {
    let caller = require_caller(caller)?;
    let (project, _role) = project_access(&state, &caller, project_id).await?;

    let now = state.kernel.clock.now_ms();
    let limit = DECISION_PAGE.clamp(page.limit);
    let after = match &page.cursor {
        Some(token) => match state.kernel.cursor.decode(CursorView::Decisions, token, now)? {
            CursorKey::Decisions { ts_server, item_id } => Some((ts_server, item_id)),
            _ => return Err(ApiError::InvalidCursor),
        },
        None => None,
    };

    let rows = state
        .kernel
        .store
        .list_latest(project.id, caller.id, after, limit + 1)
        .await
        .map_err(ApiError::Internal)?;
    let (decisions, has_more) = trim_page(rows, limit);

    let next_cursor = if has_more {
        decisions.last().map(|last| {
            state.kernel.cursor.encode(
                &CursorKey::Decisions {
                    ts_server: last.ts_server,
                    item_id: last.item_id,
                },
                now,
            )
        })
    } else {
        None
    };

    Ok(Json(DecisionPageResponse {
        decisions,
        next_cursor,
    }))
}
