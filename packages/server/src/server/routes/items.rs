//! Item catalog reads and signed-URL refresh.

use axum::extract::{Extension, Path, Query};
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::common::auth::Caller;
use crate::common::cursor::{CursorKey, CursorView};
use crate::common::pagination::{trim_page, PageQuery, ITEM_PAGE};
use crate::common::ApiError;
use crate::domains::items::models::ItemWithVariants;
use crate::kernel::storage::ResolvedUrl;

use super::{project_access, require_caller, AppState};

#[derive(Serialize)]
pub struct ItemPageResponse {
    pub items: Vec<ItemWithVariants>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// `GET /projects/{pid}/items?cursor&limit` - stable `(sort_key, item_id)`
/// pages with variants eagerly loaded.
pub async fn list_items(
    Extension(state): Extension<AppState>,
    caller: Option<Extension<Caller>>,
    Path(project_id): Path<Uuid>,
    Query(page): Query<PageQuery>,
) -> Result<Json<ItemPageResponse>, ApiError> {
    let caller = require_caller(caller)?;
    let (project, _role) = project_access(&state, &caller, project_id).await?;

    let now = state.kernel.clock.now_ms();
    let limit = ITEM_PAGE.clamp(page.limit);
    let after = match &page.cursor {
        Some(token) => match state.kernel.cursor.decode(CursorView::Items, token, now)? {
            CursorKey::Items { sort_key, item_id } => Some((sort_key, item_id)),
            _ => return Err(ApiError::InvalidCursor),
        },
        None => None,
    };

    let rows = state
        .kernel
        .store
        .list_items(project.id, after, limit + 1)
        .await
        .map_err(ApiError::Internal)?;
    let (items, has_more) = trim_page(rows, limit);

    let next_cursor = if has_more {
        items.last().map(|last| {
            state.kernel.cursor.encode(
                &CursorKey::Items {
                    sort_key: last.item.sort_key.clone(),
                    item_id: last.item.id,
                },
                now,
            )
        })
    } else {
        None
    };

    Ok(Json(ItemPageResponse { items, next_cursor }))
}

/// `GET /projects/{pid}/items/{iid}` - single-item hydration for deep
/// links.
pub async fn get_item(
    Extension(state): Extension<AppState>,
    caller: Option<Extension<Caller>>,
    Path((project_id, item_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<ItemWithVariants>, ApiError> {
    let caller = require_caller(caller)?;
    let (project, _role) = project_access(&state, &caller, project_id).await?;
    let item = state
        .kernel
        .store
        .get_item(project.id, item_id)
        .await
        .map_err(ApiError::Internal)?
        .ok_or(ApiError::NotFound)?;
    Ok(Json(item))
}

#[derive(Debug, Deserialize)]
pub struct UrlQuery {
    pub variant_key: Option<String>,
}

/// `GET /projects/{pid}/items/{iid}/url?variant_key=` - mint a fresh
/// browser URL for the item or one of its variants.
pub async fn refresh_url(
    Extension(state): Extension<AppState>,
    caller: Option<Extension<Caller>>,
    Path((project_id, item_id)): Path<(Uuid, Uuid)>,
    Query(query): Query<UrlQuery>,
) -> Result<Json<ResolvedUrl>, ApiError> {
    let caller = require_caller(caller)?;
    let (project, _role) = project_access(&state, &caller, project_id).await?;
    let item = state
        .kernel
        .store
        .get_item(project.id, item_id)
        .await
        .map_err(ApiError::Internal)?
        .ok_or(ApiError::NotFound)?;

    let logical_uri = match &query.variant_key {
        Some(key) => item.variant(key).ok_or(ApiError::NotFound)?.logical_uri.clone(),
        None => item.item.logical_uri.clone(),
    };

    let resolved = state
        .kernel
        .resolver
        .resolve(
            &logical_uri,
            state.kernel.settings.url_ttl_ms,
            state.kernel.clock.now_ms(),
        )
        .await
        .map_err(ApiError::Internal)?;
    Ok(Json(resolved))
}
