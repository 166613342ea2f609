//! Export job endpoints: create, inspect, list, cancel.
//!
//! Job creation and download-URL issuance are audited with the request id,
//! project, caller, and export id.

use axum::extract::{Extension, Path, Query};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::common::auth::{Action, Caller, Role};
use crate::common::cursor::{CursorKey, CursorView};
use crate::common::pagination::{trim_page, PageQuery, EXPORT_PAGE};
use crate::common::ApiError;
use crate::domains::exports::controller::{cancel_export as cancel_job, create_export, CreateExportRequest};
use crate::domains::exports::models::{ExportJob, ExportStatus};
use crate::server::middleware::RequestId;

use super::{project_access, require_caller, AppState};

#[derive(Serialize)]
pub struct ExportJobView {
    pub export_id: Uuid,
    pub status: ExportStatus,
    pub mode: crate::domains::exports::models::ExportMode,
    pub label_policy: crate::domains::exports::models::LabelPolicy,
    pub format: crate::domains::exports::models::ExportFormat,
    pub filters: serde_json::Value,
    pub include_fields: Vec<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

impl From<&ExportJob> for ExportJobView {
    fn from(job: &ExportJob) -> Self {
        Self {
            export_id: job.id,
            status: job.status,
            mode: job.mode,
            label_policy: job.label_policy,
            format: job.format,
            filters: job.filters.clone(),
            include_fields: job.include_fields.clone(),
            created_at: job.created_at,
            completed_at: job.completed_at,
            snapshot_at: job.snapshot_at,
            expires_at: job.expires_at,
            error_code: job.error_code.clone(),
        }
    }
}

#[derive(Serialize)]
pub struct ExportDetailResponse {
    #[serde(flatten)]
    pub job: ExportJobView,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manifest: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url_expires_at: Option<i64>,
}

#[derive(Serialize)]
pub struct ExportPageResponse {
    pub exports: Vec<ExportJobView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

#[derive(Serialize)]
pub struct ExportCreatedResponse {
    pub export_id: Uuid,
    pub status: ExportStatus,
}

fn request_id(rid: &Option<Extension<RequestId>>) -> String {
    rid.as_ref()
        .map(|Extension(r)| r.0.clone())
        .unwrap_or_default()
}

/// `POST /projects/{pid}/exports` - admit an export job.
pub async fn post_export(
    Extension(state): Extension<AppState>,
    caller: Option<Extension<Caller>>,
    rid: Option<Extension<RequestId>>,
    Path(project_id): Path<Uuid>,
    Json(request): Json<CreateExportRequest>,
) -> Result<Json<ExportCreatedResponse>, ApiError> {
    let caller = require_caller(caller)?;
    let (project, role) = project_access(&state, &caller, project_id).await?;
    if !role.allows(Action::CreateExport, &project.org_policy()) {
        return Err(ApiError::Forbidden);
    }

    let job = create_export(
        &state.kernel.store,
        &project,
        caller.id,
        &state.kernel.settings.export_allowlist,
        request,
    )
    .await?;

    info!(
        request_id = %request_id(&rid),
        project_id = %project.id,
        user_id = %caller.id,
        export_id = %job.id,
        action = "export_create",
        "export audit"
    );
    Ok(Json(ExportCreatedResponse {
        export_id: job.id,
        status: job.status,
    }))
}

/// `GET /projects/{pid}/exports/{eid}` - status, manifest, and a download
/// URL once ready; `410 export_expired` past the artifact TTL.
pub async fn get_export(
    Extension(state): Extension<AppState>,
    caller: Option<Extension<Caller>>,
    rid: Option<Extension<RequestId>>,
    Path((project_id, export_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<ExportDetailResponse>, ApiError> {
    let caller = require_caller(caller)?;
    let (project, role) = project_access(&state, &caller, project_id).await?;
    let job = state
        .kernel
        .store
        .get_export_job(project.id, export_id)
        .await
        .map_err(ApiError::Internal)?
        .ok_or(ApiError::NotFound)?;
    // Jobs the caller may not see read as absent.
    if job.requester != caller.id && !role.allows(Action::ReadOthersExports, &project.org_policy())
    {
        return Err(ApiError::NotFound);
    }

    let now = state.kernel.clock.now_ms();
    let expired = job.status == ExportStatus::Expired
        || (job.status == ExportStatus::Ready
            && job.expires_at.map(|e| e <= now).unwrap_or(false));
    if expired {
        return Err(ApiError::Gone {
            code: "export_expired",
            message: "export artifact has expired; create a new export".into(),
        });
    }

    let mut response = ExportDetailResponse {
        job: ExportJobView::from(&job),
        manifest: job.manifest.clone(),
        download_url: None,
        download_url_expires_at: None,
    };

    if job.status == ExportStatus::Ready {
        if let Some(file_uri) = &job.file_uri {
            let resolved = state
                .kernel
                .resolver
                .resolve(file_uri, state.kernel.settings.url_ttl_ms, now)
                .await
                .map_err(ApiError::Internal)?;
            info!(
                request_id = %request_id(&rid),
                project_id = %project.id,
                user_id = %caller.id,
                export_id = %job.id,
                action = "export_download_url",
                "export audit"
            );
            response.download_url = Some(resolved.url);
            response.download_url_expires_at = resolved.expires_at;
        }
    }
    Ok(Json(response))
}

/// `GET /projects/{pid}/exports?cursor&limit` - export jobs, newest first.
pub async fn list_exports(
    Extension(state): Extension<AppState>,
    caller: Option<Extension<Caller>>,
    Path(project_id): Path<Uuid>,
    Query(page): Query<PageQuery>,
) -> Result<Json<ExportPageResponse>, ApiError> {
    let caller = require_caller(caller)?;
    let (project, role) = project_access(&state, &caller, project_id).await?;
    let requester = if role.allows(Action::ReadOthersExports, &project.org_policy()) {
        None
    } else {
        Some(caller.id)
    };

    let now = state.kernel.clock.now_ms();
    let limit = EXPORT_PAGE.clamp(page.limit);
    let after = match &page.cursor {
        Some(token) => match state.kernel.cursor.decode(CursorView::Exports, token, now)? {
            CursorKey::Exports { created_at, id } => Some((created_at, id)),
            _ => return Err(ApiError::InvalidCursor),
        },
        None => None,
    };

    let rows = state
        .kernel
        .store
        .list_export_jobs(project.id, requester, after, limit + 1)
        .await
        .map_err(ApiError::Internal)?;
    let (jobs, has_more) = trim_page(rows, limit);

    let next_cursor = if has_more {
        jobs.last().map(|last| {
            state.kernel.cursor.encode(
                &CursorKey::Exports {
                    created_at: last.created_at.timestamp_millis(),
                    id: last.id,
                },
                now,
            )
        })
    } else {
        None
    };

    Ok(Json(ExportPageResponse {
        exports: jobs.iter().map(ExportJobView::from).collect(),
        next_cursor,
    }))
}

/// `DELETE /projects/{pid}/exports/{eid}` - idempotent cancellation.
pub async fn delete_export(
    Extension(state): Extension<AppState>,
    caller: Option<Extension<Caller>>,
    rid: Option<Extension<RequestId>>,
    Path((project_id, export_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let caller = require_caller(caller)?;
    let (project, role) = project_access(&state, &caller, project_id).await?;
    let job = state
        .kernel
        .store
        .get_export_job(project.id, export_id)
        .await
        .map_err(ApiError::Internal)?
        .ok_or(ApiError::NotFound)?;

    // Admins may cancel anyone's job; everyone else only their own, and
    // only when policy lets them create exports at all.
    let allowed = role == Role::Admin
        || (job.requester == caller.id
            && role.allows(Action::CancelOwnExport, &project.org_policy()));
    if !allowed {
        if job.requester != caller.id
            && !role.allows(Action::ReadOthersExports, &project.org_policy())
        {
            return Err(ApiError::NotFound);
        }
        return Err(ApiError::Forbidden);
    }

    cancel_job(&state.kernel.store, project.id, export_id).await?;
    info!(
        request_id = %request_id(&rid),
        project_id = %project.id,
        user_id = %caller.id,
        export_id = %export_id,
        action = "export_cancel",
        "export audit"
    );
    Ok(Json(serde_json::json!({ "export_id": export_id, "status": "cancelled" })))
}
