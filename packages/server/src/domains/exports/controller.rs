//! Export job admission and cancellation.
//!
//! Admission validates the request against the decision schema era and the
//! effective field allowlist, then enforces the per-user concurrency cap
//! before persisting the job in `queued`. The worker picks it up from
//! there; the controller's only other transition is cancellation.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::common::id::new_id;
use crate::common::ApiError;
use crate::domains::projects::models::Project;
use crate::kernel::traits::Store;

use super::models::{
    CancelOutcome, ExportFilters, ExportFormat, ExportJob, ExportMode, ExportStatus, LabelPolicy,
};
use super::serialize::allowlist_violations;

/// Queued + running jobs one requester may hold per project.
pub const MAX_ACTIVE_PER_USER: i64 = 2;

#[derive(Debug, Clone, Deserialize)]
pub struct CreateExportRequest {
    #[serde(default = "default_mode")]
    pub mode: ExportMode,
    #[serde(default = "default_label_policy")]
    pub label_policy: LabelPolicy,
    #[serde(default)]
    pub format: ExportFormat,
    #[serde(default)]
    pub filters: ExportFilters,
    pub include_fields: Vec<String>,
}

fn default_mode() -> ExportMode {
    ExportMode::LabelsOnly
}

fn default_label_policy() -> LabelPolicy {
    LabelPolicy::LatestPerUser
}

/// Admit an export request; on success the job is persisted in `queued`.
pub async fn create_export(
    store: &Arc<dyn Store>,
    project: &Project,
    requester: Uuid,
    global_allowlist: &[String],
    request: CreateExportRequest,
) -> Result<ExportJob, ApiError> {
    if request.include_fields.is_empty() {
        return Err(ApiError::validation(
            "validation_error",
            "include_fields must not be empty",
        ));
    }

    let config = project.project_config();
    let effective = config
        .export_allowlist
        .as_deref()
        .unwrap_or(global_allowlist);
    let blocked = allowlist_violations(&request.include_fields, effective);
    if !blocked.is_empty() {
        return Err(ApiError::validation_with_details(
            "field_not_allowlisted",
            "include_fields contains fields outside the export allowlist",
            json!({ "fields": blocked }),
        ));
    }

    if let (Some(from), Some(to)) = (request.filters.from_ts, request.filters.to_ts) {
        if from > to {
            return Err(ApiError::validation(
                "validation_error",
                "filters.from_ts must not exceed filters.to_ts",
            ));
        }
    }

    let active = store
        .count_active_export_jobs(project.id, requester)
        .await
        .map_err(ApiError::Internal)?;
    if active >= MAX_ACTIVE_PER_USER {
        return Err(ApiError::rate_limited(format!(
            "at most {} concurrent exports per user",
            MAX_ACTIVE_PER_USER
        )));
    }

    let job = ExportJob {
        id: new_id(),
        project_id: project.id,
        requester,
        status: ExportStatus::Queued,
        mode: request.mode,
        label_policy: request.label_policy,
        format: request.format,
        filters: serde_json::to_value(&request.filters).map_err(|e| ApiError::Internal(e.into()))?,
        include_fields: request.include_fields,
        manifest: None,
        file_uri: None,
        error_code: None,
        snapshot_at: None,
        expires_at: None,
        created_at: chrono::Utc::now(),
        completed_at: None,
    };
    store
        .create_export_job(&job)
        .await
        .map_err(ApiError::Internal)?;
    Ok(job)
}

/// Idempotent cancellation. Ready artifacts conflict; already-terminal
/// jobs succeed without a transition.
pub async fn cancel_export(
    store: &Arc<dyn Store>,
    project_id: Uuid,
    export_id: Uuid,
) -> Result<(), ApiError> {
    match store
        .cancel_export_job(project_id, export_id)
        .await
        .map_err(ApiError::Internal)?
    {
        CancelOutcome::Cancelled | CancelOutcome::AlreadyFinished => Ok(()),
        CancelOutcome::Ready => Err(ApiError::conflict(
            "export is ready; completed artifacts cannot be cancelled",
        )),
        CancelOutcome::NotFound => Err(ApiError::NotFound),
    }
}
