//! Project listing and project configuration.

use axum::extract::{Extension, Path};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use crate::common::auth::Caller;
use crate::common::ApiError;
use crate::domains::projects::models::{Project, MAX_COMPARE_VARIANTS};

use super::{project_access, require_caller, AppState};

#[derive(Serialize)]
pub struct ProjectSummary {
    pub id: Uuid,
    pub org_id: Uuid,
    pub slug: String,
    pub created_at: DateTime<Utc>,
}

impl From<&Project> for ProjectSummary {
    fn from(p: &Project) -> Self {
        Self {
            id: p.id,
            org_id: p.org_id,
            slug: p.slug.clone(),
            created_at: p.created_at,
        }
    }
}

#[derive(Serialize)]
pub struct ProjectListResponse {
    pub projects: Vec<ProjectSummary>,
}

/// `GET /projects` - projects visible to the caller.
pub async fn list_projects(
    Extension(state): Extension<AppState>,
    caller: Option<Extension<Caller>>,
) -> Result<Json<ProjectListResponse>, ApiError> {
    let caller = require_caller(caller)?;
    let ids = state
        .kernel
        .identity
        .project_ids_for(caller.id)
        .await
        .map_err(ApiError::Internal)?;
    let projects = state
        .kernel
        .store
        .list_projects(&ids)
        .await
        .map_err(ApiError::Internal)?;
    Ok(Json(ProjectListResponse {
        projects: projects.iter().map(ProjectSummary::from).collect(),
    }))
}

/// `GET /projects/{pid}/config` - project, decision schema, and the client
/// capability flags.
pub async fn get_config(
    Extension(state): Extension<AppState>,
    caller: Option<Extension<Caller>>,
    Path(project_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let caller = require_caller(caller)?;
    let (project, _role) = project_access(&state, &caller, project_id).await?;
    let config = project.project_config();

    Ok(Json(json!({
        "project": ProjectSummary::from(&project),
        "decision_schema": project.decision_schema,
        "media_types_supported": config.media_types_supported,
        "variants_enabled": config.variants_enabled,
        "variant_navigation_mode": config.variant_navigation_mode,
        "compare_mode_enabled": config.compare_mode_enabled,
        "max_compare_variants": MAX_COMPARE_VARIANTS,
    })))
}
