//! HTTP route handlers for the `/api/v1` surface.

pub mod decisions;
pub mod events;
pub mod exports;
pub mod health;
pub mod items;
pub mod projects;

use std::sync::Arc;

use axum::extract::Extension;
use uuid::Uuid;

use crate::common::auth::{Caller, Role};
use crate::common::ApiError;
use crate::domains::projects::models::Project;
use crate::kernel::ServerKernel;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub kernel: Arc<ServerKernel>,
}

/// Require an authenticated caller; absent identity is 401.
pub(crate) fn require_caller(caller: Option<Extension<Caller>>) -> Result<Caller, ApiError> {
    caller
        .map(|Extension(c)| c)
        .ok_or(ApiError::Unauthorized)
}

/// Resolve the caller's access to a project.
///
/// Non-membership and missing/soft-deleted projects are both 404 so
/// outsiders cannot enumerate project ids.
pub(crate) async fn project_access(
    state: &AppState,
    caller: &Caller,
    project_id: Uuid,
) -> Result<(Project, Role), ApiError> {
    let role = state
        .kernel
        .identity
        .role_in(caller.id, project_id)
        .await
        .map_err(ApiError::Internal)?
        .ok_or(ApiError::NotFound)?;
    let project = state
        .kernel
        .store
        .find_project(project_id)
        .await
        .map_err(ApiError::Internal)?
        .ok_or(ApiError::NotFound)?;
    Ok((project, role))
}
