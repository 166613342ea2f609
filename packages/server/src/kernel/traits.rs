//! Kernel traits: the transactional store contract and the identity
//! adapter. Implementations are selected by configuration at startup;
//! call sites only ever see the trait objects held by the kernel.

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use crate::common::auth::{Caller, Role};
use crate::domains::decisions::models::{ApplyOutcome, DecisionEvent, DecisionLatest};
use crate::domains::exports::models::{
    CancelOutcome, ExportFilters, ExportJob, ExportMode, ExportRow,
};
use crate::domains::items::models::ItemWithVariants;
use crate::domains::projects::models::Project;

/// Transactional persistence for all entities.
///
/// Every read excludes soft-deleted projects/items; `apply_event` is a
/// single atomic unit (idempotent append + latest recomputation); export
/// job status transitions enforce their preconditions inside the store so
/// concurrent owners cannot clobber each other.
#[async_trait]
pub trait Store: Send + Sync {
    /// Cheap connectivity check for the health endpoint.
    async fn ping(&self) -> Result<()>;

    // ---- projects ----
    async fn find_project(&self, project_id: Uuid) -> Result<Option<Project>>;
    async fn list_projects(&self, ids: &[Uuid]) -> Result<Vec<Project>>;

    // ---- items ----
    async fn list_items(
        &self,
        project_id: Uuid,
        after: Option<(String, Uuid)>,
        limit: i64,
    ) -> Result<Vec<ItemWithVariants>>;
    async fn get_item(&self, project_id: Uuid, item_id: Uuid) -> Result<Option<ItemWithVariants>>;
    async fn item_exists(&self, project_id: Uuid, item_id: Uuid) -> Result<bool>;

    // ---- decisions ----
    async fn apply_event(&self, event: &DecisionEvent) -> Result<ApplyOutcome>;
    async fn list_latest(
        &self,
        project_id: Uuid,
        user_id: Uuid,
        after: Option<(i64, Uuid)>,
        limit: i64,
    ) -> Result<Vec<DecisionLatest>>;
    /// Diagnostic: replay all events and rewrite the projection.
    async fn rebuild_latest(&self, project_id: Uuid) -> Result<u64>;

    // ---- export jobs ----
    async fn create_export_job(&self, job: &ExportJob) -> Result<()>;
    async fn get_export_job(&self, project_id: Uuid, id: Uuid) -> Result<Option<ExportJob>>;
    async fn list_export_jobs(
        &self,
        project_id: Uuid,
        requester: Option<Uuid>,
        after: Option<(i64, Uuid)>,
        limit: i64,
    ) -> Result<Vec<ExportJob>>;
    async fn count_active_export_jobs(&self, project_id: Uuid, requester: Uuid) -> Result<i64>;
    async fn cancel_export_job(&self, project_id: Uuid, id: Uuid) -> Result<CancelOutcome>;
    async fn claim_next_export_job(&self, snapshot_at: i64) -> Result<Option<ExportJob>>;
    async fn mark_export_ready(
        &self,
        id: Uuid,
        file_uri: &str,
        manifest: &serde_json::Value,
        expires_at: i64,
    ) -> Result<bool>;
    async fn mark_export_failed(&self, id: Uuid, error_code: &str) -> Result<()>;
    async fn expire_ready_jobs(&self, now_ms: i64) -> Result<u64>;
    /// Snapshot selection for the worker; observes a single consistent
    /// snapshot of the store.
    async fn fetch_export_rows(
        &self,
        project_id: Uuid,
        filters: &ExportFilters,
        mode: ExportMode,
    ) -> Result<Vec<ExportRow>>;
}

/// External identity adapter. The core consumes only this contract; token
/// validation and membership management live outside.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Resolve a bearer token to a caller, or None when unknown.
    async fn authenticate(&self, token: &str) -> Result<Option<Caller>>;
    /// Caller's role in a project, or None for non-members.
    async fn role_in(&self, caller_id: Uuid, project_id: Uuid) -> Result<Option<Role>>;
    /// Projects the caller is a member of.
    async fn project_ids_for(&self, caller_id: Uuid) -> Result<Vec<Uuid>>;
}
