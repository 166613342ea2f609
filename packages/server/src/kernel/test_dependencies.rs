//! In-memory implementations of the kernel traits for tests.
//!
//! `MemoryStore` mirrors the Postgres semantics closely enough to exercise
//! ingestion, queries, and the export pipeline without a database: the
//! same soft-delete predicates, the same idempotency key, the same
//! conditional winner upsert.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

use anyhow::{bail, Result};
use async_trait::async_trait;
use uuid::Uuid;

use crate::common::auth::{Caller, Role};
use crate::common::id::Clock;
use crate::domains::decisions::models::{ApplyOutcome, DecisionEvent, DecisionLatest};
use crate::domains::exports::models::{
    CancelOutcome, ExportFilters, ExportJob, ExportMode, ExportRow, ExportStatus, ERROR_CANCELLED,
};
use crate::domains::items::models::ItemWithVariants;
use crate::domains::projects::models::Project;

use super::storage::ArtifactStore;
use super::traits::{IdentityProvider, Store};

// =============================================================================
// Manual clock
// =============================================================================

/// Fixed clock driven by tests.
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn at(now_ms: i64) -> Self {
        Self {
            now: AtomicI64::new(now_ms),
        }
    }

    pub fn set(&self, now_ms: i64) {
        self.now.store(now_ms, Ordering::SeqCst);
    }

    pub fn advance(&self, delta_ms: i64) {
        self.now.fetch_add(delta_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

// =============================================================================
// Memory store
// =============================================================================

#[derive(Default)]
struct MemoryInner {
    projects: HashMap<Uuid, Project>,
    items: HashMap<Uuid, ItemWithVariants>,
    events: Vec<DecisionEvent>,
    event_keys: HashSet<(Uuid, Uuid, Uuid)>,
    latest: HashMap<(Uuid, Uuid, Uuid), DecisionLatest>,
    jobs: HashMap<Uuid, ExportJob>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_project(&self, project: Project) {
        self.inner
            .lock()
            .unwrap()
            .projects
            .insert(project.id, project);
    }

    pub fn add_item(&self, item: ItemWithVariants) {
        self.inner.lock().unwrap().items.insert(item.item.id, item);
    }

    pub fn soft_delete_item(&self, item_id: Uuid) {
        if let Some(item) = self.inner.lock().unwrap().items.get_mut(&item_id) {
            item.item.deleted_at = Some(chrono::Utc::now());
        }
    }

    /// Direct projection access for assertions.
    pub fn latest_for(
        &self,
        project_id: Uuid,
        user_id: Uuid,
        item_id: Uuid,
    ) -> Option<DecisionLatest> {
        self.inner
            .lock()
            .unwrap()
            .latest
            .get(&(project_id, user_id, item_id))
            .cloned()
    }

    pub fn event_count(&self) -> usize {
        self.inner.lock().unwrap().events.len()
    }

    pub fn job(&self, id: Uuid) -> Option<ExportJob> {
        self.inner.lock().unwrap().jobs.get(&id).cloned()
    }

    fn item_live(inner: &MemoryInner, project_id: Uuid, item_id: Uuid) -> bool {
        inner
            .items
            .get(&item_id)
            .map(|i| i.item.project_id == project_id && i.item.deleted_at.is_none())
            .unwrap_or(false)
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn find_project(&self, project_id: Uuid) -> Result<Option<Project>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .projects
            .get(&project_id)
            .filter(|p| p.deleted_at.is_none())
            .cloned())
    }

    async fn list_projects(&self, ids: &[Uuid]) -> Result<Vec<Project>> {
        let inner = self.inner.lock().unwrap();
        let mut projects: Vec<Project> = ids
            .iter()
            .filter_map(|id| inner.projects.get(id))
            .filter(|p| p.deleted_at.is_none())
            .cloned()
            .collect();
        projects.sort_by(|a, b| a.slug.cmp(&b.slug));
        Ok(projects)
    }

    async fn list_items(
        &self,
        project_id: Uuid,
        after: Option<(String, Uuid)>,
        limit: i64,
    ) -> Result<Vec<ItemWithVariants>> {
        let inner = self.inner.lock().unwrap();
        let mut items: Vec<ItemWithVariants> = inner
            .items
            .values()
            .filter(|i| i.item.project_id == project_id && i.item.deleted_at.is_none())
            .cloned()
            .collect();
        items.sort_by(|a, b| {
            (a.item.sort_key.as_str(), a.item.id).cmp(&(b.item.sort_key.as_str(), b.item.id))
        });
        let items = items
            .into_iter()
            .filter(|i| match &after {
                Some((sort_key, item_id)) => {
                    (i.item.sort_key.as_str(), i.item.id) > (sort_key.as_str(), *item_id)
                }
                None => true,
            })
            .take(limit as usize)
            .collect();
        Ok(items)
    }

    async fn get_item(&self, project_id: Uuid, item_id: Uuid) -> Result<Option<ItemWithVariants>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .items
            .get(&item_id)
            .filter(|i| i.item.project_id == project_id && i.item.deleted_at.is_none())
            .cloned())
    }

    async fn item_exists(&self, project_id: Uuid, item_id: Uuid) -> Result<bool> {
        let inner = self.inner.lock().unwrap();
        Ok(Self::item_live(&inner, project_id, item_id))
    }

    async fn apply_event(&self, event: &DecisionEvent) -> Result<ApplyOutcome> {
        let mut inner = self.inner.lock().unwrap();
        let idempotency_key = (event.project_id, event.user_id, event.event_id);
        if !inner.event_keys.insert(idempotency_key) {
            return Ok(ApplyOutcome::Duplicate);
        }
        inner.events.push(event.clone());

        let triple = (event.project_id, event.user_id, event.item_id);
        let outranks_incumbent = match inner.latest.get(&triple) {
            Some(current) => {
                (event.ts_client_effective, event.ts_server, event.event_id)
                    > (current.ts_client_effective, current.ts_server, current.event_id)
            }
            None => true,
        };
        if outranks_incumbent {
            inner.latest.insert(triple, DecisionLatest::from_event(event));
        }
        Ok(ApplyOutcome::Accepted)
    }

    async fn list_latest(
        &self,
        project_id: Uuid,
        user_id: Uuid,
        after: Option<(i64, Uuid)>,
        limit: i64,
    ) -> Result<Vec<DecisionLatest>> {
        let inner = self.inner.lock().unwrap();
        let mut rows: Vec<DecisionLatest> = inner
            .latest
            .values()
            .filter(|l| l.project_id == project_id && l.user_id == user_id)
            .filter(|l| Self::item_live(&inner, project_id, l.item_id))
            .cloned()
            .collect();
        rows.sort_by_key(|l| (l.ts_server, l.item_id));
        let rows = rows
            .into_iter()
            .filter(|l| match after {
                Some((ts_server, item_id)) => (l.ts_server, l.item_id) > (ts_server, item_id),
                None => true,
            })
            .take(limit as usize)
            .collect();
        Ok(rows)
    }

    async fn rebuild_latest(&self, project_id: Uuid) -> Result<u64> {
        let mut inner = self.inner.lock().unwrap();
        let events: Vec<DecisionEvent> = inner
            .events
            .iter()
            .filter(|e| e.project_id == project_id)
            .cloned()
            .collect();
        let winners = DecisionLatest::project_winners(&events);
        inner.latest.retain(|key, _| key.0 != project_id);
        let count = winners.len() as u64;
        for (key, event) in winners {
            inner.latest.insert(key, DecisionLatest::from_event(&event));
        }
        Ok(count)
    }

    async fn create_export_job(&self, job: &ExportJob) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.jobs.contains_key(&job.id) {
            bail!("duplicate export job id {}", job.id);
        }
        inner.jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn get_export_job(&self, project_id: Uuid, id: Uuid) -> Result<Option<ExportJob>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .jobs
            .get(&id)
            .filter(|j| j.project_id == project_id)
            .cloned())
    }

    async fn list_export_jobs(
        &self,
        project_id: Uuid,
        requester: Option<Uuid>,
        after: Option<(i64, Uuid)>,
        limit: i64,
    ) -> Result<Vec<ExportJob>> {
        let inner = self.inner.lock().unwrap();
        let mut jobs: Vec<ExportJob> = inner
            .jobs
            .values()
            .filter(|j| j.project_id == project_id)
            .filter(|j| requester.map(|r| j.requester == r).unwrap_or(true))
            .cloned()
            .collect();
        jobs.sort_by_key(|j| std::cmp::Reverse((j.created_at.timestamp_millis(), j.id)));
        let jobs = jobs
            .into_iter()
            .filter(|j| match after {
                Some((created_at_ms, id)) => {
                    (j.created_at.timestamp_millis(), j.id) < (created_at_ms, id)
                }
                None => true,
            })
            .take(limit as usize)
            .collect();
        Ok(jobs)
    }

    async fn count_active_export_jobs(&self, project_id: Uuid, requester: Uuid) -> Result<i64> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .jobs
            .values()
            .filter(|j| {
                j.project_id == project_id
                    && j.requester == requester
                    && matches!(j.status, ExportStatus::Queued | ExportStatus::Running)
            })
            .count() as i64)
    }

    async fn cancel_export_job(&self, project_id: Uuid, id: Uuid) -> Result<CancelOutcome> {
        let mut inner = self.inner.lock().unwrap();
        let Some(job) = inner.jobs.get_mut(&id).filter(|j| j.project_id == project_id) else {
            return Ok(CancelOutcome::NotFound);
        };
        match job.status {
            ExportStatus::Queued | ExportStatus::Running => {
                job.status = ExportStatus::Failed;
                job.error_code = Some(ERROR_CANCELLED.to_string());
                job.completed_at = Some(chrono::Utc::now());
                Ok(CancelOutcome::Cancelled)
            }
            ExportStatus::Ready => Ok(CancelOutcome::Ready),
            ExportStatus::Failed | ExportStatus::Expired => Ok(CancelOutcome::AlreadyFinished),
        }
    }

    async fn claim_next_export_job(&self, snapshot_at: i64) -> Result<Option<ExportJob>> {
        let mut inner = self.inner.lock().unwrap();
        let next = inner
            .jobs
            .values()
            .filter(|j| j.status == ExportStatus::Queued)
            .min_by_key(|j| (j.created_at, j.id))
            .map(|j| j.id);
        let Some(id) = next else {
            return Ok(None);
        };
        let job = inner.jobs.get_mut(&id).expect("job exists");
        job.status = ExportStatus::Running;
        job.snapshot_at = Some(snapshot_at);
        Ok(Some(job.clone()))
    }

    async fn mark_export_ready(
        &self,
        id: Uuid,
        file_uri: &str,
        manifest: &serde_json::Value,
        expires_at: i64,
    ) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap();
        let Some(job) = inner.jobs.get_mut(&id) else {
            return Ok(false);
        };
        if job.status != ExportStatus::Running {
            return Ok(false);
        }
        job.status = ExportStatus::Ready;
        job.file_uri = Some(file_uri.to_string());
        job.manifest = Some(manifest.clone());
        job.expires_at = Some(expires_at);
        job.completed_at = Some(chrono::Utc::now());
        Ok(true)
    }

    async fn mark_export_failed(&self, id: Uuid, error_code: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(job) = inner.jobs.get_mut(&id) {
            if job.status == ExportStatus::Running {
                job.status = ExportStatus::Failed;
                job.error_code = Some(error_code.to_string());
                job.completed_at = Some(chrono::Utc::now());
            }
        }
        Ok(())
    }

    async fn expire_ready_jobs(&self, now_ms: i64) -> Result<u64> {
        let mut inner = self.inner.lock().unwrap();
        let mut expired = 0;
        for job in inner.jobs.values_mut() {
            if job.status == ExportStatus::Ready
                && job.expires_at.map(|e| e <= now_ms).unwrap_or(false)
            {
                job.status = ExportStatus::Expired;
                expired += 1;
            }
        }
        Ok(expired)
    }

    async fn fetch_export_rows(
        &self,
        project_id: Uuid,
        filters: &ExportFilters,
        mode: ExportMode,
    ) -> Result<Vec<ExportRow>> {
        let inner = self.inner.lock().unwrap();
        let mut rows = Vec::new();
        let mut labeled_items: HashSet<Uuid> = HashSet::new();

        for latest in inner.latest.values() {
            if latest.project_id != project_id {
                continue;
            }
            labeled_items.insert(latest.item_id);
            if !Self::item_live(&inner, project_id, latest.item_id) {
                continue;
            }
            if let Some(ids) = &filters.decision_ids {
                if !ids.contains(&latest.decision_id) {
                    continue;
                }
            }
            if filters.from_ts.map(|t| latest.ts_server < t).unwrap_or(false) {
                continue;
            }
            if filters.to_ts.map(|t| latest.ts_server > t).unwrap_or(false) {
                continue;
            }
            if let Some(users) = &filters.user_ids {
                if !users.contains(&latest.user_id) {
                    continue;
                }
            }
            let item = &inner.items[&latest.item_id].item;
            rows.push(ExportRow {
                item_id: item.id,
                external_id: item.external_id.clone(),
                media_type: item.media_type.as_str().to_string(),
                logical_uri: item.logical_uri.clone(),
                sort_key: item.sort_key.clone(),
                item_metadata: item.metadata.clone(),
                user_id: Some(latest.user_id),
                event_id: Some(latest.event_id),
                decision_id: Some(latest.decision_id.clone()),
                note: latest.note.clone(),
                ts_client: Some(latest.ts_client),
                ts_client_effective: Some(latest.ts_client_effective),
                ts_server: Some(latest.ts_server),
            });
        }

        if mode == ExportMode::LabelsPlusUnlabeled {
            for item in inner.items.values() {
                let item = &item.item;
                if item.project_id != project_id
                    || item.deleted_at.is_some()
                    || labeled_items.contains(&item.id)
                {
                    continue;
                }
                rows.push(ExportRow {
                    item_id: item.id,
                    external_id: item.external_id.clone(),
                    media_type: item.media_type.as_str().to_string(),
                    logical_uri: item.logical_uri.clone(),
                    sort_key: item.sort_key.clone(),
                    item_metadata: item.metadata.clone(),
                    user_id: None,
                    event_id: None,
                    decision_id: None,
                    note: None,
                    ts_client: None,
                    ts_client_effective: None,
                    ts_server: None,
                });
            }
        }

        rows.retain(|row| row.matches_metadata(filters));
        Ok(rows)
    }
}

// =============================================================================
// Memory artifact store
// =============================================================================

/// Records published artifacts for assertions.
#[derive(Default)]
pub struct MemoryArtifactStore {
    files: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.files.lock().unwrap().get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        self.files.lock().unwrap().keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.files.lock().unwrap().is_empty()
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<String> {
        self.files
            .lock()
            .unwrap()
            .insert(key.to_string(), bytes.to_vec());
        Ok(format!("storage://{}", key))
    }
}

// =============================================================================
// Static identity
// =============================================================================

/// Identity provider with a fixed token and membership table.
#[derive(Default)]
pub struct StaticIdentity {
    tokens: HashMap<String, Caller>,
    roles: HashMap<(Uuid, Uuid), Role>,
}

impl StaticIdentity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(mut self, token: &str, caller: Caller) -> Self {
        self.tokens.insert(token.to_string(), caller);
        self
    }

    pub fn with_role(mut self, caller_id: Uuid, project_id: Uuid, role: Role) -> Self {
        self.roles.insert((caller_id, project_id), role);
        self
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentity {
    async fn authenticate(&self, token: &str) -> Result<Option<Caller>> {
        Ok(self.tokens.get(token).cloned())
    }

    async fn role_in(&self, caller_id: Uuid, project_id: Uuid) -> Result<Option<Role>> {
        Ok(self.roles.get(&(caller_id, project_id)).copied())
    }

    async fn project_ids_for(&self, caller_id: Uuid) -> Result<Vec<Uuid>> {
        let mut ids: Vec<Uuid> = self
            .roles
            .keys()
            .filter(|(caller, _)| *caller == caller_id)
            .map(|(_, project)| *project)
            .collect();
        ids.sort();
        Ok(ids)
    }
}
