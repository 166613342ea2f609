//! PostgreSQL implementation of the store contract.
//!
//! Thin delegation layer: the SQL itself lives with the models. Every
//! soft-delete predicate and status precondition is inside those queries,
//! so no caller can bypass them. Transient failures (lost connections,
//! pool exhaustion, serialization conflicts) are retried with bounded
//! attempts before the error surfaces; every model operation here is safe
//! to re-issue because the unique constraints and status-guarded UPDATEs
//! make a replayed call a no-op.

use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::domains::decisions::models::{ApplyOutcome, DecisionEvent, DecisionLatest};
use crate::domains::exports::models::{
    CancelOutcome, ExportFilters, ExportJob, ExportMode, ExportRow,
};
use crate::domains::items::models::{Item, ItemWithVariants};
use crate::domains::projects::models::Project;

use super::traits::Store;

const MAX_ATTEMPTS: u32 = 3;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(50);

/// Classify an error as transient (worth a retry) or terminal.
///
/// Transient: I/O failures, pool checkout timeouts, and the SQLSTATE
/// classes for serialization conflicts (40001), deadlocks (40P01),
/// connection exceptions (08xxx), and a database that is starting up or
/// momentarily out of slots (57P03, 53300).
fn is_transient_error(err: &anyhow::Error) -> bool {
    let Some(sqlx_err) = err.downcast_ref::<sqlx::Error>() else {
        return false;
    };
    match sqlx_err {
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut => true,
        sqlx::Error::Database(db) => {
            let code = db.code();
            let code = code.as_deref().unwrap_or("");
            matches!(code, "40001" | "40P01" | "57P03" | "53300") || code.starts_with("08")
        }
        _ => false,
    }
}

/// Run `op` with bounded retries and exponential backoff on transient
/// errors. Terminal errors and exhausted attempts propagate to the caller,
/// where the HTTP boundary surfaces them as 500.
async fn with_retry<T, F, Fut>(op_name: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < MAX_ATTEMPTS && is_transient_error(&err) => {
                tracing::warn!(
                    op = op_name,
                    attempt,
                    error = %err,
                    "transient store failure; retrying"
                );
                tokio::time::sleep(RETRY_BASE_DELAY * 2u32.pow(attempt - 1)).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Store for PgStore {
    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn find_project(&self, project_id: Uuid) -> Result<Option<Project>> {
        with_retry("find_project", || Project::find_live(project_id, &self.pool)).await
    }

    async fn list_projects(&self, ids: &[Uuid]) -> Result<Vec<Project>> {
        with_retry("list_projects", || Project::find_live_by_ids(ids, &self.pool)).await
    }

    async fn list_items(
        &self,
        project_id: Uuid,
        after: Option<(String, Uuid)>,
        limit: i64,
    ) -> Result<Vec<ItemWithVariants>> {
        with_retry("list_items", || {
            Item::list_page(project_id, after.clone(), limit, &self.pool)
        })
        .await
    }

    async fn get_item(&self, project_id: Uuid, item_id: Uuid) -> Result<Option<ItemWithVariants>> {
        with_retry("get_item", || Item::find_live(project_id, item_id, &self.pool)).await
    }

    async fn item_exists(&self, project_id: Uuid, item_id: Uuid) -> Result<bool> {
        with_retry("item_exists", || {
            Item::exists_live(project_id, item_id, &self.pool)
        })
        .await
    }

    async fn apply_event(&self, event: &DecisionEvent) -> Result<ApplyOutcome> {
        // Safe to replay: a retried commit that already landed reports
        // Duplicate via the idempotency key.
        with_retry("apply_event", || DecisionEvent::apply(event, &self.pool)).await
    }

    async fn list_latest(
        &self,
        project_id: Uuid,
        user_id: Uuid,
        after: Option<(i64, Uuid)>,
        limit: i64,
    ) -> Result<Vec<DecisionLatest>> {
        with_retry("list_latest", || {
            DecisionLatest::list_page(project_id, user_id, after, limit, &self.pool)
        })
        .await
    }

    async fn rebuild_latest(&self, project_id: Uuid) -> Result<u64> {
        with_retry("rebuild_latest", || {
            DecisionLatest::rebuild(project_id, &self.pool)
        })
        .await
    }

    async fn create_export_job(&self, job: &ExportJob) -> Result<()> {
        with_retry("create_export_job", || job.insert(&self.pool)).await
    }

    async fn get_export_job(&self, project_id: Uuid, id: Uuid) -> Result<Option<ExportJob>> {
        with_retry("get_export_job", || ExportJob::find(project_id, id, &self.pool)).await
    }

    async fn list_export_jobs(
        &self,
        project_id: Uuid,
        requester: Option<Uuid>,
        after: Option<(i64, Uuid)>,
        limit: i64,
    ) -> Result<Vec<ExportJob>> {
        with_retry("list_export_jobs", || {
            ExportJob::list_page(project_id, requester, after, limit, &self.pool)
        })
        .await
    }

    async fn count_active_export_jobs(&self, project_id: Uuid, requester: Uuid) -> Result<i64> {
        with_retry("count_active_export_jobs", || {
            ExportJob::count_active(project_id, requester, &self.pool)
        })
        .await
    }

    async fn cancel_export_job(&self, project_id: Uuid, id: Uuid) -> Result<CancelOutcome> {
        with_retry("cancel_export_job", || {
            ExportJob::cancel(project_id, id, &self.pool)
        })
        .await
    }

    async fn claim_next_export_job(&self, snapshot_at: i64) -> Result<Option<ExportJob>> {
        with_retry("claim_next_export_job", || {
            ExportJob::claim_next(snapshot_at, &self.pool)
        })
        .await
    }

    async fn mark_export_ready(
        &self,
        id: Uuid,
        file_uri: &str,
        manifest: &serde_json::Value,
        expires_at: i64,
    ) -> Result<bool> {
        with_retry("mark_export_ready", || {
            ExportJob::mark_ready(id, file_uri, manifest, expires_at, &self.pool)
        })
        .await
    }

    async fn mark_export_failed(&self, id: Uuid, error_code: &str) -> Result<()> {
        with_retry("mark_export_failed", || {
            ExportJob::mark_failed(id, error_code, &self.pool)
        })
        .await
    }

    async fn expire_ready_jobs(&self, now_ms: i64) -> Result<u64> {
        with_retry("expire_ready_jobs", || ExportJob::expire_ready(now_ms, &self.pool)).await
    }

    async fn fetch_export_rows(
        &self,
        project_id: Uuid,
        filters: &ExportFilters,
        mode: ExportMode,
    ) -> Result<Vec<ExportRow>> {
        with_retry("fetch_export_rows", || {
            ExportRow::fetch_snapshot(project_id, filters, mode, &self.pool)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn transient() -> anyhow::Error {
        anyhow::Error::from(sqlx::Error::PoolTimedOut)
    }

    fn terminal() -> anyhow::Error {
        anyhow::Error::from(sqlx::Error::RowNotFound)
    }

    #[test]
    fn classifies_transient_and_terminal_errors() {
        assert!(is_transient_error(&transient()));
        assert!(is_transient_error(&anyhow::Error::from(sqlx::Error::Io(
            std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset")
        ))));
        assert!(!is_transient_error(&terminal()));
        assert!(!is_transient_error(&anyhow::anyhow!("not a sqlx error")));
    }

    #[tokio::test]
    async fn retries_transient_failures_until_success() {
        let calls = AtomicU32::new(0);
        let result = with_retry("test_op", || {
            let attempt = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 2 {
                    Err(transient())
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn terminal_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = with_retry("test_op", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(terminal()) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn attempts_are_bounded() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = with_retry("test_op", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(transient()) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), MAX_ATTEMPTS);
    }
}
