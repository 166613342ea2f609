//! Export job model and its status machine.
//!
//! `queued → running → ready | failed | expired`. The worker owns
//! `running → ready|failed`, the sweeper owns `ready → expired`, and the
//! controller owns cancellation (`queued|running → failed`).

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

pub const ERROR_CANCELLED: &str = "export_cancelled";
pub const ERROR_LIMIT_EXCEEDED: &str = "export_limit_exceeded";
pub const ERROR_FAILED: &str = "export_failed";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "export_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ExportStatus {
    Queued,
    Running,
    Ready,
    Failed,
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "export_format", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Jsonl,
    Csv,
    Parquet,
}

impl Default for ExportFormat {
    fn default() -> Self {
        ExportFormat::Jsonl
    }
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Jsonl => "jsonl",
            ExportFormat::Csv => "csv",
            ExportFormat::Parquet => "parquet",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "export_mode", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ExportMode {
    LabelsOnly,
    LabelsPlusUnlabeled,
}

/// Forward-extensible; v1 accepts only `latest_per_user`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "label_policy", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum LabelPolicy {
    LatestPerUser,
}

/// Snapshot selection filters. Metadata filters are equality over scalar
/// values at a dotted path.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExportFilters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision_ids: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_ts: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_ts: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_ids: Option<Vec<Uuid>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<std::collections::BTreeMap<String, serde_json::Value>>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ExportJob {
    pub id: Uuid,
    pub project_id: Uuid,
    pub requester: Uuid,
    pub status: ExportStatus,
    pub mode: ExportMode,
    pub label_policy: LabelPolicy,
    pub format: ExportFormat,
    pub filters: serde_json::Value,
    pub include_fields: Vec<String>,
    pub manifest: Option<serde_json::Value>,
    pub file_uri: Option<String>,
    pub error_code: Option<String>,
    /// Snapshot instant in epoch millis; set when the worker claims.
    pub snapshot_at: Option<i64>,
    /// Artifact TTL deadline in epoch millis; set on ready.
    pub expires_at: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Outcome of a cancellation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// Was queued/running; now failed with `export_cancelled`.
    Cancelled,
    /// Already failed or expired; cancellation is idempotent.
    AlreadyFinished,
    /// Ready artifacts cannot be cancelled.
    Ready,
    NotFound,
}

impl ExportJob {
    pub fn filters(&self) -> ExportFilters {
        serde_json::from_value(self.filters.clone()).unwrap_or_default()
    }

    // =========================================================================
    // SQL Queries - ALL queries must be in models/
    // =========================================================================

    pub async fn insert(&self, pool: &PgPool) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO export_jobs
                (id, project_id, requester, status, mode, label_policy, format,
                 filters, include_fields)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(self.id)
        .bind(self.project_id)
        .bind(self.requester)
        .bind(self.status)
        .bind(self.mode)
        .bind(self.label_policy)
        .bind(self.format)
        .bind(&self.filters)
        .bind(&self.include_fields)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn find(project_id: Uuid, id: Uuid, pool: &PgPool) -> Result<Option<Self>> {
        let job = sqlx::query_as::<_, ExportJob>(
            "SELECT * FROM export_jobs WHERE project_id = $1 AND id = $2",
        )
        .bind(project_id)
        .bind(id)
        .fetch_optional(pool)
        .await?;
        Ok(job)
    }

    /// One page ordered `(created_at DESC, id DESC)`. When `requester` is
    /// set, only that user's jobs are visible.
    pub async fn list_page(
        project_id: Uuid,
        requester: Option<Uuid>,
        after: Option<(i64, Uuid)>,
        limit: i64,
        pool: &PgPool,
    ) -> Result<Vec<Self>> {
        let jobs = match after {
            Some((created_at_ms, id)) => {
                sqlx::query_as::<_, ExportJob>(
                    r#"
                    SELECT * FROM export_jobs
                    WHERE project_id = $1
                      AND ($2::uuid IS NULL OR requester = $2)
                      AND (created_at, id) < (to_timestamp($3::double precision / 1000.0), $4)
                    ORDER BY created_at DESC, id DESC
                    LIMIT $5
                    "#,
                )
                .bind(project_id)
                .bind(requester)
                .bind(created_at_ms)
                .bind(id)
                .bind(limit)
                .fetch_all(pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, ExportJob>(
                    r#"
                    SELECT * FROM export_jobs
                    WHERE project_id = $1
                      AND ($2::uuid IS NULL OR requester = $2)
                    ORDER BY created_at DESC, id DESC
                    LIMIT $3
                    "#,
                )
                .bind(project_id)
                .bind(requester)
                .bind(limit)
                .fetch_all(pool)
                .await?
            }
        };
        Ok(jobs)
    }

    /// Queued + running jobs by this requester; the admission cap input.
    pub async fn count_active(project_id: Uuid, requester: Uuid, pool: &PgPool) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM export_jobs
            WHERE project_id = $1 AND requester = $2
              AND status IN ('queued', 'running')
            "#,
        )
        .bind(project_id)
        .bind(requester)
        .fetch_one(pool)
        .await?;
        Ok(count)
    }

    /// Controller-owned cancellation. The status precondition lives inside
    /// the UPDATE so concurrent worker transitions cannot be clobbered.
    pub async fn cancel(project_id: Uuid, id: Uuid, pool: &PgPool) -> Result<CancelOutcome> {
        let cancelled = sqlx::query_as::<_, ExportJob>(
            r#"
            UPDATE export_jobs
            SET status = 'failed', error_code = $3, completed_at = NOW()
            WHERE project_id = $1 AND id = $2 AND status IN ('queued', 'running')
            RETURNING *
            "#,
        )
        .bind(project_id)
        .bind(id)
        .bind(ERROR_CANCELLED)
        .fetch_optional(pool)
        .await?;
        if cancelled.is_some() {
            return Ok(CancelOutcome::Cancelled);
        }
        match Self::find(project_id, id, pool).await? {
            None => Ok(CancelOutcome::NotFound),
            Some(job) if job.status == ExportStatus::Ready => Ok(CancelOutcome::Ready),
            Some(_) => Ok(CancelOutcome::AlreadyFinished),
        }
    }

    /// Worker-side atomic claim of the oldest queued job. `SKIP LOCKED`
    /// keeps multiple workers from serializing on the same row.
    pub async fn claim_next(snapshot_at: i64, pool: &PgPool) -> Result<Option<Self>> {
        let job = sqlx::query_as::<_, ExportJob>(
            r#"
            UPDATE export_jobs
            SET status = 'running', snapshot_at = $1
            WHERE id = (
                SELECT id FROM export_jobs
                WHERE status = 'queued'
                ORDER BY created_at ASC, id ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING *
            "#,
        )
        .bind(snapshot_at)
        .fetch_optional(pool)
        .await?;
        Ok(job)
    }

    /// Worker-owned `running → ready`. A cancellation that won the race
    /// leaves the row failed and this update a no-op.
    pub async fn mark_ready(
        id: Uuid,
        file_uri: &str,
        manifest: &serde_json::Value,
        expires_at: i64,
        pool: &PgPool,
    ) -> Result<bool> {
        let updated = sqlx::query(
            r#"
            UPDATE export_jobs
            SET status = 'ready', file_uri = $2, manifest = $3,
                expires_at = $4, completed_at = NOW()
            WHERE id = $1 AND status = 'running'
            "#,
        )
        .bind(id)
        .bind(file_uri)
        .bind(manifest)
        .bind(expires_at)
        .execute(pool)
        .await?;
        Ok(updated.rows_affected() == 1)
    }

    /// Worker-owned `running → failed`.
    pub async fn mark_failed(id: Uuid, error_code: &str, pool: &PgPool) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE export_jobs
            SET status = 'failed', error_code = $2, completed_at = NOW()
            WHERE id = $1 AND status = 'running'
            "#,
        )
        .bind(id)
        .bind(error_code)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Sweeper-owned `ready → expired` for artifacts past their TTL.
    pub async fn expire_ready(now_ms: i64, pool: &PgPool) -> Result<u64> {
        let updated = sqlx::query(
            r#"
            UPDATE export_jobs
            SET status = 'expired'
            WHERE status = 'ready' AND expires_at IS NOT NULL AND expires_at <= $1
            "#,
        )
        .bind(now_ms)
        .execute(pool)
        .await?;
        Ok(updated.rows_affected())
    }
}
