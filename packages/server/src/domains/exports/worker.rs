//! Export worker: drains queued jobs, builds snapshotted artifacts, and
//! publishes them.
//!
//! Only the worker moves a job `running → ready|failed`. Cancellation is
//! cooperative: the controller flips the row to `failed` and the worker
//! notices at the next chunk boundary, discarding partial output.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use sha2::{Digest, Sha256};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::common::id::Clock;
use crate::kernel::storage::ArtifactStore;
use crate::kernel::traits::Store;

use super::models::{
    ExportJob, ExportRow, ExportStatus, ERROR_FAILED, ERROR_LIMIT_EXCEEDED,
};
use super::serialize::DatasetWriter;

/// Configuration for the export worker pool.
#[derive(Debug, Clone)]
pub struct ExportWorkerConfig {
    /// How long to wait when no jobs are queued.
    pub poll_interval: Duration,
    /// Concurrent exports per process.
    pub max_concurrent: usize,
    /// Rows serialized between cancellation checks.
    pub chunk_size: usize,
    /// Hard ceiling on projected rows.
    pub max_rows: usize,
    /// Hard ceiling on serialized dataset bytes.
    pub max_bytes: u64,
    /// Artifact TTL added to the completion time.
    pub artifact_ttl_ms: i64,
}

impl Default for ExportWorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            max_concurrent: 2,
            chunk_size: 10_000,
            max_rows: 1_000_000,
            max_bytes: 5 * 1024 * 1024 * 1024,
            artifact_ttl_ms: 7 * 24 * 60 * 60 * 1000,
        }
    }
}

/// Terminal result of processing one claimed job.
#[derive(Debug, PartialEq, Eq)]
enum JobOutcome {
    Ready,
    Cancelled,
    LimitExceeded,
}

pub struct ExportWorker {
    store: Arc<dyn Store>,
    artifacts: Arc<dyn ArtifactStore>,
    clock: Arc<dyn Clock>,
    config: ExportWorkerConfig,
}

impl ExportWorker {
    pub fn new(
        store: Arc<dyn Store>,
        artifacts: Arc<dyn ArtifactStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self::with_config(store, artifacts, clock, ExportWorkerConfig::default())
    }

    pub fn with_config(
        store: Arc<dyn Store>,
        artifacts: Arc<dyn ArtifactStore>,
        clock: Arc<dyn Clock>,
        config: ExportWorkerConfig,
    ) -> Self {
        Self {
            store,
            artifacts,
            clock,
            config,
        }
    }

    /// Poll loop: claim up to `max_concurrent` jobs, process them, sleep
    /// when the queue is empty. Runs until shutdown, then drains.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        info!(
            max_concurrent = self.config.max_concurrent,
            "export worker starting"
        );
        let mut active: JoinSet<()> = JoinSet::new();

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            while active.len() < self.config.max_concurrent {
                match self.store.claim_next_export_job(self.clock.now_ms()).await {
                    Ok(Some(job)) => {
                        debug!(export_id = %job.id, project_id = %job.project_id, "claimed export job");
                        let worker = Arc::clone(&self);
                        active.spawn(async move { worker.run_job(job).await });
                    }
                    Ok(None) => break,
                    Err(e) => {
                        error!(error = %e, "failed to claim export job");
                        break;
                    }
                }
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                Some(_) = active.join_next(), if !active.is_empty() => {}
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }

        // Let in-flight exports finish; they observe cancellation at chunk
        // boundaries if the controller intervenes.
        while active.join_next().await.is_some() {}
        info!("export worker stopped");
    }

    /// Process one claimed job end to end, owning its terminal transition.
    pub async fn run_job(&self, job: ExportJob) {
        let export_id = job.id;
        match self.process(&job).await {
            Ok(JobOutcome::Ready) => {
                info!(export_id = %export_id, "export ready");
            }
            Ok(JobOutcome::Cancelled) => {
                info!(export_id = %export_id, "export cancelled mid-stream; partial output discarded");
            }
            Ok(JobOutcome::LimitExceeded) => {
                warn!(export_id = %export_id, "export exceeded row or size limit");
                if let Err(e) = self
                    .store
                    .mark_export_failed(export_id, ERROR_LIMIT_EXCEEDED)
                    .await
                {
                    error!(export_id = %export_id, error = %e, "failed to mark export failed");
                }
            }
            Err(e) => {
                warn!(export_id = %export_id, error = %e, "export failed");
                if let Err(e) = self.store.mark_export_failed(export_id, ERROR_FAILED).await {
                    error!(export_id = %export_id, error = %e, "failed to mark export failed");
                }
            }
        }
    }

    async fn process(&self, job: &ExportJob) -> Result<JobOutcome> {
        let filters = job.filters();
        let snapshot_at = job.snapshot_at.unwrap_or_else(|| self.clock.now_ms());

        let mut rows = self
            .store
            .fetch_export_rows(job.project_id, &filters, job.mode)
            .await
            .context("snapshot selection")?;
        if rows.len() > self.config.max_rows {
            return Ok(JobOutcome::LimitExceeded);
        }
        // The deterministic serialization order; together with the field
        // projection this is the sole determinant of the output hash.
        rows.sort_by_key(ExportRow::sort_key_tuple);

        let mut writer = DatasetWriter::new(job.format, &job.include_fields)?;
        for chunk in rows.chunks(self.config.chunk_size) {
            if !self.still_running(job).await? {
                return Ok(JobOutcome::Cancelled);
            }
            writer.write_chunk(chunk)?;
            if writer.bytes_estimate() > self.config.max_bytes {
                return Ok(JobOutcome::LimitExceeded);
            }
        }
        let dataset = writer.finish()?;
        if dataset.len() as u64 > self.config.max_bytes {
            return Ok(JobOutcome::LimitExceeded);
        }

        let mut hasher = Sha256::new();
        hasher.update(&dataset);
        let sha256 = hex::encode(hasher.finalize());

        let project = self
            .store
            .find_project(job.project_id)
            .await?
            .ok_or_else(|| anyhow!("project {} vanished during export", job.project_id))?;
        let schema_version = project.schema()?.version;

        let manifest = build_manifest(job, snapshot_at, schema_version, rows.len(), &sha256);
        let manifest_bytes =
            serde_json::to_vec_pretty(&manifest).context("serializing manifest")?;

        // Last look before bytes leave the process.
        if !self.still_running(job).await? {
            return Ok(JobOutcome::Cancelled);
        }

        let package = format!("triagedeck_export_{}_{}", job.project_id, snapshot_at);
        let dataset_key = format!("exports/{}/dataset.{}", package, job.format.extension());
        let manifest_key = format!("exports/{}/manifest.json", package);
        let file_uri = self.artifacts.put(&dataset_key, &dataset).await?;
        self.artifacts.put(&manifest_key, &manifest_bytes).await?;

        let expires_at = self.clock.now_ms() + self.config.artifact_ttl_ms;
        let transitioned = self
            .store
            .mark_export_ready(job.id, &file_uri, &manifest, expires_at)
            .await?;
        if !transitioned {
            // A cancellation won the final race; the published bytes are
            // orphaned and age out with the package TTL.
            warn!(export_id = %job.id, "cancelled after publish; artifact orphaned");
            return Ok(JobOutcome::Cancelled);
        }
        Ok(JobOutcome::Ready)
    }

    async fn still_running(&self, job: &ExportJob) -> Result<bool> {
        let current = self.store.get_export_job(job.project_id, job.id).await?;
        Ok(matches!(
            current,
            Some(ref j) if j.status == ExportStatus::Running
        ))
    }
}

/// Assemble `manifest.json`. `serde_json::Map` is a BTreeMap, so keys come
/// out alphabetically and the manifest bytes are stable for a given
/// snapshot.
fn build_manifest(
    job: &ExportJob,
    snapshot_at: i64,
    decision_schema_version: i32,
    row_count: usize,
    sha256: &str,
) -> serde_json::Value {
    serde_json::json!({
        "snapshot_at": snapshot_at,
        "project_id": job.project_id,
        "decision_schema_version": decision_schema_version,
        "label_policy": job.label_policy,
        "filters": job.filters,
        "row_count": row_count,
        "sha256": sha256,
        "format": job.format,
        "include_fields": job.include_fields,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::exports::models::{ExportFormat, ExportMode, LabelPolicy};
    use uuid::Uuid;

    #[test]
    fn manifest_keys_are_sorted() {
        let job = ExportJob {
            id: Uuid::new_v4(),
            project_id: Uuid::new_v4(),
            requester: Uuid::new_v4(),
            status: ExportStatus::Running,
            mode: ExportMode::LabelsOnly,
            label_policy: LabelPolicy::LatestPerUser,
            format: ExportFormat::Jsonl,
            filters: serde_json::json!({}),
            include_fields: vec!["item_id".into()],
            manifest: None,
            file_uri: None,
            error_code: None,
            snapshot_at: Some(42),
            expires_at: None,
            created_at: chrono::Utc::now(),
            completed_at: None,
        };
        let manifest = build_manifest(&job, 42, 3, 7, "abc123");
        let keys: Vec<&String> = manifest.as_object().unwrap().keys().collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
        assert_eq!(manifest["row_count"], 7);
        assert_eq!(manifest["decision_schema_version"], 3);
        assert_eq!(manifest["label_policy"], "latest_per_user");
    }
}
