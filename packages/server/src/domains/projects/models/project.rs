//! Project model and project-level configuration.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::common::auth::OrgPolicy;

use super::decision_schema::DecisionSchema;

/// How the client steps between variants of one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariantNavigationMode {
    Horizontal,
    Vertical,
    Both,
}

impl Default for VariantNavigationMode {
    fn default() -> Self {
        VariantNavigationMode::Horizontal
    }
}

/// Side-by-side compare is capped at two variants.
pub const MAX_COMPARE_VARIANTS: u32 = 2;

/// Project configuration document, stored as JSON on the project row.
///
/// Unknown keys are ignored on read so config can grow without a migration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectConfig {
    #[serde(default = "default_media_types")]
    pub media_types_supported: Vec<String>,
    #[serde(default)]
    pub variants_enabled: bool,
    #[serde(default)]
    pub variant_navigation_mode: VariantNavigationMode,
    #[serde(default)]
    pub compare_mode_enabled: bool,
    /// Project-level export field allowlist. `None` falls back to the
    /// server-global allowlist.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub export_allowlist: Option<Vec<String>>,
    #[serde(flatten)]
    pub policy: OrgPolicy,
}

fn default_media_types() -> Vec<String> {
    vec![
        "image".to_string(),
        "video".to_string(),
        "pdf".to_string(),
        "other".to_string(),
    ]
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Project {
    pub id: Uuid,
    pub org_id: Uuid,
    pub slug: String,
    pub decision_schema: serde_json::Value,
    pub config: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Project {
    /// Parse and validate the active decision schema document.
    ///
    /// Projects are provisioned out-of-band, so this read path is the
    /// backstop against a malformed schema row reaching ingestion.
    pub fn schema(&self) -> Result<DecisionSchema> {
        let schema: DecisionSchema = serde_json::from_value(self.decision_schema.clone())
            .with_context(|| format!("project {} has a malformed decision schema", self.id))?;
        schema
            .validate()
            .map_err(|e| anyhow!("project {} has an invalid decision schema: {}", self.id, e))?;
        Ok(schema)
    }

    /// Parse project configuration; missing keys get defaults.
    pub fn project_config(&self) -> ProjectConfig {
        serde_json::from_value(self.config.clone()).unwrap_or_default()
    }

    pub fn org_policy(&self) -> OrgPolicy {
        self.project_config().policy
    }

    // =========================================================================
    // SQL Queries - ALL queries must be in models/
    // =========================================================================

    /// Find a live (not soft-deleted) project.
    pub async fn find_live(id: Uuid, pool: &PgPool) -> Result<Option<Self>> {
        let project = sqlx::query_as::<_, Project>(
            "SELECT * FROM projects WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .fetch_optional(pool)
        .await?;
        Ok(project)
    }

    /// Fetch the live projects among `ids`, ordered by slug.
    pub async fn find_live_by_ids(ids: &[Uuid], pool: &PgPool) -> Result<Vec<Self>> {
        let projects = sqlx::query_as::<_, Project>(
            r#"
            SELECT * FROM projects
            WHERE id = ANY($1) AND deleted_at IS NULL
            ORDER BY slug ASC
            "#,
        )
        .bind(ids)
        .fetch_all(pool)
        .await?;
        Ok(projects)
    }
}
