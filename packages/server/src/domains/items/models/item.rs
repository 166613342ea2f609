//! Item and item-variant models.
//!
//! Items are immutable apart from soft deletion. Every read path excludes
//! soft-deleted rows; there is no endpoint that bypasses the predicate.

use std::collections::HashMap;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "media_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Image,
    Video,
    Pdf,
    Other,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Image => "image",
            MediaType::Video => "video",
            MediaType::Pdf => "pdf",
            MediaType::Other => "other",
        }
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Item {
    pub id: Uuid,
    pub project_id: Uuid,
    pub external_id: String,
    pub media_type: MediaType,
    pub logical_uri: String,
    pub sort_key: String,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing)]
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ItemVariant {
    pub item_id: Uuid,
    pub variant_key: String,
    pub label: String,
    pub logical_uri: String,
    pub sort_order: i32,
    pub metadata: serde_json::Value,
}

/// An item hydrated with its variants, ordered `(sort_order, variant_key)`.
#[derive(Debug, Clone, Serialize)]
pub struct ItemWithVariants {
    #[serde(flatten)]
    pub item: Item,
    pub variants: Vec<ItemVariant>,
}

impl ItemWithVariants {
    pub fn variant(&self, variant_key: &str) -> Option<&ItemVariant> {
        self.variants.iter().find(|v| v.variant_key == variant_key)
    }
}

// =============================================================================
// SQL Queries - ALL queries must be in models/
// =============================================================================

impl Item {
    /// One page of live items ordered `(sort_key ASC, id ASC)`, fetching
    /// `limit` rows after the cursor key.
    pub async fn list_page(
        project_id: Uuid,
        after: Option<(String, Uuid)>,
        limit: i64,
        pool: &PgPool,
    ) -> Result<Vec<ItemWithVariants>> {
        let items = match after {
            Some((sort_key, item_id)) => {
                sqlx::query_as::<_, Item>(
                    r#"
                    SELECT * FROM items
                    WHERE project_id = $1
                      AND deleted_at IS NULL
                      AND (sort_key, id) > ($2, $3)
                    ORDER BY sort_key ASC, id ASC
                    LIMIT $4
                    "#,
                )
                .bind(project_id)
                .bind(sort_key)
                .bind(item_id)
                .bind(limit)
                .fetch_all(pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, Item>(
                    r#"
                    SELECT * FROM items
                    WHERE project_id = $1 AND deleted_at IS NULL
                    ORDER BY sort_key ASC, id ASC
                    LIMIT $2
                    "#,
                )
                .bind(project_id)
                .bind(limit)
                .fetch_all(pool)
                .await?
            }
        };
        Self::hydrate_variants(items, pool).await
    }

    /// Single live item with variants.
    pub async fn find_live(
        project_id: Uuid,
        item_id: Uuid,
        pool: &PgPool,
    ) -> Result<Option<ItemWithVariants>> {
        let item = sqlx::query_as::<_, Item>(
            "SELECT * FROM items WHERE project_id = $1 AND id = $2 AND deleted_at IS NULL",
        )
        .bind(project_id)
        .bind(item_id)
        .fetch_optional(pool)
        .await?;
        match item {
            Some(item) => Ok(Self::hydrate_variants(vec![item], pool).await?.pop()),
            None => Ok(None),
        }
    }

    /// Does a live item with this id exist in the project?
    pub async fn exists_live(project_id: Uuid, item_id: Uuid, pool: &PgPool) -> Result<bool> {
        let found: Option<(Uuid,)> = sqlx::query_as(
            "SELECT id FROM items WHERE project_id = $1 AND id = $2 AND deleted_at IS NULL",
        )
        .bind(project_id)
        .bind(item_id)
        .fetch_optional(pool)
        .await?;
        Ok(found.is_some())
    }

    async fn hydrate_variants(items: Vec<Item>, pool: &PgPool) -> Result<Vec<ItemWithVariants>> {
        if items.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<Uuid> = items.iter().map(|i| i.id).collect();
        let variants = sqlx::query_as::<_, ItemVariant>(
            r#"
            SELECT * FROM item_variants
            WHERE item_id = ANY($1)
            ORDER BY sort_order ASC, variant_key ASC
            "#,
        )
        .bind(&ids)
        .fetch_all(pool)
        .await?;

        let mut by_item: HashMap<Uuid, Vec<ItemVariant>> = HashMap::new();
        for v in variants {
            by_item.entry(v.item_id).or_default().push(v);
        }
        Ok(items
            .into_iter()
            .map(|item| {
                let variants = by_item.remove(&item.id).unwrap_or_default();
                ItemWithVariants { item, variants }
            })
            .collect())
    }
}
