//! Snapshot rows for the export worker.
//!
//! A row is one item, joined with one user's latest decision for it (or no
//! decision at all under `labels_plus_unlabeled`). Rows reference media by
//! logical URI only; signed URLs never enter a dataset.

use anyhow::Result;
use sqlx::PgPool;
use uuid::Uuid;

use super::job::{ExportFilters, ExportMode};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ExportRow {
    pub item_id: Uuid,
    pub external_id: String,
    pub media_type: String,
    pub logical_uri: String,
    pub sort_key: String,
    pub item_metadata: serde_json::Value,
    pub user_id: Option<Uuid>,
    pub event_id: Option<Uuid>,
    pub decision_id: Option<String>,
    pub note: Option<String>,
    pub ts_client: Option<i64>,
    pub ts_client_effective: Option<i64>,
    pub ts_server: Option<i64>,
}

impl ExportRow {
    /// The deterministic serialization key:
    /// `(ts_server ASC, item_id ASC, user_id ASC)`, with unlabeled rows
    /// (no ts_server / no user) ordered first.
    pub fn sort_key_tuple(&self) -> (i64, Uuid, Uuid) {
        (
            self.ts_server.unwrap_or(i64::MIN),
            self.item_id,
            self.user_id.unwrap_or(Uuid::nil()),
        )
    }

    /// Apply the metadata equality filters. SQL handles the rest of the
    /// filter set; dotted-path equality is resolved here so the two store
    /// implementations share one definition.
    pub fn matches_metadata(&self, filters: &ExportFilters) -> bool {
        let Some(expected) = &filters.metadata else {
            return true;
        };
        expected.iter().all(|(path, want)| {
            json_at_path(&self.item_metadata, path) == Some(want)
        })
    }

    // =========================================================================
    // SQL Queries - ALL queries must be in models/
    // =========================================================================

    /// Fetch all qualifying rows inside one REPEATABLE READ transaction so
    /// the selection observes a single snapshot. Metadata filters are
    /// applied in Rust after the fetch.
    pub async fn fetch_snapshot(
        project_id: Uuid,
        filters: &ExportFilters,
        mode: ExportMode,
        pool: &PgPool,
    ) -> Result<Vec<Self>> {
        let mut tx = pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ")
            .execute(&mut *tx)
            .await?;

        let labeled = sqlx::query_as::<_, ExportRow>(
            r#"
            SELECT i.id AS item_id, i.external_id, i.media_type::text AS media_type,
                   i.logical_uri, i.sort_key, i.metadata AS item_metadata,
                   dl.user_id, dl.event_id, dl.decision_id, dl.note,
                   dl.ts_client, dl.ts_client_effective, dl.ts_server
            FROM decision_latest dl
            JOIN items i ON i.id = dl.item_id AND i.deleted_at IS NULL
            WHERE dl.project_id = $1
              AND ($2::text[] IS NULL OR dl.decision_id = ANY($2))
              AND ($3::bigint IS NULL OR dl.ts_server >= $3)
              AND ($4::bigint IS NULL OR dl.ts_server <= $4)
              AND ($5::uuid[] IS NULL OR dl.user_id = ANY($5))
            "#,
        )
        .bind(project_id)
        .bind(&filters.decision_ids)
        .bind(filters.from_ts)
        .bind(filters.to_ts)
        .bind(&filters.user_ids)
        .fetch_all(&mut *tx)
        .await?;

        let mut rows = labeled;
        if mode == ExportMode::LabelsPlusUnlabeled {
            let unlabeled = sqlx::query_as::<_, ExportRow>(
                r#"
                SELECT i.id AS item_id, i.external_id, i.media_type::text AS media_type,
                       i.logical_uri, i.sort_key, i.metadata AS item_metadata,
                       NULL::uuid AS user_id, NULL::uuid AS event_id,
                       NULL::text AS decision_id, NULL::text AS note,
                       NULL::bigint AS ts_client, NULL::bigint AS ts_client_effective,
                       NULL::bigint AS ts_server
                FROM items i
                WHERE i.project_id = $1
                  AND i.deleted_at IS NULL
                  AND NOT EXISTS (
                      SELECT 1 FROM decision_latest dl
                      WHERE dl.project_id = $1 AND dl.item_id = i.id
                  )
                "#,
            )
            .bind(project_id)
            .fetch_all(&mut *tx)
            .await?;
            rows.extend(unlabeled);
        }
        tx.commit().await?;

        rows.retain(|row| row.matches_metadata(filters));
        Ok(rows)
    }
}

/// Resolve a dotted path inside a JSON document.
pub fn json_at_path<'a>(value: &'a serde_json::Value, path: &str) -> Option<&'a serde_json::Value> {
    let mut current = value;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(metadata: serde_json::Value) -> ExportRow {
        ExportRow {
            item_id: Uuid::new_v4(),
            external_id: "x".into(),
            media_type: "image".into(),
            logical_uri: "storage://media/x.png".into(),
            sort_key: "0001".into(),
            item_metadata: metadata,
            user_id: None,
            event_id: None,
            decision_id: None,
            note: None,
            ts_client: None,
            ts_client_effective: None,
            ts_server: None,
        }
    }

    #[test]
    fn json_path_traverses_nested_objects() {
        let doc = json!({"a": {"b": {"c": 3}}, "top": "x"});
        assert_eq!(json_at_path(&doc, "a.b.c"), Some(&json!(3)));
        assert_eq!(json_at_path(&doc, "top"), Some(&json!("x")));
        assert_eq!(json_at_path(&doc, "a.missing"), None);
    }

    #[test]
    fn metadata_filter_is_equality_over_values() {
        let r = row(json!({"session_id": "s1", "scan": {"depth": 5}}));
        let mut filters = ExportFilters::default();
        assert!(r.matches_metadata(&filters));

        filters.metadata = Some(
            [("session_id".to_string(), json!("s1"))]
                .into_iter()
                .collect(),
        );
        assert!(r.matches_metadata(&filters));

        filters.metadata = Some(
            [("scan.depth".to_string(), json!(5))].into_iter().collect(),
        );
        assert!(r.matches_metadata(&filters));

        // No coercion: the string "5" is not the number 5.
        filters.metadata = Some(
            [("scan.depth".to_string(), json!("5"))]
                .into_iter()
                .collect(),
        );
        assert!(!r.matches_metadata(&filters));
    }

    #[test]
    fn unlabeled_rows_sort_first() {
        let unlabeled = row(json!({}));
        let mut labeled = row(json!({}));
        labeled.ts_server = Some(1);
        labeled.user_id = Some(Uuid::new_v4());
        assert!(unlabeled.sort_key_tuple() < labeled.sort_key_tuple());
    }
}
