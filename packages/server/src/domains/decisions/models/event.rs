//! Decision events: append-only, immutable records of reviewer choices.
//!
//! `(project_id, user_id, event_id)` is the idempotency key; the unique
//! index on it is the single source of at-most-once truth. The latest-row
//! projection is recomputed inside the same transaction that appends an
//! event, so ingestion commutes: any permutation of the same event set
//! converges to the same `decision_latest`.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct DecisionEvent {
    pub id: Uuid,
    pub project_id: Uuid,
    pub user_id: Uuid,
    /// Client-minted idempotency id, unique per `(project_id, user_id)`.
    pub event_id: Uuid,
    pub item_id: Uuid,
    pub decision_id: String,
    pub note: Option<String>,
    /// Raw client timestamp, kept for audit.
    pub ts_client: i64,
    /// Client timestamp clamped into the skew window; the ordering input.
    pub ts_client_effective: i64,
    pub ts_server: i64,
    pub created_at: DateTime<Utc>,
}

/// Outcome of an idempotent apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Accepted,
    Duplicate,
}

impl DecisionEvent {
    /// The strict total order on events sharing `(project, user, item)`:
    /// higher `ts_client_effective`, then higher `ts_server`, then higher
    /// `event_id` (uuid byte order, which equals the hyphenated-string
    /// order). Returns true when `self` beats `incumbent`.
    pub fn outranks(&self, incumbent: &DecisionEvent) -> bool {
        (
            self.ts_client_effective,
            self.ts_server,
            self.event_id,
        ) > (
            incumbent.ts_client_effective,
            incumbent.ts_server,
            incumbent.event_id,
        )
    }

    // =========================================================================
    // SQL Queries - ALL queries must be in models/
    // =========================================================================

    /// Append the event and recompute the latest row, atomically.
    ///
    /// The insert relies on the unique index for idempotency; the latest
    /// upsert re-states the total order in its WHERE clause so the end
    /// state is independent of commit order even when two fresh events for
    /// the same triple race.
    pub async fn apply(event: &DecisionEvent, pool: &PgPool) -> Result<ApplyOutcome> {
        let mut tx = pool.begin().await?;

        let inserted: Option<(Uuid,)> = sqlx::query_as(
            r#"
            INSERT INTO decision_events
                (id, project_id, user_id, event_id, item_id, decision_id, note,
                 ts_client, ts_client_effective, ts_server)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (project_id, user_id, event_id) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(event.id)
        .bind(event.project_id)
        .bind(event.user_id)
        .bind(event.event_id)
        .bind(event.item_id)
        .bind(&event.decision_id)
        .bind(&event.note)
        .bind(event.ts_client)
        .bind(event.ts_client_effective)
        .bind(event.ts_server)
        .fetch_optional(&mut *tx)
        .await?;

        if inserted.is_none() {
            tx.commit().await?;
            return Ok(ApplyOutcome::Duplicate);
        }

        sqlx::query(
            r#"
            INSERT INTO decision_latest AS dl
                (project_id, user_id, item_id, event_id, decision_id, note,
                 ts_client, ts_client_effective, ts_server)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (project_id, user_id, item_id) DO UPDATE
            SET event_id = EXCLUDED.event_id,
                decision_id = EXCLUDED.decision_id,
                note = EXCLUDED.note,
                ts_client = EXCLUDED.ts_client,
                ts_client_effective = EXCLUDED.ts_client_effective,
                ts_server = EXCLUDED.ts_server
            WHERE (EXCLUDED.ts_client_effective, EXCLUDED.ts_server, EXCLUDED.event_id)
                > (dl.ts_client_effective, dl.ts_server, dl.event_id)
            "#,
        )
        .bind(event.project_id)
        .bind(event.user_id)
        .bind(event.item_id)
        .bind(event.event_id)
        .bind(&event.decision_id)
        .bind(&event.note)
        .bind(event.ts_client)
        .bind(event.ts_client_effective)
        .bind(event.ts_server)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(ApplyOutcome::Accepted)
    }

    /// All events for a project, in append order. Used by the projection
    /// rebuilder.
    pub async fn list_for_project(project_id: Uuid, pool: &PgPool) -> Result<Vec<Self>> {
        let events = sqlx::query_as::<_, DecisionEvent>(
            "SELECT * FROM decision_events WHERE project_id = $1 ORDER BY created_at ASC, id ASC",
        )
        .bind(project_id)
        .fetch_all(pool)
        .await?;
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(ts_client_effective: i64, ts_server: i64, event_id: Uuid) -> DecisionEvent {
        DecisionEvent {
            id: Uuid::new_v4(),
            project_id: Uuid::nil(),
            user_id: Uuid::nil(),
            event_id,
            item_id: Uuid::nil(),
            decision_id: "keep".into(),
            note: None,
            ts_client: ts_client_effective,
            ts_client_effective,
            ts_server,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn higher_effective_ts_wins() {
        let a = event(100, 1, Uuid::new_v4());
        let b = event(90, 2, Uuid::new_v4());
        assert!(a.outranks(&b));
        assert!(!b.outranks(&a));
    }

    #[test]
    fn server_ts_breaks_effective_tie() {
        let a = event(100, 5, Uuid::new_v4());
        let b = event(100, 4, Uuid::new_v4());
        assert!(a.outranks(&b));
        assert!(!b.outranks(&a));
    }

    #[test]
    fn event_id_breaks_full_tie() {
        let low = Uuid::parse_str("00000000-0000-4000-8000-000000000001").unwrap();
        let high = Uuid::parse_str("ffffffff-0000-4000-8000-000000000001").unwrap();
        let a = event(100, 5, high);
        let b = event(100, 5, low);
        assert!(a.outranks(&b));
        assert!(!b.outranks(&a));
    }

    #[test]
    fn order_is_strict() {
        let id = Uuid::new_v4();
        let a = event(100, 5, id);
        let b = event(100, 5, id);
        // An event never outranks an identical one.
        assert!(!a.outranks(&b));
        assert!(!b.outranks(&a));
    }

    #[test]
    fn order_is_total_and_antisymmetric() {
        let ids: Vec<Uuid> = (0..4).map(|_| Uuid::new_v4()).collect();
        let events: Vec<DecisionEvent> = ids
            .iter()
            .enumerate()
            .flat_map(|(i, id)| {
                [event(i as i64, 0, *id), event(0, i as i64, *id)]
            })
            .collect();
        for x in &events {
            for y in &events {
                if x.event_id == y.event_id
                    && x.ts_client_effective == y.ts_client_effective
                    && x.ts_server == y.ts_server
                {
                    continue;
                }
                assert_ne!(x.outranks(y), y.outranks(x));
            }
        }
    }
}
