//! Latest-decision projection: the winning event per
//! `(project_id, user_id, item_id)`.

use std::collections::HashMap;

use anyhow::Result;
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use super::event::DecisionEvent;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct DecisionLatest {
    pub project_id: Uuid,
    pub user_id: Uuid,
    pub item_id: Uuid,
    pub event_id: Uuid,
    pub decision_id: String,
    pub note: Option<String>,
    pub ts_client: i64,
    pub ts_client_effective: i64,
    pub ts_server: i64,
}

impl DecisionLatest {
    pub fn from_event(event: &DecisionEvent) -> Self {
        Self {
            project_id: event.project_id,
            user_id: event.user_id,
            item_id: event.item_id,
            event_id: event.event_id,
            decision_id: event.decision_id.clone(),
            note: event.note.clone(),
            ts_client: event.ts_client,
            ts_client_effective: event.ts_client_effective,
            ts_server: event.ts_server,
        }
    }

    /// Fold a set of events into their per-triple winners. Pure; shared by
    /// the rebuilder and the in-memory store.
    pub fn project_winners(events: &[DecisionEvent]) -> HashMap<(Uuid, Uuid, Uuid), DecisionEvent> {
        let mut winners: HashMap<(Uuid, Uuid, Uuid), DecisionEvent> = HashMap::new();
        for event in events {
            let key = (event.project_id, event.user_id, event.item_id);
            match winners.get(&key) {
                Some(current) if !event.outranks(current) => {}
                _ => {
                    winners.insert(key, event.clone());
                }
            }
        }
        winners
    }

    // =========================================================================
    // SQL Queries - ALL queries must be in models/
    // =========================================================================

    /// One page of the caller's latest decisions, ordered
    /// `(ts_server ASC, item_id ASC)`. Rows for soft-deleted items are
    /// excluded; the events behind them remain untouched.
    pub async fn list_page(
        project_id: Uuid,
        user_id: Uuid,
        after: Option<(i64, Uuid)>,
        limit: i64,
        pool: &PgPool,
    ) -> Result<Vec<Self>> {
        let rows = match after {
            Some((ts_server, item_id)) => {
                sqlx::query_as::<_, DecisionLatest>(
                    r#"
                    SELECT dl.* FROM decision_latest dl
                    JOIN items i ON i.id = dl.item_id AND i.deleted_at IS NULL
                    WHERE dl.project_id = $1
                      AND dl.user_id = $2
                      AND (dl.ts_server, dl.item_id) > ($3, $4)
                    ORDER BY dl.ts_server ASC, dl.item_id ASC
                    LIMIT $5
                    "#,
                )
                .bind(project_id)
                .bind(user_id)
                .bind(ts_server)
                .bind(item_id)
                .bind(limit)
                .fetch_all(pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, DecisionLatest>(
                    r#"
                    SELECT dl.* FROM decision_latest dl
                    JOIN items i ON i.id = dl.item_id AND i.deleted_at IS NULL
                    WHERE dl.project_id = $1 AND dl.user_id = $2
                    ORDER BY dl.ts_server ASC, dl.item_id ASC
                    LIMIT $3
                    "#,
                )
                .bind(project_id)
                .bind(user_id)
                .bind(limit)
                .fetch_all(pool)
                .await?
            }
        };
        Ok(rows)
    }

    /// Diagnostic rebuilder: replay every event for the project and
    /// rewrite the projection from scratch. Returns the row count written.
    ///
    /// The projection is a recomputable view; after a rebuild it must equal
    /// what incremental ingestion produced.
    pub async fn rebuild(project_id: Uuid, pool: &PgPool) -> Result<u64> {
        let events = DecisionEvent::list_for_project(project_id, pool).await?;
        let winners = Self::project_winners(&events);

        let mut tx = pool.begin().await?;
        sqlx::query("DELETE FROM decision_latest WHERE project_id = $1")
            .bind(project_id)
            .execute(&mut *tx)
            .await?;
        for event in winners.values() {
            sqlx::query(
                r#"
                INSERT INTO decision_latest
                    (project_id, user_id, item_id, event_id, decision_id, note,
                     ts_client, ts_client_effective, ts_server)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
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
        }
        tx.commit().await?;
        Ok(winners.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn event(
        user: Uuid,
        item: Uuid,
        ts_client_effective: i64,
        ts_server: i64,
    ) -> DecisionEvent {
        DecisionEvent {
            id: Uuid::new_v4(),
            project_id: Uuid::nil(),
            user_id: user,
            event_id: Uuid::new_v4(),
            item_id: item,
            decision_id: "keep".into(),
            note: None,
            ts_client: ts_client_effective,
            ts_client_effective,
            ts_server,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn winners_pick_highest_effective_ts_per_triple() {
        let user = Uuid::new_v4();
        let item_a = Uuid::new_v4();
        let item_b = Uuid::new_v4();
        let newer = event(user, item_a, 200, 1);
        let events = vec![
            event(user, item_a, 100, 1),
            newer.clone(),
            event(user, item_b, 50, 1),
        ];
        let winners = DecisionLatest::project_winners(&events);
        assert_eq!(winners.len(), 2);
        assert_eq!(
            winners[&(Uuid::nil(), user, item_a)].event_id,
            newer.event_id
        );
    }

    #[test]
    fn winners_are_permutation_invariant() {
        let user = Uuid::new_v4();
        let item = Uuid::new_v4();
        let events = vec![
            event(user, item, 100, 3),
            event(user, item, 100, 7),
            event(user, item, 90, 9),
        ];
        let forward = DecisionLatest::project_winners(&events);
        let mut reversed = events.clone();
        reversed.reverse();
        let backward = DecisionLatest::project_winners(&reversed);
        assert_eq!(
            forward[&(Uuid::nil(), user, item)].event_id,
            backward[&(Uuid::nil(), user, item)].event_id
        );
    }
}
