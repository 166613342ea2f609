//! Postgres-backed identity adapter.
//!
//! Token validation proper is an external concern; this adapter only maps
//! an already-issued opaque API token to a caller and looks up project
//! membership. Swapping in a different identity backend means providing
//! another `IdentityProvider`, not touching call sites.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::common::auth::{Caller, Role};

use super::traits::IdentityProvider;

#[derive(Clone)]
pub struct PgIdentityProvider {
    pool: PgPool,
}

impl PgIdentityProvider {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IdentityProvider for PgIdentityProvider {
    async fn authenticate(&self, token: &str) -> Result<Option<Caller>> {
        let row: Option<(Uuid, String)> =
            sqlx::query_as("SELECT id, email FROM users WHERE api_token = $1")
                .bind(token)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(id, email)| Caller { id, email }))
    }

    async fn role_in(&self, caller_id: Uuid, project_id: Uuid) -> Result<Option<Role>> {
        let row: Option<(Role,)> = sqlx::query_as(
            "SELECT role FROM project_members WHERE project_id = $1 AND user_id = $2",
        )
        .bind(project_id)
        .bind(caller_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(role,)| role))
    }

    async fn project_ids_for(&self, caller_id: Uuid) -> Result<Vec<Uuid>> {
        let rows: Vec<(Uuid,)> =
            sqlx::query_as("SELECT project_id FROM project_members WHERE user_id = $1")
                .bind(caller_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }
}
