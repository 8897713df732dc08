//! PostgreSQL 规则集存储

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::{info, instrument};

use super::RulesetStore;
use crate::error::{Result, RulesetError};
use crate::models::{Ruleset, RulesetDraft};

const CREATE_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS rulesets (
        id          TEXT PRIMARY KEY,
        name        TEXT NOT NULL UNIQUE,
        description TEXT NOT NULL DEFAULT '',
        salience    BIGINT NOT NULL DEFAULT 0,
        grl         TEXT NOT NULL,
        created_at  TIMESTAMPTZ NOT NULL,
        updated_at  TIMESTAMPTZ NOT NULL
    )
"#;

/// PostgreSQL 规则集存储
///
/// 名称唯一性由 `UNIQUE(name)` 约束保证，线性一致性由数据库提供。
#[derive(Clone)]
pub struct PostgresRulesetStore {
    pool: PgPool,
}

impl PostgresRulesetStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 建立连接池并确保表结构存在
    pub async fn connect(url: &str, max_connections: u32, connect_timeout: Duration) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(connect_timeout)
            .connect(url)
            .await?;

        let store = Self::new(pool);
        store.ensure_schema().await?;

        info!(max_connections, "PostgreSQL 规则集存储已连接");
        Ok(store)
    }

    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(CREATE_TABLE).execute(&self.pool).await?;
        Ok(())
    }
}

fn map_insert_error(err: sqlx::Error, name: &str) -> RulesetError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => RulesetError::already_exists(name),
        _ => err.into(),
    }
}

#[async_trait]
impl RulesetStore for PostgresRulesetStore {
    #[instrument(skip(self))]
    async fn get_all(&self) -> Result<Vec<Ruleset>> {
        let rulesets = sqlx::query_as::<_, Ruleset>(
            r#"
            SELECT id, name, description, salience, grl, created_at, updated_at
            FROM rulesets
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rulesets)
    }

    #[instrument(skip(self))]
    async fn get_by_name(&self, name: &str) -> Result<Ruleset> {
        sqlx::query_as::<_, Ruleset>(
            r#"
            SELECT id, name, description, salience, grl, created_at, updated_at
            FROM rulesets
            WHERE name = $1
            "#,
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| RulesetError::not_found(name))
    }

    #[instrument(skip(self, draft), fields(name = %draft.name))]
    async fn create(&self, draft: RulesetDraft) -> Result<String> {
        let ruleset = Ruleset::from_draft(draft, Utc::now());

        sqlx::query(
            r#"
            INSERT INTO rulesets (id, name, description, salience, grl, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(&ruleset.id)
        .bind(&ruleset.name)
        .bind(&ruleset.description)
        .bind(ruleset.salience)
        .bind(&ruleset.grl)
        .bind(ruleset.created_at)
        .bind(ruleset.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_insert_error(e, &ruleset.name))?;

        Ok(ruleset.id)
    }

    #[instrument(skip(self, draft))]
    async fn update(&self, name: &str, draft: RulesetDraft) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE rulesets
            SET description = $2, salience = $3, grl = $4,
                updated_at = GREATEST($5, created_at)
            WHERE name = $1
            "#,
        )
        .bind(name)
        .bind(&draft.description)
        .bind(draft.salience)
        .bind(&draft.grl)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RulesetError::not_found(name));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete(&self, name: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM rulesets WHERE name = $1")
            .bind(name)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(RulesetError::not_found(name));
        }
        Ok(())
    }
}
