use agentscope_core::keys::generate_key;
use agentscope_core::{
    AgentScopeError, ApiKey, NewRun, NewStep, Project, Result, Run, RunSummary, RunUpdate, Step,
};
use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::{KeyStore, RunStore};
use crate::appender::next_step_index;

/// PostgreSQL-backed store.
///
/// Step appends lock the parent run row (`SELECT ... FOR UPDATE`) before
/// reading the current maximum index; the `(run_id, step_index)` unique
/// constraint backs this up.
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
impl RunStore for PgStore {
    async fn create_run(&self, project_id: Uuid, new_run: NewRun) -> Result<Run> {
        let run = Run::new(project_id, new_run);

        let inserted = sqlx::query_as::<_, Run>(
            r#"
            INSERT INTO runs
                (id, project_id, external_id, agent_name, status, input, meta_data, started_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING *
            "#,
        )
        .bind(run.id)
        .bind(run.project_id)
        .bind(&run.external_id)
        .bind(&run.agent_name)
        .bind(run.status.as_str())
        .bind(&run.input)
        .bind(&run.meta_data)
        .bind(run.started_at)
        .bind(run.created_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(inserted)
    }

    async fn update_run(&self, project_id: Uuid, run_id: Uuid, update: &RunUpdate) -> Result<Run> {
        let mut tx = self.pool.begin().await?;

        let mut run = sqlx::query_as::<_, Run>(
            "SELECT * FROM runs WHERE id = $1 AND project_id = $2 FOR UPDATE",
        )
        .bind(run_id)
        .bind(project_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AgentScopeError::run_not_found(run_id))?;

        update.apply_to(&mut run);

        let updated = sqlx::query_as::<_, Run>(
            r#"
            UPDATE runs
            SET status = $2, output = $3, error = $4, ended_at = $5
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(run.id)
        .bind(run.status.as_str())
        .bind(&run.output)
        .bind(&run.error)
        .bind(run.ended_at)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(updated)
    }

    async fn get_run(&self, project_id: Uuid, run_id: Uuid) -> Result<Run> {
        sqlx::query_as::<_, Run>("SELECT * FROM runs WHERE id = $1 AND project_id = $2")
            .bind(run_id)
            .bind(project_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AgentScopeError::run_not_found(run_id))
    }

    async fn list_runs(&self, project_id: Option<Uuid>, limit: u32) -> Result<Vec<RunSummary>> {
        let rows = sqlx::query_as::<_, RunSummary>(
            r#"
            SELECT r.id, r.project_id, r.external_id, r.agent_name, r.status,
                   r.started_at, r.ended_at,
                   (SELECT COUNT(*) FROM run_steps s WHERE s.run_id = r.id) AS step_count
            FROM runs r
            WHERE ($1::uuid IS NULL OR r.project_id = $1)
            ORDER BY r.started_at DESC, r.id
            LIMIT $2
            "#,
        )
        .bind(project_id)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(RunSummary::with_duration).collect())
    }

    async fn append_step(&self, project_id: Uuid, run_id: Uuid, step: NewStep) -> Result<Step> {
        let mut tx = self.pool.begin().await?;

        let locked: Option<(Uuid,)> =
            sqlx::query_as("SELECT id FROM runs WHERE id = $1 AND project_id = $2 FOR UPDATE")
                .bind(run_id)
                .bind(project_id)
                .fetch_optional(&mut *tx)
                .await?;
        if locked.is_none() {
            return Err(AgentScopeError::run_not_found(run_id));
        }

        let (current_max,): (Option<i32>,) =
            sqlx::query_as("SELECT MAX(step_index) FROM run_steps WHERE run_id = $1")
                .bind(run_id)
                .fetch_one(&mut *tx)
                .await?;

        let step = step.into_step(run_id, next_step_index(current_max));

        let inserted = sqlx::query_as::<_, Step>(
            r#"
            INSERT INTO run_steps
                (id, run_id, step_index, step_type, name, input, output, meta_data, error,
                 tokens_used, latency_ms, started_at, ended_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            RETURNING *
            "#,
        )
        .bind(step.id)
        .bind(step.run_id)
        .bind(step.step_index)
        .bind(step.step_type.as_str())
        .bind(&step.name)
        .bind(&step.input)
        .bind(&step.output)
        .bind(&step.meta_data)
        .bind(&step.error)
        .bind(step.tokens_used)
        .bind(step.latency_ms)
        .bind(step.started_at)
        .bind(step.ended_at)
        .bind(step.created_at)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(inserted)
    }

    async fn list_steps(&self, project_id: Uuid, run_id: Uuid) -> Result<Vec<Step>> {
        // Project scope check.
        self.get_run(project_id, run_id).await?;

        let steps = sqlx::query_as::<_, Step>(
            "SELECT * FROM run_steps WHERE run_id = $1 ORDER BY step_index ASC",
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(steps)
    }

    async fn health(&self) -> Result<String> {
        let version = agentscope_core::db::health_check(&self.pool).await?;
        Ok(version)
    }
}

#[async_trait]
impl KeyStore for PgStore {
    async fn create_project(&self, name: &str, description: Option<String>) -> Result<Project> {
        let project = Project::new(name, description);

        let inserted = sqlx::query_as::<_, Project>(
            r#"
            INSERT INTO projects (id, name, description, created_at)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(project.id)
        .bind(&project.name)
        .bind(&project.description)
        .bind(project.created_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(inserted)
    }

    async fn get_project(&self, project_id: Uuid) -> Result<Option<Project>> {
        let project = sqlx::query_as::<_, Project>("SELECT * FROM projects WHERE id = $1")
            .bind(project_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(project)
    }

    async fn find_project_by_name(&self, name: &str) -> Result<Option<Project>> {
        let project = sqlx::query_as::<_, Project>(
            "SELECT * FROM projects WHERE name = $1 ORDER BY created_at LIMIT 1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(project)
    }

    async fn issue_key(&self, project_id: Uuid, name: Option<String>) -> Result<(ApiKey, String)> {
        if self.get_project(project_id).await?.is_none() {
            return Err(AgentScopeError::NotFound(format!("Project {}", project_id)));
        }

        let generated = generate_key();
        let key = ApiKey::new(project_id, &generated, name);

        let inserted = sqlx::query_as::<_, ApiKey>(
            r#"
            INSERT INTO api_keys (id, project_id, key_hash, key_prefix, name, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(key.id)
        .bind(key.project_id)
        .bind(&key.key_hash)
        .bind(&key.key_prefix)
        .bind(&key.name)
        .bind(key.created_at)
        .fetch_one(&self.pool)
        .await?;

        Ok((inserted, generated.plaintext))
    }

    async fn revoke_key(&self, project_id: Uuid, key_id: Uuid) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE api_keys
            SET revoked_at = COALESCE(revoked_at, now())
            WHERE id = $1 AND project_id = $2
            "#,
        )
        .bind(key_id)
        .bind(project_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AgentScopeError::NotFound(format!("API key {}", key_id)));
        }
        Ok(())
    }

    async fn list_keys(&self, project_id: Uuid) -> Result<Vec<ApiKey>> {
        let keys = sqlx::query_as::<_, ApiKey>(
            "SELECT * FROM api_keys WHERE project_id = $1 ORDER BY created_at",
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(keys)
    }

    async fn get_key(&self, key_id: Uuid) -> Result<Option<ApiKey>> {
        let key = sqlx::query_as::<_, ApiKey>("SELECT * FROM api_keys WHERE id = $1")
            .bind(key_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(key)
    }

    async fn find_key_by_hash(&self, key_hash: &str) -> Result<Option<ApiKey>> {
        let key = sqlx::query_as::<_, ApiKey>("SELECT * FROM api_keys WHERE key_hash = $1")
            .bind(key_hash)
            .fetch_optional(&self.pool)
            .await?;
        Ok(key)
    }

    async fn touch_key(&self, key_id: Uuid) -> Result<()> {
        sqlx::query("UPDATE api_keys SET last_used_at = now() WHERE id = $1")
            .bind(key_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
