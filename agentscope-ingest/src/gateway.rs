use std::sync::Arc;

use agentscope_core::keys::hash_key;
use agentscope_core::{
    AgentScopeError, ApiKey, NewRun, NewStep, Project, Result, Run, RunSummary, RunTimeline,
    RunUpdate, Step,
};
use serde::Serialize;
use uuid::Uuid;

use crate::store::Store;

/// Front door for ingestion and queries. Every call resolves the presented
/// API key to a project first and only touches that project's runs.
#[derive(Clone)]
pub struct IngestGateway {
    store: Arc<dyn Store>,
    list_limit: u32,
}

impl IngestGateway {
    pub fn new(store: Arc<dyn Store>, list_limit: u32) -> Self {
        Self { store, list_limit }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn list_limit(&self) -> u32 {
        self.list_limit
    }

    /// Resolve a plaintext key to its project and record the use.
    pub async fn authenticate(&self, key: Option<&str>) -> Result<Project> {
        let key = key
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or_else(|| AgentScopeError::Unauthorized("API key required".to_string()))?;

        let record = self
            .store
            .find_key_by_hash(&hash_key(key))
            .await?
            .ok_or_else(invalid_key)?;

        if record.is_revoked() {
            tracing::warn!(key_id = %record.id, prefix = %record.key_prefix, "Rejected revoked API key");
            return Err(invalid_key());
        }

        self.store.touch_key(record.id).await?;

        self.store
            .get_project(record.project_id)
            .await?
            .ok_or_else(|| AgentScopeError::NotFound(format!("Project {}", record.project_id)))
    }

    pub async fn create_run(&self, key: Option<&str>, new_run: NewRun) -> Result<Run> {
        let project = self.authenticate(key).await?;
        new_run.validate()?;

        let run = self.store.create_run(project.id, new_run).await?;
        tracing::info!(run_id = %run.id, project_id = %project.id, agent = %run.agent_name, "Run started");
        Ok(run)
    }

    pub async fn add_step(&self, key: Option<&str>, run_id: Uuid, step: NewStep) -> Result<Step> {
        let project = self.authenticate(key).await?;
        step.validate()?;

        let step = self.store.append_step(project.id, run_id, step).await?;
        tracing::info!(
            run_id = %run_id,
            step_index = step.step_index,
            step_type = %step.step_type,
            "Step recorded"
        );
        Ok(step)
    }

    pub async fn update_run(&self, key: Option<&str>, run_id: Uuid, update: RunUpdate) -> Result<Run> {
        let project = self.authenticate(key).await?;

        let run = self.store.update_run(project.id, run_id, &update).await?;
        tracing::info!(run_id = %run_id, status = %run.status, "Run updated");
        Ok(run)
    }

    /// `limit` is clamped to the configured maximum.
    pub async fn list_runs(&self, key: Option<&str>, limit: Option<u32>) -> Result<Vec<RunSummary>> {
        let project = self.authenticate(key).await?;
        let limit = limit.unwrap_or(self.list_limit).min(self.list_limit);
        self.store.list_runs(Some(project.id), limit).await
    }

    pub async fn get_run(&self, key: Option<&str>, run_id: Uuid) -> Result<Run> {
        let project = self.authenticate(key).await?;
        self.store.get_run(project.id, run_id).await
    }

    pub async fn list_steps(&self, key: Option<&str>, run_id: Uuid) -> Result<Vec<Step>> {
        let project = self.authenticate(key).await?;
        self.store.list_steps(project.id, run_id).await
    }

    pub async fn timeline(&self, key: Option<&str>, run_id: Uuid) -> Result<RunTimeline> {
        let project = self.authenticate(key).await?;
        let run = self.store.get_run(project.id, run_id).await?;
        let steps = self.store.list_steps(project.id, run_id).await?;
        Ok(RunTimeline::new(run, steps))
    }
}

fn invalid_key() -> AgentScopeError {
    AgentScopeError::Unauthorized("Invalid or revoked API key".to_string())
}

/// Result of provisioning a key from the command line.
#[derive(Debug, Serialize)]
pub struct ProvisionedKey {
    pub project: Project,
    pub key: ApiKey,
    /// Shown once; only its digest is stored.
    pub plaintext: String,
}

/// Find or create the named project and issue a new key for it.
pub async fn provision_key(
    store: &dyn Store,
    project_name: &str,
    key_name: Option<String>,
) -> Result<ProvisionedKey> {
    if project_name.trim().is_empty() {
        return Err(AgentScopeError::Validation(
            "project name must not be empty".to_string(),
        ));
    }

    let project = match store.find_project_by_name(project_name).await? {
        Some(project) => project,
        None => {
            let project = store.create_project(project_name, None).await?;
            tracing::info!(project_id = %project.id, name = %project.name, "Created project");
            project
        }
    };

    let (key, plaintext) = store.issue_key(project.id, key_name).await?;
    tracing::info!(project_id = %project.id, prefix = %key.key_prefix, "Issued API key");

    Ok(ProvisionedKey {
        project,
        key,
        plaintext,
    })
}

/// A project's keys, newest last. Plaintexts are never included.
#[derive(Debug, Serialize)]
pub struct ProjectKeys {
    pub project: Project,
    pub keys: Vec<ApiKey>,
}

pub async fn list_project_keys(store: &dyn Store, project_name: &str) -> Result<ProjectKeys> {
    let project = store
        .find_project_by_name(project_name)
        .await?
        .ok_or_else(|| AgentScopeError::NotFound(format!("Project '{}'", project_name)))?;
    let keys = store.list_keys(project.id).await?;
    Ok(ProjectKeys { project, keys })
}

/// Revoke a key by id. Revoking an already revoked key keeps its original
/// revocation time.
pub async fn revoke_key_by_id(store: &dyn Store, key_id: Uuid) -> Result<ApiKey> {
    let key = store
        .get_key(key_id)
        .await?
        .ok_or_else(|| AgentScopeError::NotFound(format!("API key {}", key_id)))?;
    if key.is_revoked() {
        return Ok(key);
    }

    store.revoke_key(key.project_id, key.id).await?;
    tracing::warn!(project_id = %key.project_id, key_id = %key.id, prefix = %key.key_prefix, "Revoked API key");

    store
        .get_key(key_id)
        .await?
        .ok_or_else(|| AgentScopeError::NotFound(format!("API key {}", key_id)))
}
