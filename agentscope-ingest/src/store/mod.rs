pub mod memory;
pub mod postgres;

use agentscope_core::{ApiKey, NewRun, NewStep, Project, Result, Run, RunSummary, RunUpdate, Step};
use async_trait::async_trait;
use uuid::Uuid;

/// Persistence for runs and their ordered steps.
///
/// Every mutating operation is scoped to a project: a run that exists but
/// belongs to another project is reported as not found.
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Insert a run in status `running` with `started_at = now`.
    async fn create_run(&self, project_id: Uuid, new_run: NewRun) -> Result<Run>;

    /// Apply the present fields of `update`; absent fields are left untouched.
    async fn update_run(&self, project_id: Uuid, run_id: Uuid, update: &RunUpdate) -> Result<Run>;

    async fn get_run(&self, project_id: Uuid, run_id: Uuid) -> Result<Run>;

    /// Most recently started first, at most `limit` entries.
    async fn list_runs(&self, project_id: Option<Uuid>, limit: u32) -> Result<Vec<RunSummary>>;

    /// Append a step at the next dense index. Index assignment and insert are
    /// atomic per run.
    async fn append_step(&self, project_id: Uuid, run_id: Uuid, step: NewStep) -> Result<Step>;

    /// Steps of a run ordered by index ascending.
    async fn list_steps(&self, project_id: Uuid, run_id: Uuid) -> Result<Vec<Step>>;

    /// Short description of the backend for health reporting.
    async fn health(&self) -> Result<String>;
}

/// Projects and their API keys.
#[async_trait]
pub trait KeyStore: Send + Sync {
    async fn create_project(&self, name: &str, description: Option<String>) -> Result<Project>;

    async fn get_project(&self, project_id: Uuid) -> Result<Option<Project>>;

    async fn find_project_by_name(&self, name: &str) -> Result<Option<Project>>;

    /// Store a new key for the project and return the record plus the
    /// plaintext, which is not retrievable afterwards.
    async fn issue_key(&self, project_id: Uuid, name: Option<String>) -> Result<(ApiKey, String)>;

    async fn revoke_key(&self, project_id: Uuid, key_id: Uuid) -> Result<()>;

    async fn list_keys(&self, project_id: Uuid) -> Result<Vec<ApiKey>>;

    async fn get_key(&self, key_id: Uuid) -> Result<Option<ApiKey>>;

    /// Look up a key by digest, revoked or not.
    async fn find_key_by_hash(&self, key_hash: &str) -> Result<Option<ApiKey>>;

    /// Record a successful authentication.
    async fn touch_key(&self, key_id: Uuid) -> Result<()>;
}

/// Everything the gateway needs from a backend.
pub trait Store: RunStore + KeyStore {}

impl<T: RunStore + KeyStore> Store for T {}
