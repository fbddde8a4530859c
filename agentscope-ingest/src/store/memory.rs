use std::collections::HashMap;

use agentscope_core::keys::generate_key;
use agentscope_core::{
    AgentScopeError, ApiKey, NewRun, NewStep, Project, Result, Run, RunSummary, RunUpdate, Step,
};
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{KeyStore, RunStore};
use crate::appender::next_step_index;

#[derive(Default)]
struct MemoryState {
    projects: HashMap<Uuid, Project>,
    keys: HashMap<Uuid, ApiKey>,
    runs: HashMap<Uuid, Run>,
    steps: HashMap<Uuid, Vec<Step>>,
}

impl MemoryState {
    fn owned_run(&self, project_id: Uuid, run_id: Uuid) -> Result<&Run> {
        self.runs
            .get(&run_id)
            .filter(|run| run.project_id == project_id)
            .ok_or_else(|| AgentScopeError::run_not_found(run_id))
    }
}

/// In-process store. Holds state only for the lifetime of the instance.
///
/// A single mutex guards all maps, so step index assignment is serialized.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RunStore for MemoryStore {
    async fn create_run(&self, project_id: Uuid, new_run: NewRun) -> Result<Run> {
        let mut state = self.state.lock().await;
        if !state.projects.contains_key(&project_id) {
            return Err(AgentScopeError::NotFound(format!("Project {}", project_id)));
        }
        let run = Run::new(project_id, new_run);
        state.runs.insert(run.id, run.clone());
        Ok(run)
    }

    async fn update_run(&self, project_id: Uuid, run_id: Uuid, update: &RunUpdate) -> Result<Run> {
        let mut state = self.state.lock().await;
        let run = state
            .runs
            .get_mut(&run_id)
            .filter(|run| run.project_id == project_id)
            .ok_or_else(|| AgentScopeError::run_not_found(run_id))?;
        update.apply_to(run);
        Ok(run.clone())
    }

    async fn get_run(&self, project_id: Uuid, run_id: Uuid) -> Result<Run> {
        let state = self.state.lock().await;
        state.owned_run(project_id, run_id).cloned()
    }

    async fn list_runs(&self, project_id: Option<Uuid>, limit: u32) -> Result<Vec<RunSummary>> {
        let state = self.state.lock().await;
        let mut runs: Vec<&Run> = state
            .runs
            .values()
            .filter(|run| project_id.map_or(true, |p| run.project_id == p))
            .collect();

        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at).then(a.id.cmp(&b.id)));

        Ok(runs
            .into_iter()
            .take(limit as usize)
            .map(|run| {
                let step_count = state.steps.get(&run.id).map_or(0, Vec::len);
                RunSummary::from_run(run, step_count as i64)
            })
            .collect())
    }

    async fn append_step(&self, project_id: Uuid, run_id: Uuid, step: NewStep) -> Result<Step> {
        let mut state = self.state.lock().await;
        state.owned_run(project_id, run_id)?;

        let steps = state.steps.entry(run_id).or_default();
        let current_max = steps.iter().map(|s| s.step_index).max();
        let step = step.into_step(run_id, next_step_index(current_max));
        steps.push(step.clone());
        Ok(step)
    }

    async fn list_steps(&self, project_id: Uuid, run_id: Uuid) -> Result<Vec<Step>> {
        let state = self.state.lock().await;
        state.owned_run(project_id, run_id)?;

        let mut steps = state.steps.get(&run_id).cloned().unwrap_or_default();
        steps.sort_by_key(|s| s.step_index);
        Ok(steps)
    }

    async fn health(&self) -> Result<String> {
        let state = self.state.lock().await;
        Ok(format!("memory ({} runs)", state.runs.len()))
    }
}

#[async_trait]
impl KeyStore for MemoryStore {
    async fn create_project(&self, name: &str, description: Option<String>) -> Result<Project> {
        let project = Project::new(name, description);
        let mut state = self.state.lock().await;
        state.projects.insert(project.id, project.clone());
        Ok(project)
    }

    async fn get_project(&self, project_id: Uuid) -> Result<Option<Project>> {
        let state = self.state.lock().await;
        Ok(state.projects.get(&project_id).cloned())
    }

    async fn find_project_by_name(&self, name: &str) -> Result<Option<Project>> {
        let state = self.state.lock().await;
        Ok(state.projects.values().find(|p| p.name == name).cloned())
    }

    async fn issue_key(&self, project_id: Uuid, name: Option<String>) -> Result<(ApiKey, String)> {
        let mut state = self.state.lock().await;
        if !state.projects.contains_key(&project_id) {
            return Err(AgentScopeError::NotFound(format!("Project {}", project_id)));
        }
        let generated = generate_key();
        let key = ApiKey::new(project_id, &generated, name);
        state.keys.insert(key.id, key.clone());
        Ok((key, generated.plaintext))
    }

    async fn revoke_key(&self, project_id: Uuid, key_id: Uuid) -> Result<()> {
        let mut state = self.state.lock().await;
        let key = state
            .keys
            .get_mut(&key_id)
            .filter(|k| k.project_id == project_id)
            .ok_or_else(|| AgentScopeError::NotFound(format!("API key {}", key_id)))?;
        key.revoked_at = Some(Utc::now());
        Ok(())
    }

    async fn list_keys(&self, project_id: Uuid) -> Result<Vec<ApiKey>> {
        let state = self.state.lock().await;
        let mut keys: Vec<ApiKey> = state
            .keys
            .values()
            .filter(|k| k.project_id == project_id)
            .cloned()
            .collect();
        keys.sort_by_key(|k| k.created_at);
        Ok(keys)
    }

    async fn get_key(&self, key_id: Uuid) -> Result<Option<ApiKey>> {
        let state = self.state.lock().await;
        Ok(state.keys.get(&key_id).cloned())
    }

    async fn find_key_by_hash(&self, key_hash: &str) -> Result<Option<ApiKey>> {
        let state = self.state.lock().await;
        Ok(state.keys.values().find(|k| k.key_hash == key_hash).cloned())
    }

    async fn touch_key(&self, key_id: Uuid) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(key) = state.keys.get_mut(&key_id) {
            key.last_used_at = Some(Utc::now());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentscope_core::{RunStatus, StepType};
    use std::sync::Arc;

    async fn store_with_project() -> (MemoryStore, Uuid) {
        let store = MemoryStore::new();
        let project = store.create_project("demo", None).await.unwrap();
        (store, project.id)
    }

    #[tokio::test]
    async fn test_create_and_get_run() {
        let (store, project_id) = store_with_project().await;
        let run = store
            .create_run(project_id, NewRun::new("weather_bot"))
            .await
            .unwrap();

        let fetched = store.get_run(project_id, run.id).await.unwrap();
        assert_eq!(fetched.agent_name, "weather_bot");
        assert_eq!(fetched.status, RunStatus::Running);
        assert!(fetched.ended_at.is_none());
    }

    #[tokio::test]
    async fn test_create_run_unknown_project() {
        let store = MemoryStore::new();
        let result = store.create_run(Uuid::new_v4(), NewRun::new("bot")).await;
        assert!(matches!(result, Err(AgentScopeError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_update_missing_run_is_not_found() {
        let (store, project_id) = store_with_project().await;
        let result = store
            .update_run(project_id, Uuid::new_v4(), &RunUpdate::status(RunStatus::Failed))
            .await;
        assert!(matches!(result, Err(AgentScopeError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_partial_update_keeps_previous_values() {
        let (store, project_id) = store_with_project().await;
        let run = store.create_run(project_id, NewRun::new("bot")).await.unwrap();

        let first = RunUpdate {
            output: Some(serde_json::json!({"answer": 42})),
            error: Some(serde_json::json!({"message": "warn"})),
            ended_at: Some(Utc::now()),
            ..RunUpdate::default()
        };
        let after_first = store.update_run(project_id, run.id, &first).await.unwrap();

        let after_second = store
            .update_run(project_id, run.id, &RunUpdate::status(RunStatus::Completed))
            .await
            .unwrap();

        assert_eq!(after_second.status, RunStatus::Completed);
        assert_eq!(after_second.output, after_first.output);
        assert_eq!(after_second.error, after_first.error);
        assert_eq!(after_second.ended_at, after_first.ended_at);
    }

    #[tokio::test]
    async fn test_append_assigns_dense_indices() {
        let (store, project_id) = store_with_project().await;
        let run = store.create_run(project_id, NewRun::new("bot")).await.unwrap();

        for name in ["a", "b", "c"] {
            store
                .append_step(project_id, run.id, NewStep::new(StepType::Custom, name))
                .await
                .unwrap();
        }

        let steps = store.list_steps(project_id, run.id).await.unwrap();
        let indices: Vec<i32> = steps.iter().map(|s| s.step_index).collect();
        let names: Vec<&str> = steps.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_concurrent_appends_do_not_collide() {
        let (store, project_id) = store_with_project().await;
        let store = Arc::new(store);
        let run_id = store
            .create_run(project_id, NewRun::new("bot"))
            .await
            .unwrap()
            .id;

        let handles: Vec<_> = (0..50)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .append_step(
                            project_id,
                            run_id,
                            NewStep::new(StepType::ToolCall, format!("step-{}", i)),
                        )
                        .await
                })
            })
            .collect();

        for result in futures::future::join_all(handles).await {
            result.unwrap().unwrap();
        }

        let steps = store.list_steps(project_id, run_id).await.unwrap();
        let indices: Vec<i32> = steps.iter().map(|s| s.step_index).collect();
        assert_eq!(indices, (0..50).collect::<Vec<i32>>());
    }

    #[tokio::test]
    async fn test_append_to_missing_run_is_not_found() {
        let (store, project_id) = store_with_project().await;
        let result = store
            .append_step(project_id, Uuid::new_v4(), NewStep::new(StepType::Custom, "x"))
            .await;
        assert!(matches!(result, Err(AgentScopeError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_runs_are_project_scoped() {
        let (store, project_a) = store_with_project().await;
        let project_b = store.create_project("other", None).await.unwrap().id;
        let run = store.create_run(project_a, NewRun::new("bot")).await.unwrap();

        assert!(store.get_run(project_b, run.id).await.is_err());
        assert!(store
            .append_step(project_b, run.id, NewStep::new(StepType::Custom, "x"))
            .await
            .is_err());
        assert!(store
            .update_run(project_b, run.id, &RunUpdate::status(RunStatus::Failed))
            .await
            .is_err());
        assert!(store.list_runs(Some(project_b), 100).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_runs_limit_and_order() {
        let (store, project_id) = store_with_project().await;
        let mut ids = Vec::new();
        for i in 0..5 {
            let run = store
                .create_run(project_id, NewRun::new(format!("bot-{}", i)))
                .await
                .unwrap();
            ids.push(run.id);
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }

        let listed = store.list_runs(Some(project_id), 3).await.unwrap();
        assert_eq!(listed.len(), 3);
        assert_eq!(listed[0].id, ids[4]);
        assert_eq!(listed[0].agent_name, "bot-4");
    }

    #[tokio::test]
    async fn test_revoke_and_touch_key() {
        let (store, project_id) = store_with_project().await;
        let (key, plaintext) = store.issue_key(project_id, Some("ci".into())).await.unwrap();

        let hash = agentscope_core::keys::hash_key(&plaintext);
        let found = store.find_key_by_hash(&hash).await.unwrap().unwrap();
        assert_eq!(found.id, key.id);
        assert!(found.last_used_at.is_none());

        store.touch_key(key.id).await.unwrap();
        store.revoke_key(project_id, key.id).await.unwrap();

        let found = store.find_key_by_hash(&hash).await.unwrap().unwrap();
        assert!(found.last_used_at.is_some());
        assert!(found.is_revoked());
    }
}
