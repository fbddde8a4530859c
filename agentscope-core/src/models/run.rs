use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::step::Step;
use crate::error::AgentScopeError;

/// Lifecycle status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    Paused,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Paused => "paused",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RunStatus {
    type Err = AgentScopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            "paused" => Ok(RunStatus::Paused),
            _ => Err(AgentScopeError::Validation(format!(
                "Invalid run status '{}'. Use: running, completed, failed, paused",
                s
            ))),
        }
    }
}

impl TryFrom<String> for RunStatus {
    type Error = AgentScopeError;

    fn try_from(value: String) -> Result<Self, AgentScopeError> {
        value.parse()
    }
}

/// One recorded execution of an agent.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Run {
    pub id: Uuid,
    pub project_id: Uuid,
    pub external_id: Option<String>,
    pub agent_name: String,
    #[sqlx(try_from = "String")]
    pub status: RunStatus,
    pub input: Option<serde_json::Value>,
    pub output: Option<serde_json::Value>,
    pub meta_data: Option<serde_json::Value>,
    pub error: Option<serde_json::Value>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Run {
    pub fn new(project_id: Uuid, new_run: NewRun) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            project_id,
            external_id: new_run.external_id,
            agent_name: new_run.agent_name,
            status: RunStatus::Running,
            input: new_run.input,
            output: None,
            meta_data: new_run.meta_data,
            error: None,
            started_at: now,
            ended_at: None,
            created_at: now,
        }
    }

    pub fn duration_ms(&self) -> Option<i64> {
        duration_ms(self.started_at, self.ended_at)
    }
}

fn duration_ms(started_at: DateTime<Utc>, ended_at: Option<DateTime<Utc>>) -> Option<i64> {
    ended_at.map(|end| (end - started_at).num_milliseconds())
}

/// Body of a create-run request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRun {
    #[serde(default)]
    pub external_id: Option<String>,
    pub agent_name: String,
    #[serde(default)]
    pub input: Option<serde_json::Value>,
    #[serde(default)]
    pub meta_data: Option<serde_json::Value>,
}

impl NewRun {
    pub fn new(agent_name: impl Into<String>) -> Self {
        Self {
            external_id: None,
            agent_name: agent_name.into(),
            input: None,
            meta_data: None,
        }
    }

    pub fn validate(&self) -> Result<(), AgentScopeError> {
        if self.agent_name.trim().is_empty() {
            return Err(AgentScopeError::Validation(
                "agent_name must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Partial update of a run. Only fields that are present are applied.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunUpdate {
    #[serde(default)]
    pub status: Option<RunStatus>,
    #[serde(default)]
    pub output: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<serde_json::Value>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
}

impl RunUpdate {
    pub fn status(status: RunStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// Apply the present fields to `run`. An end timestamp earlier than the
    /// start (client clock behind the server's) is clamped to `started_at`.
    pub fn apply_to(&self, run: &mut Run) {
        if let Some(status) = self.status {
            run.status = status;
        }
        if let Some(output) = &self.output {
            run.output = Some(output.clone());
        }
        if let Some(error) = &self.error {
            run.error = Some(error.clone());
        }
        if let Some(ended_at) = self.ended_at {
            run.ended_at = Some(ended_at.max(run.started_at));
        }
    }
}

/// List view of a run.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct RunSummary {
    pub id: Uuid,
    pub project_id: Uuid,
    pub external_id: Option<String>,
    pub agent_name: String,
    #[sqlx(try_from = "String")]
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub step_count: i64,
    #[sqlx(skip)]
    pub duration_ms: Option<i64>,
}

impl RunSummary {
    pub fn from_run(run: &Run, step_count: i64) -> Self {
        Self {
            id: run.id,
            project_id: run.project_id,
            external_id: run.external_id.clone(),
            agent_name: run.agent_name.clone(),
            status: run.status,
            started_at: run.started_at,
            ended_at: run.ended_at,
            step_count,
            duration_ms: run.duration_ms(),
        }
    }

    /// Fill in the derived duration after loading from storage.
    pub fn with_duration(mut self) -> Self {
        self.duration_ms = duration_ms(self.started_at, self.ended_at);
        self
    }
}

/// A run with its ordered steps and aggregate totals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunTimeline {
    #[serde(flatten)]
    pub run: Run,
    pub steps: Vec<Step>,
    pub total_duration_ms: Option<i64>,
    pub total_tokens: i64,
}

impl RunTimeline {
    pub fn new(run: Run, steps: Vec<Step>) -> Self {
        let total_tokens = steps
            .iter()
            .map(|s| i64::from(s.tokens_used.unwrap_or(0)))
            .sum();
        Self {
            total_duration_ms: run.duration_ms(),
            run,
            steps,
            total_tokens,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewStep, StepType};
    use chrono::Duration;

    fn sample_run() -> Run {
        let mut new_run = NewRun::new("weather_bot");
        new_run.input = Some(serde_json::json!({"city": "Oslo"}));
        Run::new(Uuid::new_v4(), new_run)
    }

    #[test]
    fn test_new_run_starts_running() {
        let run = sample_run();
        assert_eq!(run.status, RunStatus::Running);
        assert!(run.ended_at.is_none());
        assert!(run.duration_ms().is_none());
    }

    #[test]
    fn test_status_parse_and_display() {
        for s in ["running", "completed", "failed", "paused"] {
            let status: RunStatus = s.parse().unwrap();
            assert_eq!(status.to_string(), s);
        }
        assert!("done".parse::<RunStatus>().is_err());
    }

    #[test]
    fn test_status_only_update_leaves_other_fields() {
        let mut run = sample_run();
        run.output = Some(serde_json::json!({"response": "sunny"}));
        run.error = Some(serde_json::json!({"message": "earlier"}));
        let ended = run.started_at + Duration::seconds(3);
        run.ended_at = Some(ended);

        RunUpdate::status(RunStatus::Paused).apply_to(&mut run);

        assert_eq!(run.status, RunStatus::Paused);
        assert_eq!(run.output, Some(serde_json::json!({"response": "sunny"})));
        assert_eq!(run.error, Some(serde_json::json!({"message": "earlier"})));
        assert_eq!(run.ended_at, Some(ended));
    }

    #[test]
    fn test_skewed_end_is_clamped_to_start() {
        let mut run = sample_run();
        let update = RunUpdate {
            status: Some(RunStatus::Completed),
            ended_at: Some(run.started_at - Duration::milliseconds(5)),
            ..RunUpdate::default()
        };

        update.apply_to(&mut run);
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.ended_at, Some(run.started_at));
        assert_eq!(run.duration_ms(), Some(0));
    }

    #[test]
    fn test_later_end_is_kept() {
        let mut run = sample_run();
        let ended = run.started_at + Duration::milliseconds(40);
        RunUpdate {
            ended_at: Some(ended),
            ..RunUpdate::default()
        }
        .apply_to(&mut run);
        assert_eq!(run.ended_at, Some(ended));
    }

    #[test]
    fn test_update_null_fields_deserialize_as_absent() {
        let update: RunUpdate =
            serde_json::from_value(serde_json::json!({"status": "failed", "output": null}))
                .unwrap();
        assert_eq!(update.status, Some(RunStatus::Failed));
        assert!(update.output.is_none());
        assert!(update.ended_at.is_none());
    }

    #[test]
    fn test_new_run_requires_agent_name() {
        assert!(NewRun::new("  ").validate().is_err());
        assert!(NewRun::new("bot").validate().is_ok());
    }

    #[test]
    fn test_timeline_totals() {
        let mut run = sample_run();
        run.ended_at = Some(run.started_at + Duration::milliseconds(1500));

        let mut first = NewStep::new(StepType::ToolCall, "lookup");
        first.tokens_used = Some(12);
        let second = NewStep::new(StepType::LlmCall, "answer");
        let mut third = NewStep::new(StepType::LlmCall, "refine");
        third.tokens_used = Some(30);

        let steps = vec![
            first.into_step(run.id, 0),
            second.into_step(run.id, 1),
            third.into_step(run.id, 2),
        ];
        let timeline = RunTimeline::new(run, steps);

        assert_eq!(timeline.total_tokens, 42);
        assert_eq!(timeline.total_duration_ms, Some(1500));

        let json = serde_json::to_value(&timeline).unwrap();
        assert_eq!(json["agent_name"], "weather_bot");
        assert_eq!(json["steps"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn test_summary_from_run() {
        let mut run = sample_run();
        run.ended_at = Some(run.started_at + Duration::milliseconds(250));
        let summary = RunSummary::from_run(&run, 4);
        assert_eq!(summary.step_count, 4);
        assert_eq!(summary.duration_ms, Some(250));
    }
}
