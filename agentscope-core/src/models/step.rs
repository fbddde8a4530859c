use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AgentScopeError;

/// Kind of work a step records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    LlmCall,
    ToolCall,
    Retrieval,
    Custom,
    Error,
}

impl StepType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepType::LlmCall => "llm_call",
            StepType::ToolCall => "tool_call",
            StepType::Retrieval => "retrieval",
            StepType::Custom => "custom",
            StepType::Error => "error",
        }
    }
}

impl std::fmt::Display for StepType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StepType {
    type Err = AgentScopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "llm_call" => Ok(StepType::LlmCall),
            "tool_call" => Ok(StepType::ToolCall),
            "retrieval" => Ok(StepType::Retrieval),
            "custom" => Ok(StepType::Custom),
            "error" => Ok(StepType::Error),
            _ => Err(AgentScopeError::Validation(format!(
                "Invalid step type '{}'. Use: llm_call, tool_call, retrieval, custom, error",
                s
            ))),
        }
    }
}

impl TryFrom<String> for StepType {
    type Error = AgentScopeError;

    fn try_from(value: String) -> Result<Self, AgentScopeError> {
        value.parse()
    }
}

/// One observed unit of work inside a run.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Step {
    pub id: Uuid,
    pub run_id: Uuid,
    pub step_index: i32,
    #[sqlx(try_from = "String")]
    pub step_type: StepType,
    pub name: String,
    pub input: Option<serde_json::Value>,
    pub output: Option<serde_json::Value>,
    pub meta_data: Option<serde_json::Value>,
    pub error: Option<serde_json::Value>,
    pub tokens_used: Option<i32>,
    pub latency_ms: Option<i32>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Body of an add-step request. The index is never caller-supplied.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewStep {
    pub step_type: StepType,
    pub name: String,
    #[serde(default)]
    pub input: Option<serde_json::Value>,
    #[serde(default)]
    pub output: Option<serde_json::Value>,
    #[serde(default)]
    pub meta_data: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<serde_json::Value>,
    #[serde(default)]
    pub tokens_used: Option<i32>,
    #[serde(default)]
    pub latency_ms: Option<i32>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
}

impl NewStep {
    pub fn new(step_type: StepType, name: impl Into<String>) -> Self {
        Self {
            step_type,
            name: name.into(),
            input: None,
            output: None,
            meta_data: None,
            error: None,
            tokens_used: None,
            latency_ms: None,
            started_at: None,
            ended_at: None,
        }
    }

    pub fn validate(&self) -> Result<(), AgentScopeError> {
        if self.name.trim().is_empty() {
            return Err(AgentScopeError::Validation(
                "step name must not be empty".to_string(),
            ));
        }
        if self.tokens_used.is_some_and(|t| t < 0) {
            return Err(AgentScopeError::Validation(
                "tokens_used must be non-negative".to_string(),
            ));
        }
        if self.latency_ms.is_some_and(|l| l < 0) {
            return Err(AgentScopeError::Validation(
                "latency_ms must be non-negative".to_string(),
            ));
        }
        Ok(())
    }

    pub fn into_step(self, run_id: Uuid, step_index: i32) -> Step {
        Step {
            id: Uuid::new_v4(),
            run_id,
            step_index,
            step_type: self.step_type,
            name: self.name,
            input: self.input,
            output: self.output,
            meta_data: self.meta_data,
            error: self.error,
            tokens_used: self.tokens_used,
            latency_ms: self.latency_ms,
            started_at: self.started_at,
            ended_at: self.ended_at,
            created_at: Utc::now(),
        }
    }
}
