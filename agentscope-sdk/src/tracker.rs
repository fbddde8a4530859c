//! Run lifecycle tracking on top of [`AgentScopeClient`].
//!
//! A tracker holds at most one current run. Steps and the final status go to
//! an explicit run id when given, otherwise to the current run. Ending the
//! current run clears the slot; ending some other run leaves it alone.

use std::fmt::Display;
use std::future::Future;
use std::sync::Mutex;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::client::{AgentScopeClient, ClientOptions};
use crate::error::{Error, Result};
use crate::types::{RunConfig, RunStatus, StepConfig, StepType};

/// A step to record, plus an optional explicit target run.
#[derive(Debug, Clone, Default)]
pub struct StepOptions {
    pub name: String,
    pub step_type: StepType,
    pub input: Option<Value>,
    pub output: Option<Value>,
    pub error: Option<Value>,
    pub tokens_used: Option<i32>,
    pub latency_ms: Option<i32>,
    pub meta_data: Option<Value>,
    pub run_id: Option<Uuid>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl StepOptions {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn step_type(mut self, step_type: StepType) -> Self {
        self.step_type = step_type;
        self
    }

    pub fn input(mut self, input: Value) -> Self {
        self.input = Some(input);
        self
    }

    pub fn output(mut self, output: Value) -> Self {
        self.output = Some(output);
        self
    }

    pub fn tokens_used(mut self, tokens: i32) -> Self {
        self.tokens_used = Some(tokens);
        self
    }

    pub fn run_id(mut self, run_id: Uuid) -> Self {
        self.run_id = Some(run_id);
        self
    }

    fn into_config(self) -> (Option<Uuid>, StepConfig) {
        let config = StepConfig {
            name: self.name,
            step_type: self.step_type,
            input: self.input,
            output: self.output,
            meta_data: self.meta_data,
            error: self.error,
            tokens_used: self.tokens_used,
            latency_ms: self.latency_ms,
            started_at: self.started_at,
            ended_at: self.ended_at,
        };
        (self.run_id, config)
    }
}

pub struct RunTracker {
    client: AgentScopeClient,
    current_run: Mutex<Option<Uuid>>,
}

impl RunTracker {
    pub fn new(client: AgentScopeClient) -> Self {
        Self {
            client,
            current_run: Mutex::new(None),
        }
    }

    pub fn client(&self) -> &AgentScopeClient {
        &self.client
    }

    pub fn current_run_id(&self) -> Option<Uuid> {
        *self.slot()
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<Uuid>> {
        self.current_run
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Create a run and make it current. `None` when the request failed in
    /// silent mode; the slot is then left unchanged.
    pub async fn start_run(&self, config: RunConfig) -> Result<Option<Uuid>> {
        let run_id = self.client.create_run(&config).await?;
        if let Some(id) = run_id {
            *self.slot() = Some(id);
            tracing::info!(run_id = %id, agent = %config.agent_name, "Started run");
        }
        Ok(run_id)
    }

    /// Record a step on `options.run_id` or the current run. Without either,
    /// nothing is sent and `false` is returned.
    pub async fn track_step(&self, options: StepOptions) -> Result<bool> {
        let (explicit, config) = options.into_config();
        let Some(run_id) = explicit.or_else(|| self.current_run_id()) else {
            tracing::warn!(step = %config.name, "No active run; call start_run first");
            return Ok(false);
        };
        self.client.add_step(run_id, &config).await
    }

    /// Finish `run_id` or the current run with `status`.
    pub async fn end_run(
        &self,
        status: RunStatus,
        output: Option<Value>,
        error: Option<Value>,
        run_id: Option<Uuid>,
    ) -> Result<bool> {
        let Some(target) = run_id.or_else(|| self.current_run_id()) else {
            tracing::warn!("No active run to end");
            return Ok(false);
        };

        let ended = self.client.complete_run(target, status, output, error).await?;
        if ended {
            let mut slot = self.slot();
            if *slot == Some(target) {
                *slot = None;
                tracing::info!(run_id = %target, status = ?status, "Ended run");
            }
        }
        Ok(ended)
    }

    /// Run `body` inside a run: start it, hand the id to the body, then end it
    /// as completed on `Ok` or failed on `Err`. The body's error is returned
    /// unchanged even when recording the failure itself fails.
    pub async fn track_run<T, E, F, Fut>(&self, config: RunConfig, body: F) -> std::result::Result<T, E>
    where
        F: FnOnce(Option<Uuid>) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: From<Error> + Display,
    {
        let run_id = self.start_run(config).await?;

        match body(run_id).await {
            Ok(value) => {
                if let Some(id) = run_id {
                    self.end_run(RunStatus::Completed, None, None, Some(id)).await?;
                }
                Ok(value)
            }
            Err(err) => {
                tracing::error!(error = %err, "Run failed");
                if let Some(id) = run_id {
                    let payload = error_payload(&err);
                    if let Err(cleanup) = self
                        .end_run(RunStatus::Failed, None, Some(payload), Some(id))
                        .await
                    {
                        tracing::error!(run_id = %id, error = %cleanup, "Failed to record run failure");
                    }
                }
                Err(err)
            }
        }
    }

    /// Time `body` and record it as a step on every exit path. Failures are
    /// recorded with an error payload and then returned unchanged.
    pub async fn track_step_scope<T, E, Fut>(
        &self,
        mut options: StepOptions,
        body: Fut,
    ) -> std::result::Result<T, E>
    where
        Fut: Future<Output = std::result::Result<T, E>>,
        E: From<Error> + Display,
    {
        let started = Instant::now();
        let result = body.await;
        options.latency_ms = Some(i32::try_from(started.elapsed().as_millis()).unwrap_or(i32::MAX));

        match result {
            Ok(value) => {
                self.track_step(options).await?;
                Ok(value)
            }
            Err(err) => {
                options.error = Some(error_payload(&err));
                let step = options.name.clone();
                if let Err(cleanup) = self.track_step(options).await {
                    tracing::error!(step = %step, error = %cleanup, "Failed to record step failure");
                }
                Err(err)
            }
        }
    }
}

/// Build a tracker around a new client.
pub fn create_tracker(api_key: &str, base_url: &str, options: ClientOptions) -> Result<RunTracker> {
    Ok(RunTracker::new(AgentScopeClient::new(api_key, base_url, options)?))
}

/// `{message, kind}` where `kind` is the path-qualified type name of the
/// error, e.g. `std::io::error::Error` or `anyhow::Error`.
pub fn error_payload<E: Display>(err: &E) -> Value {
    json!({
        "message": err.to_string(),
        "kind": std::any::type_name::<E>(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct WeatherApiDown;

    impl Display for WeatherApiDown {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str("weather API unreachable")
        }
    }

    #[test]
    fn test_error_payload_names_the_error_type() {
        let payload = error_payload(&WeatherApiDown);
        assert_eq!(payload["message"], "weather API unreachable");
        assert!(payload["kind"].as_str().unwrap().ends_with("::WeatherApiDown"));
    }

    #[test]
    fn test_error_payload_keeps_crate_path_for_common_errors() {
        let io = std::io::Error::new(std::io::ErrorKind::TimedOut, "socket timed out");
        let payload = error_payload(&io);
        assert_eq!(payload["message"], "socket timed out");
        assert!(payload["kind"].as_str().unwrap().starts_with("std::io::"));

        let payload = error_payload(&anyhow::anyhow!("tool crashed"));
        assert_eq!(payload["kind"], "anyhow::Error");

        let sdk = Error::Configuration("missing key".to_string());
        assert!(error_payload(&sdk)["kind"]
            .as_str()
            .unwrap()
            .starts_with("agentscope_sdk::"));

        let boxed: Box<dyn std::error::Error> = Box::new(io);
        assert!(error_payload(&boxed)["kind"].as_str().unwrap().contains("Box<dyn"));
    }

    #[test]
    fn test_step_options_into_config() {
        let run_id = Uuid::new_v4();
        let (target, config) = StepOptions::new("search")
            .step_type(StepType::Retrieval)
            .tokens_used(3)
            .run_id(run_id)
            .into_config();
        assert_eq!(target, Some(run_id));
        assert_eq!(config.step_type, StepType::Retrieval);
        assert_eq!(config.tokens_used, Some(3));
    }

    #[test]
    fn test_default_step_type_is_custom() {
        assert_eq!(StepOptions::new("x").step_type, StepType::Custom);
    }

    #[tokio::test]
    async fn test_track_step_without_run_is_false() {
        let tracker = create_tracker("ask_test", "http://127.0.0.1:9", ClientOptions::strict()).unwrap();
        assert!(tracker.current_run_id().is_none());
        assert!(!tracker.track_step(StepOptions::new("orphan")).await.unwrap());
        assert!(!tracker
            .end_run(RunStatus::Completed, None, None, None)
            .await
            .unwrap());
    }
}
