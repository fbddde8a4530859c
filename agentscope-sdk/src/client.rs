use std::time::Duration;

use chrono::Utc;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::{Client, Method, StatusCode, Url};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::types::{RunCompletion, RunConfig, RunStatus, StepConfig};

pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";

const API_KEY_HEADER: &str = "x-agentscope-key";

/// What a failed request does to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailureMode {
    /// Log the failure and report "no result" (`None` / `false`).
    #[default]
    Silent,
    /// Return the error.
    Strict,
}

#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub timeout: Duration,
    pub failure_mode: FailureMode,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            failure_mode: FailureMode::Silent,
        }
    }
}

impl ClientOptions {
    pub fn strict() -> Self {
        Self {
            failure_mode: FailureMode::Strict,
            ..Self::default()
        }
    }
}

/// HTTP client for the AgentScope ingestion API.
///
/// Each call issues exactly one request; there is no retry.
#[derive(Debug, Clone)]
pub struct AgentScopeClient {
    client: Client,
    base_url: String,
    failure_mode: FailureMode,
}

impl AgentScopeClient {
    pub fn new(api_key: &str, base_url: &str, options: ClientOptions) -> Result<Self> {
        if api_key.trim().is_empty() {
            return Err(Error::Configuration("API key is required".to_string()));
        }

        let base_url = base_url.trim_end_matches('/').to_string();
        Url::parse(&base_url).map_err(|e| Error::InvalidUrl(format!("{}: {}", base_url, e)))?;

        let mut key = HeaderValue::from_str(api_key)
            .map_err(|_| Error::Configuration("API key contains invalid characters".to_string()))?;
        key.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(API_KEY_HEADER, key);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .timeout(options.timeout)
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            base_url,
            failure_mode: options.failure_mode,
        })
    }

    /// Client for the default local server with default options.
    pub fn with_defaults(api_key: &str) -> Result<Self> {
        Self::new(api_key, DEFAULT_BASE_URL, ClientOptions::default())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn failure_mode(&self) -> FailureMode {
        self.failure_mode
    }

    /// Start a run. Returns the server-assigned id.
    pub async fn create_run(&self, config: &RunConfig) -> Result<Option<Uuid>> {
        match self.try_create_run(config).await {
            Ok(id) => Ok(Some(id)),
            Err(e) => self.fail("create_run", e).map(|_| None),
        }
    }

    async fn try_create_run(&self, config: &RunConfig) -> Result<Uuid> {
        let body = self.send(Method::POST, "/api/ingest/run", config).await?;
        Ok(serde_json::from_value(body["id"].clone())?)
    }

    pub async fn add_step(&self, run_id: Uuid, step: &StepConfig) -> Result<bool> {
        let endpoint = format!("/api/ingest/run/{}/step", run_id);
        match self.send(Method::POST, &endpoint, step).await {
            Ok(_) => Ok(true),
            Err(e) => self.fail("add_step", e).map(|_| false),
        }
    }

    /// Set the final status of a run, stamping `ended_at` with the current time.
    pub async fn complete_run(
        &self,
        run_id: Uuid,
        status: RunStatus,
        output: Option<Value>,
        error: Option<Value>,
    ) -> Result<bool> {
        let body = RunCompletion {
            status,
            output,
            error,
            ended_at: Utc::now(),
        };
        let endpoint = format!("/api/ingest/run/{}", run_id);
        match self.send(Method::PATCH, &endpoint, &body).await {
            Ok(_) => Ok(true),
            Err(e) => self.fail("complete_run", e).map(|_| false),
        }
    }

    async fn send<B: Serialize + ?Sized>(&self, method: Method, endpoint: &str, body: &B) -> Result<Value> {
        let url = format!("{}{}", self.base_url, endpoint);
        let response = self.client.request(method, &url).json(body).send().await?;

        let status = response.status();
        let text = response.text().await?;

        if status == StatusCode::UNAUTHORIZED {
            return Err(Error::Authentication(
                error_message(&text).unwrap_or_else(|| "Invalid API key".to_string()),
            ));
        }

        if !status.is_success() {
            return Err(Error::Api {
                status: status.as_u16(),
                message: error_message(&text).unwrap_or(text),
            });
        }

        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&text)?)
    }

    fn fail(&self, operation: &str, error: Error) -> Result<()> {
        match self.failure_mode {
            FailureMode::Silent => {
                tracing::error!(operation = operation, error = %error, "AgentScope request failed");
                Ok(())
            }
            FailureMode::Strict => Err(error),
        }
    }
}

/// The `error` field of a standard error body, if the body has one.
fn error_message(body: &str) -> Option<String> {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("error").and_then(Value::as_str).map(str::to_string))
}
