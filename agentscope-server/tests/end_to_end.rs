//! Runs the real server on an ephemeral port and drives it through the SDK
//! tracker, the way an instrumented agent would.

use std::net::SocketAddr;
use std::sync::Arc;

use agentscope_core::config::StorageBackend;
use agentscope_core::{AgentScopeConfig, RunStatus as ServerRunStatus};
use agentscope_ingest::{provision_key, IngestGateway, MemoryStore, Store};
use agentscope_sdk::{
    create_tracker, ClientOptions, Error, RunConfig, RunStatus, StepOptions, StepType,
};
use agentscope_server::http::{build_router, HttpState};
use tokio::net::TcpListener;
use uuid::Uuid;

struct LiveServer {
    addr: SocketAddr,
    store: Arc<dyn Store>,
    key: String,
    project_id: Uuid,
}

async fn start_server() -> LiveServer {
    let mut config = AgentScopeConfig::default();
    config.storage.backend = StorageBackend::Memory;

    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let provisioned = provision_key(store.as_ref(), "e2e", None).await.unwrap();

    let gateway = IngestGateway::new(store.clone(), config.ingest.list_limit);
    let app = build_router(Arc::new(HttpState { gateway, config }));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    LiveServer {
        addr,
        store,
        key: provisioned.plaintext,
        project_id: provisioned.project.id,
    }
}

#[tokio::test]
async fn test_weather_bot_scenario() {
    let server = start_server().await;
    let tracker = create_tracker(
        &server.key,
        &format!("http://{}", server.addr),
        ClientOptions::strict(),
    )
    .unwrap();

    let run_id = tracker
        .start_run(RunConfig::new("weather_bot").input(serde_json::json!({"city": "Oslo"})))
        .await
        .unwrap()
        .expect("run id");

    assert!(tracker
        .track_step(
            StepOptions::new("get_weather")
                .step_type(StepType::ToolCall)
                .input(serde_json::json!({"city": "Oslo"}))
                .output(serde_json::json!({"forecast": "sunny"})),
        )
        .await
        .unwrap());
    assert!(tracker
        .track_step(
            StepOptions::new("compose_answer")
                .step_type(StepType::LlmCall)
                .tokens_used(42),
        )
        .await
        .unwrap());
    assert!(tracker
        .end_run(
            RunStatus::Completed,
            Some(serde_json::json!({"response": "sunny"})),
            None,
            None,
        )
        .await
        .unwrap());
    assert!(tracker.current_run_id().is_none());

    let run = server.store.get_run(server.project_id, run_id).await.unwrap();
    assert_eq!(run.status, ServerRunStatus::Completed);
    assert!(run.ended_at.is_some());
    assert_eq!(run.output, Some(serde_json::json!({"response": "sunny"})));

    let steps = server.store.list_steps(server.project_id, run_id).await.unwrap();
    let names: Vec<&str> = steps.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["get_weather", "compose_answer"]);
    assert_eq!(steps[0].step_index, 0);
    assert_eq!(steps[1].step_index, 1);
}

#[tokio::test]
async fn test_failed_body_is_recorded_on_server() {
    let server = start_server().await;
    let tracker = create_tracker(
        &server.key,
        &format!("http://{}", server.addr),
        ClientOptions::strict(),
    )
    .unwrap();

    #[derive(Debug)]
    struct ForecastUnavailable(Error);

    impl std::fmt::Display for ForecastUnavailable {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "forecast unavailable: {}", self.0)
        }
    }

    impl From<Error> for ForecastUnavailable {
        fn from(e: Error) -> Self {
            ForecastUnavailable(e)
        }
    }

    let mut seen = None;
    let result: Result<(), ForecastUnavailable> = tracker
        .track_run(RunConfig::new("weather_bot"), |id| {
            seen = id;
            async {
                Err(ForecastUnavailable(Error::Configuration(
                    "upstream timeout".to_string(),
                )))
            }
        })
        .await;
    assert!(result.is_err());

    let run_id = seen.expect("run id");
    let run = server.store.get_run(server.project_id, run_id).await.unwrap();
    assert_eq!(run.status, ServerRunStatus::Failed);
    let error = run.error.unwrap();
    assert!(error["message"].as_str().unwrap().contains("upstream timeout"));
    assert!(error["kind"]
        .as_str()
        .unwrap()
        .ends_with("::ForecastUnavailable"));
}

#[tokio::test]
async fn test_wrong_key_is_authentication_error() {
    let server = start_server().await;
    let tracker = create_tracker(
        "ask_wrong",
        &format!("http://{}", server.addr),
        ClientOptions::strict(),
    )
    .unwrap();

    let result = tracker.start_run(RunConfig::new("bot")).await;
    assert!(matches!(result, Err(Error::Authentication(_))));

    let runs = server.store.list_runs(None, 10).await.unwrap();
    assert!(runs.is_empty());
}
