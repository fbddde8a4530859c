//! agentscope: terminal view of recorded agent runs
//!
//! # Subcommands
//! - `status`                         : show server health
//! - `runs list [-n <limit>] [--json]`: recent runs of the key's project
//! - `runs show <run_id> [--json]`    : one run with its ordered steps

use clap::{Parser, Subcommand};
use serde::Deserialize;

const DEFAULT_SERVER: &str = "http://127.0.0.1:8000";
const DEFAULT_LIMIT: u32 = 20;
const API_KEY_HEADER: &str = "X-Agentscope-Key";

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Debug, Parser)]
#[command(name = "agentscope", version, about = "Inspect AgentScope runs")]
struct Cli {
    /// AgentScope server URL (overrides AGENTSCOPE_HTTP_URL env var)
    #[arg(long, env = "AGENTSCOPE_HTTP_URL", default_value = DEFAULT_SERVER)]
    server: String,

    /// Project API key
    #[arg(long, env = "AGENTSCOPE_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Show server status
    Status,

    /// Query recorded runs
    Runs {
        #[command(subcommand)]
        command: RunsCommand,
    },
}

#[derive(Debug, Subcommand)]
enum RunsCommand {
    /// List the most recent runs
    List {
        #[arg(short = 'n', long, default_value_t = DEFAULT_LIMIT)]
        limit: u32,

        /// Print the raw JSON response
        #[arg(long)]
        json: bool,
    },

    /// Show one run and its steps
    Show {
        run_id: String,

        /// Print the raw JSON response
        #[arg(long)]
        json: bool,
    },
}

// ============================================================================
// API Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct RunRow {
    pub id: String,
    pub agent_name: String,
    pub status: String,
    pub started_at: String,
    pub step_count: i64,
    pub duration_ms: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct StepRow {
    pub step_index: i32,
    pub step_type: String,
    pub name: String,
    pub tokens_used: Option<i32>,
    pub latency_ms: Option<i32>,
    pub error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct TimelineView {
    pub id: String,
    pub agent_name: String,
    pub status: String,
    pub started_at: String,
    pub ended_at: Option<String>,
    pub error: Option<serde_json::Value>,
    pub steps: Vec<StepRow>,
    pub total_duration_ms: Option<i64>,
    pub total_tokens: i64,
}

// ============================================================================
// Rendering
// ============================================================================

fn format_duration(ms: Option<i64>) -> String {
    match ms {
        None => "-".to_string(),
        Some(ms) if ms < 1000 => format!("{}ms", ms),
        Some(ms) => format!("{:.1}s", ms as f64 / 1000.0),
    }
}

/// One line per run: id, status, agent, step count, duration.
pub fn render_run_row(run: &RunRow) -> String {
    format!(
        "{}  {:<9}  {:<24}  {:>3} steps  {:>7}  {}",
        run.id,
        run.status,
        run.agent_name,
        run.step_count,
        format_duration(run.duration_ms),
        run.started_at
    )
}

pub fn render_timeline(timeline: &TimelineView) -> String {
    let mut out = String::new();
    out.push_str(&format!("Run:      {}\n", timeline.id));
    out.push_str(&format!("Agent:    {}\n", timeline.agent_name));
    out.push_str(&format!("Status:   {}\n", timeline.status));
    out.push_str(&format!("Started:  {}\n", timeline.started_at));
    out.push_str(&format!(
        "Ended:    {}\n",
        timeline.ended_at.as_deref().unwrap_or("-")
    ));
    out.push_str(&format!(
        "Duration: {}\n",
        format_duration(timeline.total_duration_ms)
    ));
    out.push_str(&format!("Tokens:   {}\n", timeline.total_tokens));
    if let Some(error) = &timeline.error {
        out.push_str(&format!("Error:    {}\n", error_summary(error)));
    }

    out.push('\n');
    if timeline.steps.is_empty() {
        out.push_str("(no steps recorded)\n");
    }
    for step in &timeline.steps {
        out.push_str(&format!(
            "#{:<3} {:<10} {:<28} tokens={:<6} latency={}",
            step.step_index,
            step.step_type,
            step.name,
            step.tokens_used.map_or("-".to_string(), |t| t.to_string()),
            format_duration(step.latency_ms.map(i64::from)),
        ));
        if let Some(error) = &step.error {
            out.push_str(&format!("  ! {}", error_summary(error)));
        }
        out.push('\n');
    }
    out
}

fn error_summary(error: &serde_json::Value) -> String {
    error
        .get("message")
        .and_then(|m| m.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| error.to_string())
}

// ============================================================================
// HTTP Client Calls
// ============================================================================

fn http_client() -> anyhow::Result<reqwest::blocking::Client> {
    Ok(reqwest::blocking::Client::builder()
        .timeout(std::time::Duration::from_secs(30))
        .build()?)
}

/// GET an authenticated endpoint and return the decoded JSON body.
fn get_json(server: &str, api_key: Option<&str>, endpoint: &str) -> anyhow::Result<serde_json::Value> {
    let Some(api_key) = api_key else {
        eprintln!("agentscope: an API key is required (--api-key or AGENTSCOPE_API_KEY)");
        std::process::exit(1);
    };

    let url = format!("{}{}", server, endpoint);
    let resp = match http_client()?.get(&url).header(API_KEY_HEADER, api_key).send() {
        Ok(r) => r,
        Err(e) => {
            eprintln!("agentscope: connection failed to {}: {}", url, e);
            std::process::exit(1);
        }
    };

    if !resp.status().is_success() {
        let status = resp.status();
        let body: serde_json::Value = resp.json().unwrap_or_default();
        let message = body["error"].as_str().unwrap_or("request failed");
        eprintln!("agentscope: server returned {}: {}", status, message);
        std::process::exit(1);
    }

    Ok(resp.json()?)
}

fn do_list(server: &str, api_key: Option<&str>, limit: u32, json_output: bool) -> anyhow::Result<()> {
    let body = get_json(server, api_key, &format!("/api/runs?limit={}", limit))?;

    if json_output {
        println!("{}", serde_json::to_string_pretty(&body)?);
        return Ok(());
    }

    let runs: Vec<RunRow> = serde_json::from_value(body)?;
    if runs.is_empty() {
        eprintln!("No runs recorded yet");
        return Ok(());
    }
    for run in &runs {
        println!("{}", render_run_row(run));
    }
    Ok(())
}

fn do_show(server: &str, api_key: Option<&str>, run_id: &str, json_output: bool) -> anyhow::Result<()> {
    let body = get_json(server, api_key, &format!("/api/runs/{}/timeline", run_id))?;

    if json_output {
        println!("{}", serde_json::to_string_pretty(&body)?);
        return Ok(());
    }

    let timeline: TimelineView = serde_json::from_value(body)?;
    print!("{}", render_timeline(&timeline));
    Ok(())
}

/// Show the server status by calling GET /health.
fn do_status(server: &str) -> anyhow::Result<()> {
    let client = reqwest::blocking::Client::builder()
        .timeout(std::time::Duration::from_secs(10))
        .build()?;

    let url = format!("{}/health", server);
    match client.get(&url).send() {
        Ok(r) if r.status().is_success() => {
            let body: serde_json::Value = r.json().unwrap_or_default();
            println!("AgentScope: {}", body["status"].as_str().unwrap_or("unknown"));
            println!("Version:    {}", body["version"].as_str().unwrap_or("?"));
            println!("Storage:    {}", body["storage"].as_str().unwrap_or("?"));
        }
        Ok(r) => {
            eprintln!("agentscope: server unhealthy (HTTP {})", r.status());
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("agentscope: cannot reach {}: {}", url, e);
            std::process::exit(1);
        }
    }

    Ok(())
}

// ============================================================================
// Main
// ============================================================================

fn main() {
    let cli = Cli::parse();
    let server = cli.server.trim_end_matches('/').to_string();
    let api_key = cli.api_key.as_deref();

    let result = match cli.command {
        Commands::Status => do_status(&server),
        Commands::Runs { command } => match command {
            RunsCommand::List { limit, json } => do_list(&server, api_key, limit, json),
            RunsCommand::Show { run_id, json } => do_show(&server, api_key, &run_id, json),
        },
    };

    if let Err(e) = result {
        eprintln!("agentscope: {}", e);
        std::process::exit(1);
    }
}

// ============================================================================
// Tests
// ============================================================================
