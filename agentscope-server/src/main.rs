use clap::Parser;
use agentscope_core::AgentScopeConfig;
use tokio::sync::broadcast;
use tracing_subscriber::{fmt, EnvFilter};
use uuid::Uuid;

use agentscope_server::{bootstrap, http};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "agentscope.toml")]
    config: String,

    /// Check storage connectivity and exit
    #[arg(long)]
    health: bool,

    /// Create the project if needed and issue an API key for it. Exits
    /// afterwards, except on the memory backend where it goes on serving
    #[arg(long, value_name = "PROJECT_NAME", conflicts_with_all = ["list_keys", "revoke_key", "health"])]
    issue_key: Option<String>,

    /// Label stored with a key issued by --issue-key
    #[arg(long, requires = "issue_key")]
    key_name: Option<String>,

    /// List a project's API keys and exit
    #[arg(long, value_name = "PROJECT_NAME", conflicts_with_all = ["revoke_key", "health"])]
    list_keys: Option<String>,

    /// Revoke an API key by id and exit
    #[arg(long, value_name = "KEY_ID", conflicts_with = "health")]
    revoke_key: Option<Uuid>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let config = match AgentScopeConfig::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", args.config, e);
            std::process::exit(1);
        }
    };

    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.service.log_level));
    fmt().with_env_filter(filter).init();

    let store = match bootstrap::open_store(&config).await {
        Ok(s) => s,
        Err(e) => {
            eprintln!("{:#}", e);
            std::process::exit(1);
        }
    };

    if args.health {
        match store.health().await {
            Ok(v) => println!("✅ Storage connected: {}", v),
            Err(e) => {
                println!("❌ Storage check failed: {}", e);
                std::process::exit(1);
            }
        }
        println!("✅ AgentScope health check passed");
        return Ok(());
    }

    if let Some(project_name) = args.list_keys {
        let listed = agentscope_ingest::list_project_keys(store.as_ref(), &project_name).await?;
        println!("{}", serde_json::to_string_pretty(&listed)?);
        return Ok(());
    }

    if let Some(key_id) = args.revoke_key {
        let revoked = agentscope_ingest::revoke_key_by_id(store.as_ref(), key_id).await?;
        println!("{}", serde_json::to_string_pretty(&revoked)?);
        return Ok(());
    }

    if let Some(project_name) = args.issue_key {
        let provisioned =
            agentscope_ingest::provision_key(store.as_ref(), &project_name, args.key_name).await?;
        println!("{}", serde_json::to_string_pretty(&provisioned)?);
        eprintln!("Store this key now; it cannot be shown again.");
        if !bootstrap::serve_after_issuing_key(&config) {
            return Ok(());
        }
        tracing::warn!("In-memory storage: serving with the key just issued");
    }

    let (tx, _rx) = broadcast::channel(1);
    let shutdown_tx = tx.clone();

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            return;
        }
        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(());
    });

    let gateway = bootstrap::build_gateway(store, &config);
    http::start_http_server(gateway, config, tx.subscribe()).await?;

    Ok(())
}
