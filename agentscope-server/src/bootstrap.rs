use std::sync::Arc;

use agentscope_core::config::StorageBackend;
use agentscope_core::{db, AgentScopeConfig};
use agentscope_ingest::{IngestGateway, MemoryStore, PgStore, Store};
use anyhow::Context;

/// Open the configured storage backend. The Postgres schema is applied on
/// every start; its statements are idempotent.
pub async fn open_store(config: &AgentScopeConfig) -> anyhow::Result<Arc<dyn Store>> {
    match config.storage.backend {
        StorageBackend::Postgres => {
            let pool = db::create_pool(&config.database)
                .await
                .context("Failed to connect to database")?;
            db::apply_schema(&pool)
                .await
                .context("Failed to apply database schema")?;
            tracing::info!(max_connections = config.database.max_connections, "Using PostgreSQL storage");
            Ok(Arc::new(PgStore::new(pool)))
        }
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory storage; runs are lost on restart");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

pub fn build_gateway(store: Arc<dyn Store>, config: &AgentScopeConfig) -> IngestGateway {
    IngestGateway::new(store, config.ingest.list_limit)
}

/// Keys issued into in-memory storage die with the process, so `--issue-key`
/// only exits when the backend persists.
pub fn serve_after_issuing_key(config: &AgentScopeConfig) -> bool {
    config.storage.backend == StorageBackend::Memory
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_backend_opens_without_database() {
        let mut config = AgentScopeConfig::default();
        config.storage.backend = StorageBackend::Memory;
        config.ingest.list_limit = 5;

        let store = open_store(&config).await.unwrap();
        assert!(store.health().await.unwrap().starts_with("memory"));

        let gateway = build_gateway(store, &config);
        assert_eq!(gateway.list_limit(), 5);
    }

    #[tokio::test]
    async fn test_memory_backend_serves_with_issued_key() {
        let mut config = AgentScopeConfig::default();
        config.storage.backend = StorageBackend::Memory;
        assert!(serve_after_issuing_key(&config));

        let store = open_store(&config).await.unwrap();
        let issued = agentscope_ingest::provision_key(store.as_ref(), "local", None)
            .await
            .unwrap();
        let gateway = build_gateway(store, &config);
        let project = gateway.authenticate(Some(&issued.plaintext)).await.unwrap();
        assert_eq!(project.id, issued.project.id);
    }

    #[test]
    fn test_postgres_backend_exits_after_issuing_key() {
        let mut config = AgentScopeConfig::default();
        config.storage.backend = StorageBackend::Postgres;
        assert!(!serve_after_issuing_key(&config));
    }
}
