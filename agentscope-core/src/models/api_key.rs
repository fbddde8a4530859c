use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::keys::GeneratedKey;

/// Stored credential record. The plaintext key is never part of it.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ApiKey {
    pub id: Uuid,
    pub project_id: Uuid,
    #[serde(skip_serializing)]
    pub key_hash: String,
    pub key_prefix: String,
    pub name: Option<String>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl ApiKey {
    pub fn new(project_id: Uuid, generated: &GeneratedKey, name: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            project_id,
            key_hash: generated.hash.clone(),
            key_prefix: generated.prefix.clone(),
            name,
            last_used_at: None,
            created_at: Utc::now(),
            revoked_at: None,
        }
    }

    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }
}
