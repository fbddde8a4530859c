use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentScopeError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0} not found")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Other error: {0}")]
    Other(String),
}

impl AgentScopeError {
    pub fn run_not_found(run_id: uuid::Uuid) -> Self {
        Self::NotFound(format!("Run {}", run_id))
    }
}
