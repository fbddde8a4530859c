pub mod config;
pub mod db;
pub mod error;
pub mod keys;
pub mod models;

pub use config::AgentScopeConfig;
pub use error::AgentScopeError;
pub use models::{
    ApiKey, NewRun, NewStep, Project, Run, RunStatus, RunSummary, RunTimeline, RunUpdate, Step,
    StepType,
};

pub type Result<T> = std::result::Result<T, AgentScopeError>;
