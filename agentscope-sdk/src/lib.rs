//! Client SDK for AgentScope.
//!
//! [`AgentScopeClient`] wraps the ingestion endpoints; [`RunTracker`] layers
//! a current-run slot and scoped helpers on top of it.

pub mod client;
pub mod error;
pub mod tracker;
pub mod types;

pub use client::{AgentScopeClient, ClientOptions, FailureMode, DEFAULT_BASE_URL};
pub use error::{Error, Result};
pub use tracker::{create_tracker, RunTracker, StepOptions};
pub use types::{RunConfig, RunStatus, StepConfig, StepType};
