//! AgentScope server: the HTTP API over the ingestion gateway and the
//! storage backend selection used by the binary.

pub mod bootstrap;
pub mod http;
