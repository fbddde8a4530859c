//! Run ingestion: the run store, the step appender and the credential-checked
//! gateway that fronts them.

pub mod appender;
pub mod gateway;
pub mod store;

pub use gateway::{
    list_project_keys, provision_key, revoke_key_by_id, IngestGateway, ProjectKeys, ProvisionedKey,
};
pub use store::memory::MemoryStore;
pub use store::postgres::PgStore;
pub use store::{KeyStore, RunStore, Store};
