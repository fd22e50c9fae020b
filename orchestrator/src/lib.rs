pub mod admin;
pub mod client;
pub mod constants;
pub mod job;
pub mod registry;
pub mod store;
pub mod worker;

#[cfg(test)]
mod test_support;

pub use client::Producer;
pub use job::{JobSpec, JobStatus};
pub use registry::{Handler, Registry};
pub use store::{Connector, MemoryStore, QueueStore, RedisConnector, RedisStore};
pub use worker::{FailurePolicy, PoolConfig, PoolState, WorkerPool, WorkerReport};
pub use workless_config::{WorklessSettings, load_toml_settings, resolve_config_source};
