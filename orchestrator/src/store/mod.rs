//! The operations the queue engine needs from its backing store.
//!
//! Every worker loop owns one [`QueueStore`] obtained from a [`Connector`];
//! stores are never shared between loops. Cross-process safety relies on
//! [`QueueStore::move_tail_to_head`] and [`QueueStore::move_entry`] being
//! atomic in the backing store.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

pub mod memory;
pub mod redis_store;

pub use memory::MemoryStore;
pub use redis_store::{RedisConnector, RedisStore};

#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Round-trips to the store; used to fail fast at startup.
    async fn ping(&mut self) -> Result<()>;

    /// Writes `value` under `key`, expiring after `ttl` when given. A zero
    /// ttl is stored without expiry.
    async fn set(&mut self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;

    async fn get(&mut self, key: &str) -> Result<Option<String>>;

    /// Returns whether the key existed.
    async fn del(&mut self, key: &str) -> Result<bool>;

    /// Pushes onto the head of `list`.
    async fn lpush(&mut self, list: &str, value: &str) -> Result<()>;

    /// Atomically pops the tail of `src` and pushes it onto the head of
    /// `dst`. With a timeout the call blocks up to that long for an entry;
    /// without one it returns immediately. `None` means nothing was moved.
    async fn move_tail_to_head(
        &mut self,
        src: &str,
        dst: &str,
        timeout: Option<Duration>,
    ) -> Result<Option<String>>;

    /// Removes up to `count` occurrences of `value` from `list`, scanning
    /// from the head. Returns the number removed.
    async fn lrem(&mut self, list: &str, count: i64, value: &str) -> Result<i64>;

    /// Atomically removes one occurrence of `value` from `src` and, only if
    /// something was removed, pushes it onto the head of `dst`.
    async fn move_entry(&mut self, src: &str, dst: &str, value: &str) -> Result<bool>;

    async fn llen(&mut self, list: &str) -> Result<i64>;

    /// Inclusive range with Redis index semantics (negative counts from the tail).
    async fn lrange(&mut self, list: &str, start: isize, stop: isize) -> Result<Vec<String>>;
}

/// Opens store connections for producers and worker loops.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Store: QueueStore + 'static;

    async fn connect(&self) -> Result<Self::Store>;

    /// Human readable target for logs, without credentials.
    fn describe(&self) -> String;

    /// Longest blocking move the connections can wait for, if bounded.
    fn max_blocking_timeout(&self) -> Option<Duration> {
        None
    }
}
