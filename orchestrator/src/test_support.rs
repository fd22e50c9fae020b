use std::sync::{Arc, Mutex as StdMutex, OnceLock};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use crate::store::{Connector, MemoryStore, QueueStore, RedisConnector, RedisStore};

static REDIS_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

fn redis_lock() -> &'static Mutex<()> {
    REDIS_LOCK.get_or_init(|| Mutex::new(()))
}

/// A live Redis connection for store tests, available only when
/// `WORKLESS_TEST_REDIS_DSN` is set. Keys are prefixed per context so runs
/// never see each other's data.
pub struct RedisTestContext {
    _guard: MutexGuard<'static, ()>,
    pub connector: RedisConnector,
    pub store: RedisStore,
    prefix: String,
}

impl RedisTestContext {
    pub async fn new() -> Result<Option<Self>> {
        let Ok(dsn) = std::env::var("WORKLESS_TEST_REDIS_DSN") else {
            return Ok(None);
        };
        let guard = redis_lock().lock().await;
        let connector = RedisConnector::new(dsn)?.with_blocking_timeout(Duration::from_secs(2));
        let mut store = connector.connect().await?;
        store.ping().await?;
        Ok(Some(Self {
            _guard: guard,
            connector,
            store,
            prefix: format!("workless-test-{}", Uuid::new_v4()),
        }))
    }

    pub fn key(&self, suffix: &str) -> String {
        format!("{}:{suffix}", self.prefix)
    }

    /// A queue name unique to this context.
    pub fn queue(&self) -> String {
        self.prefix.clone()
    }

    /// Deletes every key carrying this context's prefix, including the
    /// `workless:*` keys of [`RedisTestContext::queue`]. Returns how many
    /// keys were removed.
    pub async fn teardown(mut self) -> Result<usize> {
        let pattern = format!("*{}*", self.prefix);
        self.store.delete_matching(&pattern).await
    }
}

/// Wraps a [`MemoryStore`], recording every mutating operation and
/// optionally failing every call of one operation.
#[derive(Clone)]
pub struct RecordingStore {
    inner: MemoryStore,
    log: Arc<StdMutex<Vec<String>>>,
    fail_on: Option<&'static str>,
}

impl RecordingStore {
    pub fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            log: Arc::new(StdMutex::new(Vec::new())),
            fail_on: None,
        }
    }

    pub fn failing_on(mut self, op: &'static str) -> Self {
        self.fail_on = Some(op);
        self
    }

    /// Recorded operations as `"<op> <key>"`.
    pub fn ops(&self) -> Vec<String> {
        self.log.lock().map(|log| log.clone()).unwrap_or_default()
    }

    fn record(&self, op: &'static str, key: &str) -> Result<()> {
        if let Ok(mut log) = self.log.lock() {
            log.push(format!("{op} {key}"));
        }
        if self.fail_on == Some(op) {
            anyhow::bail!("injected {op} failure");
        }
        Ok(())
    }
}

#[async_trait]
impl QueueStore for RecordingStore {
    async fn ping(&mut self) -> Result<()> {
        self.record("ping", "")?;
        self.inner.ping().await
    }

    async fn set(&mut self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        self.record("set", key)?;
        self.inner.set(key, value, ttl).await
    }

    async fn get(&mut self, key: &str) -> Result<Option<String>> {
        self.inner.get(key).await
    }

    async fn del(&mut self, key: &str) -> Result<bool> {
        self.record("del", key)?;
        self.inner.del(key).await
    }

    async fn lpush(&mut self, list: &str, value: &str) -> Result<()> {
        self.record("lpush", list)?;
        self.inner.lpush(list, value).await
    }

    async fn move_tail_to_head(
        &mut self,
        src: &str,
        dst: &str,
        timeout: Option<Duration>,
    ) -> Result<Option<String>> {
        self.record("move_tail_to_head", src)?;
        self.inner.move_tail_to_head(src, dst, timeout).await
    }

    async fn lrem(&mut self, list: &str, count: i64, value: &str) -> Result<i64> {
        self.record("lrem", list)?;
        self.inner.lrem(list, count, value).await
    }

    async fn move_entry(&mut self, src: &str, dst: &str, value: &str) -> Result<bool> {
        self.record("move_entry", src)?;
        self.inner.move_entry(src, dst, value).await
    }

    async fn llen(&mut self, list: &str) -> Result<i64> {
        self.inner.llen(list).await
    }

    async fn lrange(&mut self, list: &str, start: isize, stop: isize) -> Result<Vec<String>> {
        self.inner.lrange(list, start, stop).await
    }
}

/// Hands out [`RecordingStore`] connections that share one log.
#[derive(Clone)]
pub struct RecordingConnector {
    pub store: RecordingStore,
    /// Number of successful connects before `connect` starts failing.
    pub connect_budget: Option<usize>,
    connects: Arc<StdMutex<usize>>,
}

impl RecordingConnector {
    pub fn new(store: RecordingStore) -> Self {
        Self {
            store,
            connect_budget: None,
            connects: Arc::new(StdMutex::new(0)),
        }
    }
}

#[async_trait]
impl Connector for RecordingConnector {
    type Store = RecordingStore;

    async fn connect(&self) -> Result<RecordingStore> {
        if let Ok(mut connects) = self.connects.lock() {
            if let Some(budget) = self.connect_budget
                && *connects >= budget
            {
                anyhow::bail!("connection refused");
            }
            *connects += 1;
        }
        Ok(self.store.clone())
    }

    fn describe(&self) -> String {
        "recording".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn failing_on_fails_every_call_and_still_records() {
        let mut store = RecordingStore::new(MemoryStore::new()).failing_on("lpush");
        assert!(store.lpush("list", "a").await.is_err());
        assert!(store.lpush("list", "b").await.is_err());
        store.set("key", "value", None).await.unwrap();

        assert_eq!(store.ops(), vec!["lpush list", "lpush list", "set key"]);
        assert_eq!(store.llen("list").await.unwrap(), 0);
    }
}
