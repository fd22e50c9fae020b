use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::AsyncCommands;
use redis::Script;
use redis::aio::MultiplexedConnection;

use super::{Connector, QueueStore};

const MOVE_ENTRY_LUA: &str = include_str!("../lua/move_entry.lua");

/// Headroom between a blocking fetch timeout and the client-side response
/// timeout, so the server always answers first.
const RESPONSE_TIMEOUT_MARGIN: Duration = Duration::from_secs(5);
const DEFAULT_BLOCKING_TIMEOUT: Duration = Duration::from_secs(10);

fn summarize_redis_dsn(dsn: &str) -> String {
    let (scheme, rest) = dsn.split_once("://").unwrap_or(("", dsn));
    let without_auth = rest.rsplit('@').next().unwrap_or(rest);
    let host = without_auth
        .split(['/', '?', '#'])
        .next()
        .unwrap_or(without_auth);

    if scheme.is_empty() {
        host.to_string()
    } else if host.is_empty() {
        format!("{scheme}://")
    } else {
        format!("{scheme}://{host}")
    }
}

fn is_tls_handshake_error(err: &redis::RedisError) -> bool {
    let message = err.to_string().to_ascii_lowercase();
    message.contains("tls handshake") || message.contains("handshake eof")
}

fn redis_connect_context(dsn: &str, err: &redis::RedisError) -> String {
    let summary = summarize_redis_dsn(dsn);
    let mut context = if summary.is_empty() {
        "failed to connect to Redis".to_string()
    } else {
        format!("failed to connect to Redis ({summary})")
    };

    if is_tls_handshake_error(err) {
        if dsn.starts_with("rediss://") {
            context.push_str(
                "; TLS handshake failed - verify the endpoint supports TLS and the port/certs are correct",
            );
        } else {
            context.push_str(
                "; TLS handshake failed - if Redis requires TLS, use rediss:// for the DSN",
            );
        }
    }

    context
}

/// Opens one dedicated multiplexed connection per call, so blocking
/// commands issued by one worker never stall another.
#[derive(Clone)]
pub struct RedisConnector {
    client: redis::Client,
    dsn: String,
    blocking_timeout: Duration,
}

impl RedisConnector {
    pub fn new(dsn: impl Into<String>) -> Result<Self> {
        let dsn = dsn.into();
        let client =
            redis::Client::open(dsn.as_str()).with_context(|| "failed to create Redis client")?;
        Ok(Self {
            client,
            dsn,
            blocking_timeout: DEFAULT_BLOCKING_TIMEOUT,
        })
    }

    /// Longest blocking fetch the connections will be asked to perform.
    pub fn with_blocking_timeout(mut self, timeout: Duration) -> Self {
        self.blocking_timeout = timeout;
        self
    }
}

#[async_trait]
impl Connector for RedisConnector {
    type Store = RedisStore;

    async fn connect(&self) -> Result<RedisStore> {
        let config = redis::AsyncConnectionConfig::new()
            .set_response_timeout(self.blocking_timeout + RESPONSE_TIMEOUT_MARGIN);
        let conn = self
            .client
            .get_multiplexed_async_connection_with_config(&config)
            .await
            .map_err(|err| {
                let context = redis_connect_context(&self.dsn, &err);
                anyhow::Error::new(err).context(context)
            })?;
        Ok(RedisStore::with_connection(conn))
    }

    fn describe(&self) -> String {
        summarize_redis_dsn(&self.dsn)
    }

    fn max_blocking_timeout(&self) -> Option<Duration> {
        Some(self.blocking_timeout)
    }
}

#[derive(Clone)]
pub struct RedisStore {
    conn: MultiplexedConnection,
    move_entry_script: Script,
}

impl RedisStore {
    pub fn with_connection(conn: MultiplexedConnection) -> Self {
        Self {
            conn,
            move_entry_script: Script::new(MOVE_ENTRY_LUA),
        }
    }
}

#[async_trait]
impl QueueStore for RedisStore {
    async fn ping(&mut self) -> Result<()> {
        let _: String = redis::cmd("PING")
            .query_async(&mut self.conn)
            .await
            .context("Redis PING failed")?;
        Ok(())
    }

    async fn set(&mut self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl
            && !ttl.is_zero()
        {
            cmd.arg("PX").arg(ttl.as_millis().max(1) as u64);
        }
        cmd.query_async::<()>(&mut self.conn).await?;
        Ok(())
    }

    async fn get(&mut self, key: &str) -> Result<Option<String>> {
        let value: Option<String> = self.conn.get(key).await?;
        Ok(value)
    }

    async fn del(&mut self, key: &str) -> Result<bool> {
        let removed: i64 = self.conn.del(key).await?;
        Ok(removed > 0)
    }

    async fn lpush(&mut self, list: &str, value: &str) -> Result<()> {
        self.conn.lpush::<_, _, ()>(list, value).await?;
        Ok(())
    }

    async fn move_tail_to_head(
        &mut self,
        src: &str,
        dst: &str,
        timeout: Option<Duration>,
    ) -> Result<Option<String>> {
        let moved: Option<String> = match timeout {
            Some(timeout) if !timeout.is_zero() => {
                redis::cmd("BRPOPLPUSH")
                    .arg(src)
                    .arg(dst)
                    .arg(timeout.as_secs_f64())
                    .query_async(&mut self.conn)
                    .await?
            }
            _ => {
                redis::cmd("RPOPLPUSH")
                    .arg(src)
                    .arg(dst)
                    .query_async(&mut self.conn)
                    .await?
            }
        };
        Ok(moved.filter(|value| !value.is_empty()))
    }

    async fn lrem(&mut self, list: &str, count: i64, value: &str) -> Result<i64> {
        let removed: i64 = redis::cmd("LREM")
            .arg(list)
            .arg(count)
            .arg(value)
            .query_async(&mut self.conn)
            .await?;
        Ok(removed)
    }

    async fn move_entry(&mut self, src: &str, dst: &str, value: &str) -> Result<bool> {
        let mut invocation = self.move_entry_script.key(src);
        invocation.key(dst);
        invocation.arg(value);
        let moved: i64 = invocation.invoke_async(&mut self.conn).await?;
        Ok(moved > 0)
    }

    async fn llen(&mut self, list: &str) -> Result<i64> {
        let len: i64 = self.conn.llen(list).await?;
        Ok(len)
    }

    async fn lrange(&mut self, list: &str, start: isize, stop: isize) -> Result<Vec<String>> {
        let values: Vec<String> = self.conn.lrange(list, start, stop).await?;
        Ok(values)
    }
}

#[cfg(test)]
impl RedisStore {
    pub(crate) async fn delete_matching(&mut self, pattern: &str) -> Result<usize> {
        let keys: Vec<String> = self.conn.keys(pattern).await?;
        if keys.is_empty() {
            return Ok(0);
        }
        let removed: usize = self.conn.del(&keys).await?;
        Ok(removed)
    }
}
