use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use super::{Connector, QueueStore};

#[derive(Default)]
struct State {
    values: HashMap<String, (String, Option<Instant>)>,
    lists: HashMap<String, VecDeque<String>>,
}

impl State {
    fn live_value(&mut self, key: &str) -> Option<&String> {
        let expired = matches!(
            self.values.get(key),
            Some((_, Some(expires_at))) if *expires_at <= Instant::now()
        );
        if expired {
            self.values.remove(key);
            return None;
        }
        self.values.get(key).map(|(value, _)| value)
    }

    fn pop_push(&mut self, src: &str, dst: &str) -> Option<String> {
        let entries = self.lists.get_mut(src)?;
        let value = entries.pop_back()?;
        if entries.is_empty() {
            self.lists.remove(src);
        }
        self.lists
            .entry(dst.to_string())
            .or_default()
            .push_front(value.clone());
        Some(value)
    }

    fn remove(&mut self, list: &str, count: i64, value: &str) -> i64 {
        let Some(entries) = self.lists.get_mut(list) else {
            return 0;
        };
        let limit = if count == 0 {
            usize::MAX
        } else {
            count.unsigned_abs() as usize
        };
        let mut removed = 0usize;
        if count >= 0 {
            let mut index = 0;
            while index < entries.len() && removed < limit {
                if entries[index] == value {
                    entries.remove(index);
                    removed += 1;
                } else {
                    index += 1;
                }
            }
        } else {
            let mut index = entries.len();
            while index > 0 && removed < limit {
                index -= 1;
                if entries[index] == value {
                    entries.remove(index);
                    removed += 1;
                }
            }
        }
        if entries.is_empty() {
            self.lists.remove(list);
        }
        removed as i64
    }
}

struct Shared {
    state: Mutex<State>,
    pushed: Notify,
}

/// In-process store with Redis list and expiry semantics.
///
/// Clones share the same data, so a `MemoryStore` doubles as its own
/// [`Connector`]: every "connection" sees the same lists.
#[derive(Clone)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::default()),
                pushed: Notify::new(),
            }),
        }
    }

    /// Remaining lifetime of a key: `None` if missing, `Some(None)` if it
    /// never expires.
    pub async fn ttl(&self, key: &str) -> Option<Option<Duration>> {
        let mut state = self.shared.state.lock().await;
        state.live_value(key)?;
        let (_, expires_at) = state.values.get(key)?;
        Some(expires_at.map(|at| at.saturating_duration_since(Instant::now())))
    }

    pub async fn keys(&self) -> Vec<String> {
        let mut state = self.shared.state.lock().await;
        let keys: Vec<String> = state.values.keys().cloned().collect();
        let mut live: Vec<String> = keys
            .into_iter()
            .filter(|key| state.live_value(key).is_some())
            .collect();
        live.extend(state.lists.keys().cloned());
        live.sort();
        live
    }

    /// Contents of several lists read under one lock, head first.
    pub async fn snapshot(&self, lists: &[&str]) -> Vec<Vec<String>> {
        let state = self.shared.state.lock().await;
        lists
            .iter()
            .map(|list| {
                state
                    .lists
                    .get(*list)
                    .map(|entries| entries.iter().cloned().collect())
                    .unwrap_or_default()
            })
            .collect()
    }
}

#[async_trait]
impl QueueStore for MemoryStore {
    async fn ping(&mut self) -> Result<()> {
        Ok(())
    }

    async fn set(&mut self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let expires_at = ttl
            .filter(|ttl| !ttl.is_zero())
            .map(|ttl| Instant::now() + ttl);
        let mut state = self.shared.state.lock().await;
        state
            .values
            .insert(key.to_string(), (value.to_string(), expires_at));
        Ok(())
    }

    async fn get(&mut self, key: &str) -> Result<Option<String>> {
        let mut state = self.shared.state.lock().await;
        Ok(state.live_value(key).cloned())
    }

    async fn del(&mut self, key: &str) -> Result<bool> {
        let mut state = self.shared.state.lock().await;
        let existed = state.live_value(key).is_some();
        state.values.remove(key);
        Ok(existed)
    }

    async fn lpush(&mut self, list: &str, value: &str) -> Result<()> {
        {
            let mut state = self.shared.state.lock().await;
            state
                .lists
                .entry(list.to_string())
                .or_default()
                .push_front(value.to_string());
        }
        self.shared.pushed.notify_waiters();
        Ok(())
    }

    async fn move_tail_to_head(
        &mut self,
        src: &str,
        dst: &str,
        timeout: Option<Duration>,
    ) -> Result<Option<String>> {
        let deadline = timeout
            .filter(|timeout| !timeout.is_zero())
            .map(|timeout| Instant::now() + timeout);
        loop {
            let notified = self.shared.pushed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let moved = {
                let mut state = self.shared.state.lock().await;
                state.pop_push(src, dst)
            };
            if moved.is_some() {
                self.shared.pushed.notify_waiters();
                return Ok(moved);
            }
            let Some(deadline) = deadline else {
                return Ok(None);
            };
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn lrem(&mut self, list: &str, count: i64, value: &str) -> Result<i64> {
        let mut state = self.shared.state.lock().await;
        Ok(state.remove(list, count, value))
    }

    async fn move_entry(&mut self, src: &str, dst: &str, value: &str) -> Result<bool> {
        let moved = {
            let mut state = self.shared.state.lock().await;
            if state.remove(src, 1, value) == 0 {
                false
            } else {
                state
                    .lists
                    .entry(dst.to_string())
                    .or_default()
                    .push_front(value.to_string());
                true
            }
        };
        if moved {
            self.shared.pushed.notify_waiters();
        }
        Ok(moved)
    }

    async fn llen(&mut self, list: &str) -> Result<i64> {
        let state = self.shared.state.lock().await;
        Ok(state.lists.get(list).map_or(0, |entries| entries.len() as i64))
    }

    async fn lrange(&mut self, list: &str, start: isize, stop: isize) -> Result<Vec<String>> {
        let state = self.shared.state.lock().await;
        let Some(entries) = state.lists.get(list) else {
            return Ok(Vec::new());
        };
        let len = entries.len() as isize;
        let start = if start < 0 { (len + start).max(0) } else { start };
        let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
        if start > stop || start >= len {
            return Ok(Vec::new());
        }
        Ok(entries
            .iter()
            .skip(start as usize)
            .take((stop - start + 1) as usize)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl Connector for MemoryStore {
    type Store = MemoryStore;

    async fn connect(&self) -> Result<MemoryStore> {
        Ok(self.clone())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}
