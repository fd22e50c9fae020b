use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

/// A unit of work that can be bound to a job name.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn call(&self, args: Vec<Value>) -> Result<()>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(Vec<Value>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send,
{
    async fn call(&self, args: Vec<Value>) -> Result<()> {
        (self.0)(args).await
    }
}

/// Maps job names to handlers. Built before the pool starts and shared
/// read-only afterwards.
#[derive(Clone, Default)]
pub struct Registry {
    handlers: HashMap<String, Arc<dyn Handler>>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Installs `handler` under `name`, replacing any previous one.
    pub fn register<F, Fut>(&mut self, name: impl Into<String>, handler: F)
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let handler = Arc::new(FnHandler(handler)) as Arc<dyn Handler>;
        self.handlers.insert(name.into(), handler);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn registry_invokes_handler_with_positional_args() {
        let seen = Arc::new(tokio::sync::Mutex::new(Vec::new()));
        let mut registry = Registry::new();
        let sink = seen.clone();
        registry.register("Hello", move |args| {
            let sink = sink.clone();
            async move {
                sink.lock().await.extend(args);
                Ok::<(), anyhow::Error>(())
            }
        });

        let handler = registry.get("Hello").expect("handler not found");
        handler.call(vec![json!("World"), json!(1)]).await.unwrap();
        assert_eq!(*seen.lock().await, vec![json!("World"), json!(1)]);
    }

    #[tokio::test]
    async fn register_overwrites_existing_name() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = Registry::new();
        registry.register("job", |_args| async { Err::<(), _>(anyhow::anyhow!("old handler")) });
        let counter = calls.clone();
        registry.register("job", move |_args| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<(), anyhow::Error>(())
            }
        });

        registry.get("job").unwrap().call(Vec::new()).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(registry.names(), vec!["job".to_string()]);
    }

    #[test]
    fn lookup_of_unknown_name_is_none() {
        let registry = Registry::new();
        assert!(registry.get("missing").is_none());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn handler_errors_are_returned() {
        let mut registry = Registry::new();
        registry.register("fails", |args| async move {
            Err::<(), _>(anyhow::anyhow!("bad args: {}", args.len()))
        });
        let err = registry
            .get("fails")
            .unwrap()
            .call(vec![json!(1), json!(2)])
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "bad args: 2");
    }
}
