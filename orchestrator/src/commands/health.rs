use anyhow::{Context, Result};

use workless::QueueStore;
use workless::store::{Connector, RedisConnector};

use super::shared::load_settings;

pub(crate) async fn check_store(config: Option<String>) -> Result<()> {
    let settings = load_settings(config.as_deref(), None)?;
    let connector = RedisConnector::new(settings.redis_dsn.as_str())?;
    let target = connector.describe();
    let mut store = connector.connect().await?;
    store
        .ping()
        .await
        .with_context(|| format!("Store check: FAIL ({target})"))?;
    println!("Store check: OK ({target})");
    Ok(())
}
