use crate::{
    config::RedisConfig,
    errors::{AppError, Result},
};
use redis::{aio::ConnectionManager, Client};
use std::time::Duration;

/// Open a Redis client without connecting
pub fn open_client(config: &RedisConfig) -> Result<Client> {
    Ok(Client::open(config.url.as_str())?)
}

/// Connect a connection manager, bounded by `timeout`
pub async fn connect(client: &Client, timeout: Duration) -> Result<ConnectionManager> {
    tracing::debug!("Connecting to Redis");

    let manager = tokio::time::timeout(timeout, ConnectionManager::new(client.clone()))
        .await
        .map_err(|_| AppError::StoreTimeout(timeout.as_millis() as u64))??;

    tracing::info!("Redis client connected");

    Ok(manager)
}

/// Health check for Redis connection
pub async fn health_check(manager: &mut ConnectionManager) -> Result<()> {
    let _: String = redis::cmd("PING").query_async(manager).await?;
    Ok(())
}
