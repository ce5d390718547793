use redis::{Client, Connection, RedisResult};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, warn};

use beehive_core::{BeehiveError, BeehiveResult};

/// Redis connection handling with bounded reconnect retries.
///
/// Connection failures map to `StoreUnavailable` so callers can decide
/// whether to propagate or degrade.
pub struct RedisConnectionManager {
    client: Client,
    max_retry_attempts: u32,
    retry_delay: Duration,
}

impl RedisConnectionManager {
    pub async fn new(
        redis_url: &str,
        max_retry_attempts: u32,
        retry_delay: Duration,
    ) -> BeehiveResult<Self> {
        let client = Client::open(redis_url).map_err(|e| {
            BeehiveError::StoreUnavailable(format!("Failed to create Redis client: {e}"))
        })?;

        let manager = Self {
            client,
            max_retry_attempts,
            retry_delay,
        };
        manager.test_connection().await?;
        debug!("Successfully connected to Redis at {}", redis_url);

        Ok(manager)
    }

    pub async fn get_connection(&self) -> BeehiveResult<Connection> {
        let mut last_error = None;

        for attempt in 0..self.max_retry_attempts {
            match self.client.get_connection() {
                Ok(conn) => {
                    if attempt > 0 {
                        debug!(
                            "Successfully reconnected to Redis after {} attempts",
                            attempt + 1
                        );
                    }
                    return Ok(conn);
                }
                Err(e) => {
                    last_error = Some(e);
                    if attempt < self.max_retry_attempts - 1 {
                        warn!(
                            "Failed to connect to Redis (attempt {}/{}): {}. Retrying in {:?}...",
                            attempt + 1,
                            self.max_retry_attempts,
                            last_error.as_ref().map(|e| e.to_string()).unwrap_or_default(),
                            self.retry_delay
                        );
                        sleep(self.retry_delay).await;
                    }
                }
            }
        }

        let error_msg = format!(
            "Failed to connect to Redis after {} attempts. Last error: {}",
            self.max_retry_attempts,
            last_error.map_or("Unknown".to_string(), |e| e.to_string())
        );
        error!("{}", error_msg);
        Err(BeehiveError::StoreUnavailable(error_msg))
    }

    async fn test_connection(&self) -> BeehiveResult<()> {
        let mut conn = self.get_connection().await?;
        let result: RedisResult<String> = redis::cmd("PING").query(&mut conn);
        match result {
            Ok(response) if response == "PONG" => {
                debug!("Redis connection test successful");
                Ok(())
            }
            Ok(response) => Err(BeehiveError::StoreUnavailable(format!(
                "Unexpected PING response: {response}"
            ))),
            Err(e) => Err(BeehiveError::StoreUnavailable(format!(
                "Redis PING failed: {e}"
            ))),
        }
    }

    pub async fn execute_command<T: redis::FromRedisValue>(
        &self,
        cmd: &mut redis::Cmd,
    ) -> BeehiveResult<T> {
        let mut conn = self.get_connection().await?;
        cmd.query(&mut conn)
            .map_err(|e| BeehiveError::StoreUnavailable(format!("Redis command failed: {e}")))
    }

    pub async fn health_check(&self) -> bool {
        match self.test_connection().await {
            Ok(()) => true,
            Err(e) => {
                warn!("Redis health check failed: {}", e);
                false
            }
        }
    }
}
