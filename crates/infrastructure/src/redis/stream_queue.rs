use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use redis::streams::StreamReadReply;
use tracing::{debug, info, warn};

use beehive_core::{BeehiveError, BeehiveResult, Message, MessageQueue, QueueConfig};

use super::connection_manager::RedisConnectionManager;

const READ_BATCH_SIZE: usize = 32;

/// Message queue backed by Redis Streams with consumer groups.
///
/// Each message is stored as a single `payload` field holding the JSON
/// envelope. Consumed entries stay pending until acked, so a crashed
/// worker's messages can be reclaimed by the group.
pub struct RedisStreamQueue {
    connection: Arc<RedisConnectionManager>,
    consumer_group_prefix: String,
    consumer_name: String,
    /// message id -> (queue, stream entry id), required for ack/nack
    message_id_mapping: Mutex<HashMap<String, (String, String)>>,
}

impl RedisStreamQueue {
    pub async fn new(config: &QueueConfig, consumer_name: String) -> BeehiveResult<Self> {
        let connection = Arc::new(
            RedisConnectionManager::new(&config.redis_url, 3, std::time::Duration::from_secs(2))
                .await?,
        );
        Ok(Self {
            connection,
            consumer_group_prefix: config.consumer_group_prefix.clone(),
            consumer_name,
            message_id_mapping: Mutex::new(HashMap::new()),
        })
    }

    fn group_name(&self, queue: &str) -> String {
        format!("{}_{}", self.consumer_group_prefix, queue)
    }

    async fn ensure_consumer_group(&self, queue: &str) -> BeehiveResult<()> {
        let group = self.group_name(queue);
        let mut cmd = redis::cmd("XGROUP");
        cmd.arg("CREATE")
            .arg(queue)
            .arg(&group)
            .arg("0")
            .arg("MKSTREAM");

        match self.connection.execute_command::<String>(&mut cmd).await {
            Ok(_) => {
                debug!("Created consumer group {} for stream {}", group, queue);
                Ok(())
            }
            Err(e) => {
                if e.to_string().contains("BUSYGROUP") {
                    debug!("Consumer group {} already exists", group);
                    Ok(())
                } else {
                    Err(BeehiveError::MessageQueue(format!(
                        "Failed to create consumer group {group}: {e}"
                    )))
                }
            }
        }
    }

    fn remember_mapping(&self, message_id: &str, queue: &str, entry_id: &str) {
        if let Ok(mut mapping) = self.message_id_mapping.lock() {
            mapping.insert(
                message_id.to_string(),
                (queue.to_string(), entry_id.to_string()),
            );
        }
    }

    fn take_mapping(&self, message_id: &str) -> BeehiveResult<(String, String)> {
        let mut mapping = self.message_id_mapping.lock().map_err(|e| {
            BeehiveError::MessageQueue(format!("Failed to lock message mapping: {e}"))
        })?;
        mapping.remove(message_id).ok_or_else(|| {
            BeehiveError::MessageQueue(format!("Message ID {message_id} not found in mapping"))
        })
    }

    fn validate_queue_name(&self, queue: &str) -> BeehiveResult<()> {
        if queue.is_empty() {
            return Err(BeehiveError::MessageQueue(
                "Queue name cannot be empty".to_string(),
            ));
        }
        if queue.contains(' ') || queue.contains('\n') || queue.contains('\r') {
            return Err(BeehiveError::MessageQueue(
                "Queue name contains invalid characters".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl MessageQueue for RedisStreamQueue {
    async fn publish_message(&self, queue: &str, message: &Message) -> BeehiveResult<()> {
        self.validate_queue_name(queue)?;
        let payload = message
            .serialize()
            .map_err(|e| BeehiveError::Serialization(e.to_string()))?;

        let mut cmd = redis::cmd("XADD");
        cmd.arg(queue).arg("*").arg("payload").arg(payload);
        let entry_id: String = self.connection.execute_command(&mut cmd).await?;

        debug!(
            "Published message {} to stream {} as entry {}",
            message.id, queue, entry_id
        );
        Ok(())
    }

    async fn consume_messages(&self, queue: &str) -> BeehiveResult<Vec<Message>> {
        self.validate_queue_name(queue)?;
        let group = self.group_name(queue);

        let mut cmd = redis::cmd("XREADGROUP");
        cmd.arg("GROUP")
            .arg(&group)
            .arg(&self.consumer_name)
            .arg("COUNT")
            .arg(READ_BATCH_SIZE)
            .arg("STREAMS")
            .arg(queue)
            .arg(">");

        let reply: Option<StreamReadReply> =
            match self.connection.execute_command(&mut cmd).await {
                Ok(reply) => reply,
                Err(e) => {
                    if e.to_string().contains("NOGROUP") {
                        self.ensure_consumer_group(queue).await?;
                        return Ok(Vec::new());
                    }
                    return Err(e);
                }
            };

        let mut messages = Vec::new();
        if let Some(reply) = reply {
            for stream_key in reply.keys {
                for entry in stream_key.ids {
                    let payload: Option<String> = entry.get("payload");
                    let Some(payload) = payload else {
                        warn!(
                            "Stream entry {} in {} has no payload field, acking and skipping",
                            entry.id, queue
                        );
                        let mut ack = redis::cmd("XACK");
                        ack.arg(queue).arg(&group).arg(&entry.id);
                        let _: i64 = self.connection.execute_command(&mut ack).await?;
                        continue;
                    };
                    match Message::deserialize(&payload) {
                        Ok(message) => {
                            self.remember_mapping(&message.id, queue, &entry.id);
                            messages.push(message);
                        }
                        Err(e) => {
                            warn!(
                                "Dropping undecodable message at entry {} in {}: {}",
                                entry.id, queue, e
                            );
                            let mut ack = redis::cmd("XACK");
                            ack.arg(queue).arg(&group).arg(&entry.id);
                            let _: i64 = self.connection.execute_command(&mut ack).await?;
                        }
                    }
                }
            }
        }

        if !messages.is_empty() {
            debug!("Consumed {} messages from stream {}", messages.len(), queue);
        }
        Ok(messages)
    }

    async fn ack_message(&self, message_id: &str) -> BeehiveResult<()> {
        let (queue, entry_id) = self.take_mapping(message_id)?;
        let group = self.group_name(&queue);

        let mut cmd = redis::cmd("XACK");
        cmd.arg(&queue).arg(&group).arg(&entry_id);
        let acked: i64 = self.connection.execute_command(&mut cmd).await?;

        if acked == 0 {
            warn!(
                "Message {} was not acknowledged (possibly already processed)",
                message_id
            );
        }
        Ok(())
    }

    async fn nack_message(&self, message_id: &str, requeue: bool) -> BeehiveResult<()> {
        let (queue, entry_id) = self.take_mapping(message_id)?;
        let group = self.group_name(&queue);

        if requeue {
            // Copy the original payload to a fresh entry before acking.
            let mut range = redis::cmd("XRANGE");
            range.arg(&queue).arg(&entry_id).arg(&entry_id);
            let entries: Vec<(String, HashMap<String, String>)> =
                self.connection.execute_command(&mut range).await?;
            if let Some((_, fields)) = entries.into_iter().next() {
                if let Some(payload) = fields.get("payload") {
                    let mut add = redis::cmd("XADD");
                    add.arg(&queue).arg("*").arg("payload").arg(payload);
                    let _: String = self.connection.execute_command(&mut add).await?;
                }
            }
        }

        let mut cmd = redis::cmd("XACK");
        cmd.arg(&queue).arg(&group).arg(&entry_id);
        let _: i64 = self.connection.execute_command(&mut cmd).await?;

        debug!("Nacked message {} (requeue: {})", message_id, requeue);
        Ok(())
    }

    async fn create_queue(&self, queue: &str, durable: bool) -> BeehiveResult<()> {
        self.validate_queue_name(queue)?;
        debug!("Creating stream queue {} (durable: {})", queue, durable);
        self.ensure_consumer_group(queue).await
    }

    async fn delete_queue(&self, queue: &str) -> BeehiveResult<()> {
        let group = self.group_name(queue);
        let mut destroy = redis::cmd("XGROUP");
        destroy.arg("DESTROY").arg(queue).arg(&group);
        if let Err(e) = self.connection.execute_command::<i64>(&mut destroy).await {
            warn!("Failed to destroy consumer group {}: {}", group, e);
        }

        let mut cmd = redis::cmd("DEL");
        cmd.arg(queue);
        let deleted: i64 = self.connection.execute_command(&mut cmd).await?;
        if deleted > 0 {
            info!("Deleted stream queue {}", queue);
        }
        Ok(())
    }

    async fn get_queue_size(&self, queue: &str) -> BeehiveResult<u32> {
        let mut cmd = redis::cmd("XLEN");
        cmd.arg(queue);
        let size: u64 = self.connection.execute_command(&mut cmd).await?;
        Ok(size as u32)
    }

    async fn purge_queue(&self, queue: &str) -> BeehiveResult<()> {
        let mut cmd = redis::cmd("DEL");
        cmd.arg(queue);
        let _: i64 = self.connection.execute_command(&mut cmd).await?;
        self.ensure_consumer_group(queue).await?;
        info!("Purged stream queue {}", queue);
        Ok(())
    }
}
