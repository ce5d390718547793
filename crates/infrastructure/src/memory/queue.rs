use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, info, warn};

use beehive_core::{BeehiveError, BeehiveResult, Message, MessageQueue};

/// 内存消息队列实现
///
/// 使用 Tokio channels 构建，适用于嵌入式部署与测试场景。
/// 消息一经消费即视为确认，不支持重新入队。
#[derive(Debug)]
pub struct InMemoryMessageQueue {
    queues: Arc<RwLock<HashMap<String, QueueChannels>>>,
}

#[derive(Debug)]
struct QueueChannels {
    sender: mpsc::UnboundedSender<Message>,
    receiver: Arc<Mutex<mpsc::UnboundedReceiver<Message>>>,
    size: Arc<AtomicU32>,
    _durable: bool,
}

impl QueueChannels {
    fn new(durable: bool) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: Arc::new(Mutex::new(receiver)),
            size: Arc::new(AtomicU32::new(0)),
            _durable: durable,
        }
    }
}

impl InMemoryMessageQueue {
    pub fn new() -> Self {
        Self {
            queues: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    async fn get_or_create_queue(&self, queue_name: &str, durable: bool) {
        let mut queues = self.queues.write().await;
        if !queues.contains_key(queue_name) {
            debug!("Creating new in-memory queue: {}", queue_name);
            queues.insert(queue_name.to_string(), QueueChannels::new(durable));
        }
    }
}

impl Default for InMemoryMessageQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageQueue for InMemoryMessageQueue {
    async fn publish_message(&self, queue: &str, message: &Message) -> BeehiveResult<()> {
        self.get_or_create_queue(queue, false).await;

        let queues = self.queues.read().await;
        let channels = queues.get(queue).ok_or_else(|| {
            BeehiveError::MessageQueue(format!("Queue '{queue}' not found"))
        })?;

        channels.sender.send(message.clone()).map_err(|e| {
            BeehiveError::MessageQueue(format!("Failed to send message to queue '{queue}': {e}"))
        })?;
        channels.size.fetch_add(1, Ordering::Relaxed);

        debug!("Published message {} to queue '{}'", message.id, queue);
        Ok(())
    }

    async fn consume_messages(&self, queue: &str) -> BeehiveResult<Vec<Message>> {
        self.get_or_create_queue(queue, false).await;

        let receiver = {
            let queues = self.queues.read().await;
            queues
                .get(queue)
                .map(|channels| channels.receiver.clone())
                .ok_or_else(|| {
                    BeehiveError::MessageQueue(format!("Queue '{queue}' not found"))
                })?
        };

        let mut messages = Vec::new();
        {
            let mut rx = receiver.lock().await;
            while let Ok(message) = rx.try_recv() {
                messages.push(message);
            }
        }

        if !messages.is_empty() {
            let queues = self.queues.read().await;
            if let Some(channels) = queues.get(queue) {
                channels
                    .size
                    .fetch_sub(messages.len() as u32, Ordering::Relaxed);
            }
            debug!("Consumed {} messages from queue '{}'", messages.len(), queue);
        }
        Ok(messages)
    }

    async fn ack_message(&self, message_id: &str) -> BeehiveResult<()> {
        // 内存队列中消息一旦消费就自动确认
        debug!("Acknowledging message: {}", message_id);
        Ok(())
    }

    async fn nack_message(&self, message_id: &str, requeue: bool) -> BeehiveResult<()> {
        if requeue {
            warn!(
                "Message {} nacked with requeue, but in-memory queue doesn't support requeue",
                message_id
            );
        }
        Ok(())
    }

    async fn create_queue(&self, queue: &str, durable: bool) -> BeehiveResult<()> {
        info!("Creating queue '{}' (durable: {})", queue, durable);
        self.get_or_create_queue(queue, durable).await;
        Ok(())
    }

    async fn delete_queue(&self, queue: &str) -> BeehiveResult<()> {
        let mut queues = self.queues.write().await;
        if let Some(channels) = queues.remove(queue) {
            drop(channels.sender);
            info!("Deleted queue '{}'", queue);
        } else {
            warn!("Queue '{}' not found for deletion", queue);
        }
        Ok(())
    }

    async fn get_queue_size(&self, queue: &str) -> BeehiveResult<u32> {
        let queues = self.queues.read().await;
        queues
            .get(queue)
            .map(|channels| channels.size.load(Ordering::Relaxed))
            .ok_or_else(|| BeehiveError::MessageQueue(format!("Queue '{queue}' not found")))
    }

    async fn purge_queue(&self, queue: &str) -> BeehiveResult<()> {
        let receiver = {
            let queues = self.queues.read().await;
            queues
                .get(queue)
                .map(|channels| channels.receiver.clone())
                .ok_or_else(|| {
                    BeehiveError::MessageQueue(format!("Queue '{queue}' not found"))
                })?
        };

        let mut purged = 0;
        {
            let mut rx = receiver.lock().await;
            while rx.try_recv().is_ok() {
                purged += 1;
            }
        }

        let queues = self.queues.read().await;
        if let Some(channels) = queues.get(queue) {
            channels.size.store(0, Ordering::Relaxed);
        }

        info!("Purged {} messages from queue '{}'", purged, queue);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beehive_core::TaskDispatchMessage;
    use serde_json::json;

    fn dispatch_message(name: &str) -> Message {
        Message::task_dispatch(TaskDispatchMessage::standalone(
            name.to_string(),
            json!([]),
            json!({}),
            None,
        ))
    }

    #[tokio::test]
    async fn test_publish_and_consume() {
        let queue = InMemoryMessageQueue::new();
        queue.create_queue("tasks", false).await.unwrap();

        let message = dispatch_message("echo");
        queue.publish_message("tasks", &message).await.unwrap();
        assert_eq!(queue.get_queue_size("tasks").await.unwrap(), 1);

        let messages = queue.consume_messages("tasks").await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].id, message.id);
        assert_eq!(queue.get_queue_size("tasks").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_multiple_queues_are_isolated() {
        let queue = InMemoryMessageQueue::new();
        let m1 = dispatch_message("a");
        let m2 = dispatch_message("b");

        queue.publish_message("q1", &m1).await.unwrap();
        queue.publish_message("q2", &m2).await.unwrap();

        let from_q1 = queue.consume_messages("q1").await.unwrap();
        let from_q2 = queue.consume_messages("q2").await.unwrap();
        assert_eq!(from_q1.len(), 1);
        assert_eq!(from_q1[0].id, m1.id);
        assert_eq!(from_q2.len(), 1);
        assert_eq!(from_q2[0].id, m2.id);
    }

    #[tokio::test]
    async fn test_purge_queue() {
        let queue = InMemoryMessageQueue::new();
        for i in 0..5 {
            queue
                .publish_message("tasks", &dispatch_message(&format!("task_{i}")))
                .await
                .unwrap();
        }
        assert_eq!(queue.get_queue_size("tasks").await.unwrap(), 5);

        queue.purge_queue("tasks").await.unwrap();
        assert_eq!(queue.get_queue_size("tasks").await.unwrap(), 0);
        assert!(queue.consume_messages("tasks").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_queue() {
        let queue = InMemoryMessageQueue::new();
        queue.create_queue("tasks", false).await.unwrap();
        queue.delete_queue("tasks").await.unwrap();
        assert!(queue.get_queue_size("tasks").await.is_err());
    }
}
