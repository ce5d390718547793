use async_trait::async_trait;

use crate::errors::BeehiveResult;
use crate::models::Message;

/// 消息队列抽象，向Worker进程投递任务与控制消息
#[async_trait]
pub trait MessageQueue: Send + Sync {
    async fn publish_message(&self, queue: &str, message: &Message) -> BeehiveResult<()>;

    /// 非阻塞地取出当前可用的消息
    async fn consume_messages(&self, queue: &str) -> BeehiveResult<Vec<Message>>;

    async fn ack_message(&self, message_id: &str) -> BeehiveResult<()>;

    async fn nack_message(&self, message_id: &str, requeue: bool) -> BeehiveResult<()>;

    async fn create_queue(&self, queue: &str, durable: bool) -> BeehiveResult<()>;

    async fn delete_queue(&self, queue: &str) -> BeehiveResult<()>;

    async fn get_queue_size(&self, queue: &str) -> BeehiveResult<u32>;

    async fn purge_queue(&self, queue: &str) -> BeehiveResult<()>;
}
