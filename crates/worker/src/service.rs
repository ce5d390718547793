use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use beehive_core::{
    BeehiveResult, Message, MessageQueue, MessageType, TaskControlAction, TaskDispatchMessage,
};
use beehive_infrastructure::MetricsCollector;

use crate::runner::TaskRunner;

/// Worker服务：从队列拉取消息并并发执行任务
///
/// 多个Worker进程可以共享同一个任务队列；并发上限以内的派发消息
/// 被派给执行器，超限的消息回投队尾。控制消息（撤销）只对持有该
/// 任务的Worker生效，其余Worker忽略。
pub struct WorkerService {
    worker_id: String,
    queue: Arc<dyn MessageQueue>,
    task_queue: String,
    runner: Arc<TaskRunner>,
    metrics: MetricsCollector,
    max_concurrent_tasks: usize,
    poll_interval: Duration,
    running: Arc<RwLock<HashMap<String, JoinHandle<()>>>>,
}

impl WorkerService {
    pub fn new(
        worker_id: String,
        queue: Arc<dyn MessageQueue>,
        task_queue: String,
        runner: Arc<TaskRunner>,
        metrics: MetricsCollector,
        max_concurrent_tasks: usize,
        poll_interval: Duration,
    ) -> Self {
        Self {
            worker_id,
            queue,
            task_queue,
            runner,
            metrics,
            max_concurrent_tasks,
            poll_interval,
            running: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// 按 hostname-pid 生成Worker标识
    pub fn generate_worker_id() -> String {
        let host = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown-host".to_string());
        format!("{}-{}", host, std::process::id())
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub async fn current_task_count(&self) -> usize {
        self.running.read().await.len()
    }

    /// 主消费循环，收到关闭信号后等待在途任务结束
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) -> BeehiveResult<()> {
        self.queue.create_queue(&self.task_queue, true).await?;
        info!(
            "Worker {} 开始消费队列 {} (并发上限: {})",
            self.worker_id, self.task_queue, self.max_concurrent_tasks
        );

        let mut interval = tokio::time::interval(self.poll_interval);
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Worker {} 收到关闭信号", self.worker_id);
                    break;
                }
                _ = interval.tick() => {
                    if let Err(e) = self.poll_once().await {
                        warn!("Worker {} 本轮拉取失败: {}", self.worker_id, e);
                    }
                }
            }
        }

        self.drain(Duration::from_secs(10)).await;
        info!("Worker {} 已停止", self.worker_id);
        Ok(())
    }

    /// 单轮拉取与分派，独立暴露便于测试
    pub async fn poll_once(&self) -> BeehiveResult<()> {
        self.reap_finished().await;

        let messages = self.queue.consume_messages(&self.task_queue).await?;
        for message in messages {
            let message_id = message.id.clone();
            match message.message_type {
                MessageType::TaskDispatch(dispatch) => {
                    self.handle_dispatch(message_id, dispatch).await?;
                }
                MessageType::TaskControl(control) => {
                    if control.action == TaskControlAction::Cancel {
                        self.handle_cancel(&control.task_id).await?;
                    }
                    self.queue.ack_message(&message_id).await?;
                }
            }
        }

        self.metrics
            .set_running_tasks(self.current_task_count().await);
        Ok(())
    }

    async fn handle_dispatch(
        &self,
        message_id: String,
        dispatch: TaskDispatchMessage,
    ) -> BeehiveResult<()> {
        if self.current_task_count().await >= self.max_concurrent_tasks {
            // 已到并发上限，消息回投队尾等待下一轮
            debug!(
                "Worker {} 并发已满，任务 {} 回投队列",
                self.worker_id, dispatch.task_id
            );
            self.queue
                .publish_message(&self.task_queue, &Message::task_dispatch(dispatch))
                .await?;
            self.queue.ack_message(&message_id).await?;
            return Ok(());
        }

        let task_id = dispatch.task_id.clone();
        let runner = Arc::clone(&self.runner);
        let running = Arc::clone(&self.running);
        let spawned_id = task_id.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = runner.execute(dispatch).await {
                error!("任务 {} 执行过程出错: {}", spawned_id, e);
            }
            running.write().await.remove(&spawned_id);
        });

        self.running.write().await.insert(task_id, handle);
        self.queue.ack_message(&message_id).await?;
        Ok(())
    }

    async fn handle_cancel(&self, task_id: &str) -> BeehiveResult<()> {
        let handle = self.running.write().await.remove(task_id);
        match handle {
            Some(handle) => {
                handle.abort();
                self.runner.mark_revoked(task_id).await?;
                info!("Worker {} 已中止任务 {}", self.worker_id, task_id);
            }
            None => {
                // 任务不在本Worker上运行；撤销标记已阻止其后续执行
                debug!(
                    "Worker {} 收到非本地任务 {} 的撤销请求，忽略",
                    self.worker_id, task_id
                );
            }
        }
        Ok(())
    }

    async fn reap_finished(&self) {
        let mut running = self.running.write().await;
        running.retain(|_, handle| !handle.is_finished());
    }

    /// 等待在途任务结束，超时后强制中止
    async fn drain(&self, grace: Duration) {
        let deadline = tokio::time::Instant::now() + grace;
        loop {
            self.reap_finished().await;
            if self.current_task_count().await == 0 {
                return;
            }
            if tokio::time::Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        let mut running = self.running.write().await;
        if !running.is_empty() {
            warn!(
                "Worker {} 关闭超时，强制中止 {} 个在途任务",
                self.worker_id,
                running.len()
            );
            for (_, handle) in running.drain() {
                handle.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::advancer::JobAdvancer;
    use crate::registry::{TaskContext, TaskHandler, TaskRegistry};
    use async_trait::async_trait;
    use beehive_core::{CallerIdentity, ResultStore, TaskKind, TaskStatus};
    use beehive_infrastructure::{InMemoryMessageQueue, MemoryResultStore};
    use serde_json::json;

    const TTL: Duration = Duration::from_secs(60);

    struct QuickHandler;

    #[async_trait]
    impl TaskHandler for QuickHandler {
        async fn run(
            &self,
            _ctx: &TaskContext,
            _args: &serde_json::Value,
            _kwargs: &serde_json::Value,
        ) -> beehive_core::BeehiveResult<serde_json::Value> {
            Ok(json!("done"))
        }
    }

    struct StallingHandler;

    #[async_trait]
    impl TaskHandler for StallingHandler {
        async fn run(
            &self,
            _ctx: &TaskContext,
            _args: &serde_json::Value,
            _kwargs: &serde_json::Value,
        ) -> beehive_core::BeehiveResult<serde_json::Value> {
            tokio::time::sleep(Duration::from_secs(600)).await;
            Ok(serde_json::Value::Null)
        }
    }

    fn build_service(
        store: Arc<MemoryResultStore>,
        queue: Arc<InMemoryMessageQueue>,
    ) -> WorkerService {
        let mut registry = TaskRegistry::new();
        registry.register("quick", TaskKind::Task, Arc::new(QuickHandler));
        registry.register("stalling", TaskKind::Task, Arc::new(StallingHandler));

        let advancer = Arc::new(JobAdvancer::new(
            store.clone(),
            queue.clone(),
            "tasks".to_string(),
            TTL,
            MetricsCollector::new(),
        ));
        let runner = Arc::new(TaskRunner::new(
            store,
            Arc::new(registry),
            advancer,
            None,
            MetricsCollector::new(),
            "worker-test".to_string(),
            TTL,
            Duration::from_secs(3600),
        ));
        WorkerService::new(
            "worker-test".to_string(),
            queue,
            "tasks".to_string(),
            runner,
            MetricsCollector::new(),
            4,
            Duration::from_millis(10),
        )
    }

    async fn publish_dispatch(queue: &InMemoryMessageQueue, name: &str) -> String {
        let dispatch = beehive_core::TaskDispatchMessage::standalone(
            name.to_string(),
            json!([]),
            json!({}),
            None,
        );
        let task_id = dispatch.task_id.clone();
        queue
            .publish_message("tasks", &Message::task_dispatch(dispatch))
            .await
            .unwrap();
        task_id
    }

    async fn wait_for_terminal(store: &MemoryResultStore, task_id: &str) -> TaskStatus {
        for _ in 0..100 {
            if let Ok(record) = store.get(task_id).await {
                if record.is_finished() {
                    return record.status;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("task {task_id} did not reach a terminal state");
    }

    #[tokio::test]
    async fn test_dispatch_message_is_executed() {
        let store = Arc::new(MemoryResultStore::new());
        let queue = Arc::new(InMemoryMessageQueue::new());
        let service = build_service(store.clone(), queue.clone());

        let task_id = publish_dispatch(&queue, "quick").await;
        service.poll_once().await.unwrap();

        assert_eq!(wait_for_terminal(&store, &task_id).await, TaskStatus::Success);
    }

    #[tokio::test]
    async fn test_cancel_aborts_running_task() {
        let store = Arc::new(MemoryResultStore::new());
        let queue = Arc::new(InMemoryMessageQueue::new());
        let service = build_service(store.clone(), queue.clone());

        let task_id = publish_dispatch(&queue, "stalling").await;
        service.poll_once().await.unwrap();

        // 等任务进入运行状态
        for _ in 0..100 {
            if let Ok(record) = store.get(&task_id).await {
                if record.status == TaskStatus::Progress {
                    break;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(service.current_task_count().await, 1);

        let control = beehive_core::TaskControlMessage {
            task_id: task_id.clone(),
            action: TaskControlAction::Cancel,
            requester: CallerIdentity::system().user,
            timestamp: chrono::Utc::now(),
        };
        queue
            .publish_message("tasks", &Message::task_control(control))
            .await
            .unwrap();
        service.poll_once().await.unwrap();

        // 撤销后状态为失败，绝不会静默成功
        assert_eq!(wait_for_terminal(&store, &task_id).await, TaskStatus::Failure);
        let record = store.get(&task_id).await.unwrap();
        assert!(record.traceback.unwrap()[0].contains("撤销"));
    }

    #[tokio::test]
    async fn test_over_capacity_message_is_requeued() {
        let store = Arc::new(MemoryResultStore::new());
        let queue = Arc::new(InMemoryMessageQueue::new());
        let mut service = build_service(store.clone(), queue.clone());
        service.max_concurrent_tasks = 1;

        let slow_id = publish_dispatch(&queue, "stalling").await;
        service.poll_once().await.unwrap();
        // 等慢任务占住唯一的并发额度
        for _ in 0..100 {
            if store.get(&slow_id).await.is_ok() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let _queued_id = publish_dispatch(&queue, "quick").await;
        service.poll_once().await.unwrap();

        // 超限的消息被回投而不是丢弃或标记失败
        assert_eq!(queue.get_queue_size("tasks").await.unwrap(), 1);
    }
}
