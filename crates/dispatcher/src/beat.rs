use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use beehive_core::{
    BeehiveError, BeehiveResult, Message, MessageQueue, ScheduleEntry, TaskDispatchMessage,
};
use beehive_infrastructure::MetricsCollector;

use crate::registry::ScheduleRegistry;

/// Beat调度分发器
///
/// 每个tick计算到期的调度条目并触发任务提交。提交失败时不推进
/// `last_run_at`/`total_run_count`，条目保持到期状态下个tick重试；
/// 单个条目的失败永远不会中断循环。同一个注册表同时只能运行一个
/// Beat实例，否则会重复触发（运维约束，代码内不加锁）。
pub struct BeatDispatcher {
    registry: Arc<ScheduleRegistry>,
    queue: Arc<dyn MessageQueue>,
    task_queue: String,
    tick_interval: Duration,
    metrics: MetricsCollector,
}

impl BeatDispatcher {
    pub fn new(
        registry: Arc<ScheduleRegistry>,
        queue: Arc<dyn MessageQueue>,
        task_queue: String,
        tick_interval: Duration,
        metrics: MetricsCollector,
    ) -> Self {
        Self {
            registry,
            queue,
            task_queue,
            tick_interval,
            metrics,
        }
    }

    /// 主循环，直到收到关闭信号
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) -> BeehiveResult<()> {
        info!(
            "Beat启动, tick间隔: {:?}, 任务队列: {}",
            self.tick_interval, self.task_queue
        );
        let mut interval = tokio::time::interval(self.tick_interval);
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Beat收到关闭信号");
                    break;
                }
                _ = interval.tick() => {
                    let start = std::time::Instant::now();
                    match self.tick_once(Utc::now()).await {
                        Ok(fired) if fired > 0 => {
                            debug!("本轮tick触发了 {} 个调度条目", fired);
                        }
                        Ok(_) => {}
                        Err(e) => {
                            // 注册表整体不可读也不终止循环
                            error!("Beat tick失败: {}", e);
                        }
                    }
                    self.metrics
                        .record_beat_tick_duration(start.elapsed().as_secs_f64());
                }
            }
        }
        Ok(())
    }

    /// 单轮到期计算与触发，返回本轮触发数量
    pub async fn tick_once(&self, now: DateTime<Utc>) -> BeehiveResult<usize> {
        let entries = self.registry.list_all().await?;
        let mut fired = 0usize;

        for (name, mut entry) in entries {
            let due = match entry.is_due(now) {
                Ok(due) => due,
                Err(e) => {
                    warn!("调度条目 {} 的说明无法求值: {}", name, e);
                    continue;
                }
            };
            if !due {
                continue;
            }

            match self.fire(&entry).await {
                Ok(task_id) => {
                    debug!("调度条目 {} 触发了任务 {}", name, task_id);
                    entry.mark_fired(now);
                    if let Err(e) = self.registry.persist_runtime(&entry).await {
                        // 触发已发生但没记下来，下个tick可能重复触发
                        warn!("调度条目 {} 的运行期字段回写失败: {}", name, e);
                    }
                    self.metrics.record_schedule_fired(&name);
                    fired += 1;
                }
                Err(e) => {
                    // 条目保持到期，下个tick重试
                    warn!("调度条目 {} 触发失败，保持到期状态: {}", name, e);
                    self.metrics.record_schedule_dispatch_error(&name);
                }
            }
        }
        Ok(fired)
    }

    /// 把条目对应的任务提交到队列
    async fn fire(&self, entry: &ScheduleEntry) -> BeehiveResult<String> {
        let message = TaskDispatchMessage::standalone(
            entry.task.clone(),
            entry.args.clone(),
            entry.kwargs.clone(),
            Some("beat".to_string()),
        );
        let task_id = message.task_id.clone();
        let queue_name = entry.options.queue.as_deref().unwrap_or(&self.task_queue);

        self.queue
            .publish_message(queue_name, &Message::task_dispatch(message))
            .await
            .map_err(|e| BeehiveError::ScheduleDispatch(format!("{}: {e}", entry.name)))?;
        Ok(task_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use beehive_core::{
        CrontabSpec, IntervalSpec, ScheduleSpec, ScheduleStore, SubmitOptions,
    };
    use beehive_infrastructure::{InMemoryMessageQueue, MemoryResultStore};
    use chrono::TimeZone;
    use serde_json::json;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    struct Fixture {
        store: Arc<MemoryResultStore>,
        queue: Arc<InMemoryMessageQueue>,
        registry: Arc<ScheduleRegistry>,
        beat: BeatDispatcher,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryResultStore::new());
        let queue = Arc::new(InMemoryMessageQueue::new());
        let registry = Arc::new(ScheduleRegistry::new(store.clone()));
        let beat = BeatDispatcher::new(
            registry.clone(),
            queue.clone(),
            "tasks".to_string(),
            Duration::from_secs(1),
            MetricsCollector::new(),
        );
        Fixture {
            store,
            queue,
            registry,
            beat,
        }
    }

    fn nightly_entry() -> ScheduleEntry {
        let mut entry = ScheduleEntry::new(
            "nightly".to_string(),
            "nightly_cleanup".to_string(),
            ScheduleSpec::Crontab(CrontabSpec {
                minute: "0".to_string(),
                hour: "4".to_string(),
                ..Default::default()
            }),
            json!([7]),
            json!({"dry_run": false}),
            SubmitOptions::default(),
            false,
        );
        entry.last_run_at = utc(2024, 3, 1, 12, 0, 0);
        entry
    }

    #[tokio::test]
    async fn test_crontab_entry_fires_once_at_four() {
        let f = fixture();
        f.store.upsert_entry(&nightly_entry()).await.unwrap();

        // 凌晨4点前不触发
        assert_eq!(f.beat.tick_once(utc(2024, 3, 2, 3, 59, 0)).await.unwrap(), 0);

        // 到点触发一次
        let fired = f.beat.tick_once(utc(2024, 3, 2, 4, 0, 30)).await.unwrap();
        assert_eq!(fired, 1);

        let entry = f.registry.get("nightly").await.unwrap();
        assert_eq!(entry.total_run_count, 1);
        assert_eq!(entry.last_run_at, utc(2024, 3, 2, 4, 0, 30));

        let messages = f.queue.consume_messages("tasks").await.unwrap();
        assert_eq!(messages.len(), 1);

        // 同一到期点不再重复触发
        assert_eq!(f.beat.tick_once(utc(2024, 3, 2, 4, 1, 0)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_interval_entry_fires_and_advances() {
        let f = fixture();
        let mut entry = ScheduleEntry::new(
            "minutely".to_string(),
            "heartbeat".to_string(),
            ScheduleSpec::Interval(IntervalSpec::from_seconds(60)),
            json!([]),
            json!({}),
            SubmitOptions::default(),
            true,
        );
        entry.last_run_at = utc(2024, 3, 1, 10, 0, 0);
        f.store.upsert_entry(&entry).await.unwrap();

        assert_eq!(f.beat.tick_once(utc(2024, 3, 1, 10, 0, 30)).await.unwrap(), 0);
        assert_eq!(f.beat.tick_once(utc(2024, 3, 1, 10, 1, 5)).await.unwrap(), 1);

        let after = f.registry.get("minutely").await.unwrap();
        assert_eq!(after.total_run_count, 1);
    }

    #[tokio::test]
    async fn test_custom_queue_option_is_honored() {
        let f = fixture();
        let mut entry = nightly_entry();
        entry.options = SubmitOptions {
            queue: Some("maintenance".to_string()),
        };
        f.store.upsert_entry(&entry).await.unwrap();

        f.beat.tick_once(utc(2024, 3, 2, 4, 0, 30)).await.unwrap();
        assert_eq!(f.queue.consume_messages("maintenance").await.unwrap().len(), 1);
        assert!(f.queue.consume_messages("tasks").await.unwrap().is_empty());
    }

    /// 始终发布失败的队列
    struct BrokenQueue;

    #[async_trait]
    impl MessageQueue for BrokenQueue {
        async fn publish_message(&self, _q: &str, _m: &Message) -> BeehiveResult<()> {
            Err(BeehiveError::MessageQueue("broker unreachable".to_string()))
        }
        async fn consume_messages(&self, _q: &str) -> BeehiveResult<Vec<Message>> {
            Ok(vec![])
        }
        async fn ack_message(&self, _id: &str) -> BeehiveResult<()> {
            Ok(())
        }
        async fn nack_message(&self, _id: &str, _requeue: bool) -> BeehiveResult<()> {
            Ok(())
        }
        async fn create_queue(&self, _q: &str, _durable: bool) -> BeehiveResult<()> {
            Ok(())
        }
        async fn delete_queue(&self, _q: &str) -> BeehiveResult<()> {
            Ok(())
        }
        async fn get_queue_size(&self, _q: &str) -> BeehiveResult<u32> {
            Ok(0)
        }
        async fn purge_queue(&self, _q: &str) -> BeehiveResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_failed_dispatch_leaves_entry_due() {
        let store = Arc::new(MemoryResultStore::new());
        let registry = Arc::new(ScheduleRegistry::new(store.clone()));
        let beat = BeatDispatcher::new(
            registry.clone(),
            Arc::new(BrokenQueue),
            "tasks".to_string(),
            Duration::from_secs(1),
            MetricsCollector::new(),
        );
        store.upsert_entry(&nightly_entry()).await.unwrap();

        // 提交失败：循环不报错，计数与时间戳都不推进
        let fired = beat.tick_once(utc(2024, 3, 2, 4, 0, 30)).await.unwrap();
        assert_eq!(fired, 0);

        let entry = registry.get("nightly").await.unwrap();
        assert_eq!(entry.total_run_count, 0);
        assert_eq!(entry.last_run_at, utc(2024, 3, 1, 12, 0, 0));
        // 条目保持到期，下个tick仍会尝试
        assert!(entry.is_due(utc(2024, 3, 2, 4, 1, 0)).unwrap());
    }
}
