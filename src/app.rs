use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;

use beehive_core::{
    AppConfig, BackendKind, MessageQueue, ResultStore, ScheduleStore, TaskArchive, TaskKind,
};
use beehive_dispatcher::{BeatDispatcher, ScheduleRegistry};
use beehive_infrastructure::{
    InMemoryMessageQueue, MemoryResultStore, MetricsCollector, RedisResultStore, RedisStreamQueue,
    SqliteTaskArchive,
};
use beehive_worker::{
    HttpHandler, JobAdvancer, ShellHandler, SleepHandler, TaskRegistry, TaskRunner, WorkerService,
};

use crate::shutdown::ShutdownManager;

/// 应用运行模式
#[derive(Debug, Clone, Copy)]
pub enum AppMode {
    /// 仅运行Worker
    Worker,
    /// 仅运行Beat
    Beat,
    /// 运行所有组件
    All,
}

/// 主应用程序
pub struct Application {
    config: AppConfig,
    mode: AppMode,
    store: Arc<dyn ResultStore>,
    schedule_store: Arc<dyn ScheduleStore>,
    queue: Arc<dyn MessageQueue>,
    archive: Option<Arc<dyn TaskArchive>>,
    metrics: MetricsCollector,
    worker_id: String,
}

impl Application {
    /// 创建新的应用实例
    pub async fn new(config: AppConfig, mode: AppMode) -> Result<Self> {
        info!("初始化应用程序，模式: {:?}", mode);

        let worker_id = if config.worker.worker_id.is_empty() {
            WorkerService::generate_worker_id()
        } else {
            config.worker.worker_id.clone()
        };

        let (store, schedule_store): (Arc<dyn ResultStore>, Arc<dyn ScheduleStore>) =
            match config.store.backend {
                BackendKind::Memory => {
                    let store = Arc::new(MemoryResultStore::new());
                    (store.clone(), store)
                }
                BackendKind::Redis => {
                    let store = Arc::new(
                        RedisResultStore::new(&config.store)
                            .await
                            .context("连接Redis结果存储失败")?,
                    );
                    (store.clone(), store)
                }
            };

        let queue: Arc<dyn MessageQueue> = match config.queue.backend {
            BackendKind::Memory => Arc::new(InMemoryMessageQueue::new()),
            BackendKind::Redis => Arc::new(
                RedisStreamQueue::new(&config.queue, worker_id.clone())
                    .await
                    .context("连接Redis消息队列失败")?,
            ),
        };

        let archive: Option<Arc<dyn TaskArchive>> = if config.archive.enabled {
            let archive = SqliteTaskArchive::new(&config.archive.sqlite_path)
                .await
                .context("打开任务归档失败")?;
            Some(Arc::new(archive))
        } else {
            None
        };

        Ok(Self {
            config,
            mode,
            store,
            schedule_store,
            queue,
            archive,
            metrics: MetricsCollector::new(),
            worker_id,
        })
    }

    /// 运行应用程序
    pub async fn run(&self, shutdown: &ShutdownManager) -> Result<()> {
        info!("启动应用程序，模式: {:?}", self.mode);

        match self.mode {
            AppMode::Worker => self.run_worker(shutdown).await?,
            AppMode::Beat => self.run_beat(shutdown).await?,
            AppMode::All => {
                let (worker_result, beat_result) =
                    tokio::join!(self.run_worker(shutdown), self.run_beat(shutdown));
                worker_result?;
                beat_result?;
            }
        }

        Ok(())
    }

    /// 进程启动时一次性填充任务注册表
    fn build_task_registry(&self) -> Arc<TaskRegistry> {
        let mut registry = TaskRegistry::new();
        registry.register("shell", TaskKind::Task, Arc::new(ShellHandler));
        registry.register("http", TaskKind::Task, Arc::new(HttpHandler::new()));
        registry.register("sleep", TaskKind::Task, Arc::new(SleepHandler));
        Arc::new(registry)
    }

    async fn run_worker(&self, shutdown: &ShutdownManager) -> Result<()> {
        info!("启动Worker服务: {}", self.worker_id);

        let ttl = self.config.result_ttl();
        let advancer = Arc::new(JobAdvancer::new(
            self.store.clone(),
            self.queue.clone(),
            self.config.queue.task_queue.clone(),
            ttl,
            self.metrics.clone(),
        ));
        let runner = Arc::new(TaskRunner::new(
            self.store.clone(),
            self.build_task_registry(),
            advancer,
            self.archive.clone(),
            self.metrics.clone(),
            self.worker_id.clone(),
            ttl,
            Duration::from_secs(self.config.worker.default_task_timeout_seconds),
        ));
        let service = WorkerService::new(
            self.worker_id.clone(),
            self.queue.clone(),
            self.config.queue.task_queue.clone(),
            runner,
            self.metrics.clone(),
            self.config.worker.max_concurrent_tasks,
            Duration::from_millis(self.config.worker.poll_interval_ms),
        );

        service
            .run(shutdown.subscribe().await)
            .await
            .context("Worker服务异常退出")?;
        Ok(())
    }

    async fn run_beat(&self, shutdown: &ShutdownManager) -> Result<()> {
        info!("启动Beat调度器");

        let registry = Arc::new(ScheduleRegistry::new(self.schedule_store.clone()));
        let beat = BeatDispatcher::new(
            registry,
            self.queue.clone(),
            self.config.queue.task_queue.clone(),
            Duration::from_secs(self.config.beat.tick_seconds),
            self.metrics.clone(),
        );

        beat.run(shutdown.subscribe().await)
            .await
            .context("Beat调度器异常退出")?;
        Ok(())
    }
}
