use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use beehive_core::{
    BeehiveError, BeehiveResult, CallerIdentity, ResultStore, SharedContext, TaskArchive,
    TaskDispatchMessage, TaskKind, TaskPatch, TaskRecord, TaskStatus,
};
use beehive_infrastructure::MetricsCollector;

use crate::advancer::JobAdvancer;
use crate::registry::{TaskContext, TaskRegistry};

/// 任务执行器：以生命周期钩子包裹每个工作单元
///
/// 前置钩子写入PENDING记录并转入PROGRESS（记录入队/开始时间、
/// Worker标识、参数）；后置钩子落盘终态、镜像到归档、推进作业链。
/// 单个任务的失败被封装在其自身的记录里，从不波及兄弟任务。
pub struct TaskRunner {
    store: Arc<dyn ResultStore>,
    registry: Arc<TaskRegistry>,
    advancer: Arc<JobAdvancer>,
    archive: Option<Arc<dyn TaskArchive>>,
    metrics: MetricsCollector,
    worker_id: String,
    ttl: Duration,
    default_timeout: Duration,
}

impl TaskRunner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn ResultStore>,
        registry: Arc<TaskRegistry>,
        advancer: Arc<JobAdvancer>,
        archive: Option<Arc<dyn TaskArchive>>,
        metrics: MetricsCollector,
        worker_id: String,
        ttl: Duration,
        default_timeout: Duration,
    ) -> Self {
        Self {
            store,
            registry,
            advancer,
            archive,
            metrics,
            worker_id,
            ttl,
            default_timeout,
        }
    }

    pub fn revoked_marker(task_id: &str) -> String {
        format!("revoked-{task_id}")
    }

    /// 执行一条派发消息，完整走过生命周期钩子
    pub async fn execute(&self, message: TaskDispatchMessage) -> BeehiveResult<()> {
        // 前置钩子：PENDING记录
        let mut record = TaskRecord::new(
            message.task_id.clone(),
            message.name.clone(),
            message.kind,
        );
        record.run_time = Some(message.enqueued_at);
        record.parent_id = message.parent_id.clone();
        record.args = message.args.clone();
        record.kwargs = message.kwargs.clone();
        record.submitted_by = message.submitted_by.clone();
        self.store.put(&message.task_id, &record, self.ttl).await?;

        if self
            .store
            .marker_exists(&Self::revoked_marker(&message.task_id))
            .await?
        {
            info!("任务 {} 已被撤销，跳过执行", message.task_id);
            self.finish_failure(&message, vec!["任务在执行前被撤销".to_string()])
                .await?;
            return Ok(());
        }

        // 开始执行：PROGRESS
        let start_time = Utc::now();
        let progress = TaskPatch {
            status: Some(TaskStatus::Progress),
            start_time: Some(start_time),
            worker: Some(self.worker_id.clone()),
            ..Default::default()
        };
        self.store
            .merge_update(&message.task_id, progress, self.ttl)
            .await?;

        let Some(handler) = self.registry.get(&message.name) else {
            error!("未注册的任务类型: {}", message.name);
            self.finish_failure(
                &message,
                vec![format!("未注册的任务类型: {}", message.name)],
            )
            .await?;
            return Ok(());
        };

        let shared = message
            .job_id
            .as_ref()
            .map(|job_id| SharedContext::new(self.store.clone(), job_id.clone(), self.ttl));
        let identity = message
            .submitted_by
            .as_deref()
            .map(CallerIdentity::new)
            .unwrap_or_else(CallerIdentity::system);
        let ctx = TaskContext::new(
            message.task_id.clone(),
            message.name.clone(),
            message.job_id.clone(),
            identity,
            shared,
            self.store.clone(),
            self.ttl,
        );

        let timeout = self
            .registry
            .time_limit(&message.name)
            .await
            .unwrap_or(self.default_timeout);

        debug!(
            "开始执行任务: task_id={}, name={}, timeout={:?}",
            message.task_id, message.name, timeout
        );
        let outcome =
            tokio::time::timeout(timeout, handler.run(&ctx, &message.args, &message.kwargs)).await;

        let sub_jobs = ctx.take_sub_jobs().await;
        match outcome {
            Ok(Ok(result)) => {
                self.finish_success(&message, result, sub_jobs).await?;
            }
            Ok(Err(e)) => {
                warn!("任务 {} 执行失败: {}", message.task_id, e);
                self.finish_failure(&message, error_traceback(&e)).await?;
            }
            Err(_) => {
                warn!("任务 {} 执行超时 ({:?})", message.task_id, timeout);
                self.finish_failure(&message, error_traceback(&BeehiveError::ExecutionTimeout))
                    .await?;
            }
        }
        Ok(())
    }

    async fn finish_success(
        &self,
        message: &TaskDispatchMessage,
        result: serde_json::Value,
        sub_jobs: Vec<String>,
    ) -> BeehiveResult<()> {
        let stop_time = Utc::now();
        let patch = TaskPatch {
            status: Some(TaskStatus::Success),
            stop_time: Some(stop_time),
            result: Some(result),
            append_sub_jobs: sub_jobs,
            ..Default::default()
        };
        let merged = self
            .store
            .merge_update(&message.task_id, patch, self.ttl)
            .await?;
        let merged = self.stamp_duration(&merged).await?;

        info!(
            "任务 {} 执行成功, 耗时 {}ms",
            message.task_id,
            merged.duration_ms.unwrap_or(0)
        );
        self.metrics.record_task_completed(
            &message.name,
            TaskStatus::Success,
            merged.duration_ms.unwrap_or(0) as u64,
        );
        self.mirror_to_archive(&merged).await;

        if message.kind == TaskKind::JobTask {
            self.advancer.on_jobtask_finished(message, true).await?;
        }
        Ok(())
    }

    async fn finish_failure(
        &self,
        message: &TaskDispatchMessage,
        traceback: Vec<String>,
    ) -> BeehiveResult<()> {
        let stop_time = Utc::now();
        let patch = TaskPatch {
            status: Some(TaskStatus::Failure),
            stop_time: Some(stop_time),
            traceback: Some(traceback),
            ..Default::default()
        };
        let merged = self
            .store
            .merge_update(&message.task_id, patch, self.ttl)
            .await?;
        let merged = self.stamp_duration(&merged).await?;

        self.metrics.record_task_completed(
            &message.name,
            TaskStatus::Failure,
            merged.duration_ms.unwrap_or(0) as u64,
        );
        self.mirror_to_archive(&merged).await;

        if message.kind == TaskKind::JobTask {
            self.advancer.on_jobtask_finished(message, false).await?;
        }
        Ok(())
    }

    async fn stamp_duration(&self, record: &TaskRecord) -> BeehiveResult<TaskRecord> {
        match record.execution_duration_ms() {
            Some(duration) => {
                let patch = TaskPatch {
                    duration_ms: Some(duration),
                    ..Default::default()
                };
                self.store
                    .merge_update(&record.task_id, patch, self.ttl)
                    .await
            }
            None => Ok(record.clone()),
        }
    }

    /// 终态记录镜像到耐久归档，尽力而为
    async fn mirror_to_archive(&self, record: &TaskRecord) {
        if let Some(archive) = &self.archive {
            if let Err(e) = archive.archive(record).await {
                warn!("任务 {} 归档失败: {}", record.task_id, e);
            }
        }
    }

    /// 撤销一个本地正在运行（已被中止）的任务
    pub async fn mark_revoked(&self, task_id: &str) -> BeehiveResult<()> {
        let patch = TaskPatch {
            status: Some(TaskStatus::Failure),
            stop_time: Some(Utc::now()),
            traceback: Some(vec!["任务已被运维撤销".to_string()]),
            ..Default::default()
        };
        let merged = self.store.merge_update(task_id, patch, self.ttl).await?;
        self.mirror_to_archive(&merged).await;
        if merged.kind == TaskKind::JobTask {
            self.advancer.fail_enclosing_job(task_id).await?;
        }
        info!("任务 {} 已标记为撤销", task_id);
        Ok(())
    }
}

/// 把错误转成结构化的错误链列表
fn error_traceback(e: &BeehiveError) -> Vec<String> {
    let mut lines = vec![e.to_string()];
    let mut source = std::error::Error::source(e);
    while let Some(inner) = source {
        lines.push(inner.to_string());
        source = inner.source();
    }
    lines
}
