use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info};

use beehive_core::{
    BeehiveError, BeehiveResult, CallerIdentity, Message, MessageQueue, ResultStore,
    SharedContext, SharedData, SubmitOptions, TaskDispatchMessage, TaskKind, TaskPatch,
    TaskRecord, TaskStatus,
};

use crate::canvas::{build_job, Step};

/// `wait_for_job` 的终局
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobWaitStatus {
    Success,
    Failure,
    /// 超过max_wait仍未到终态
    Timeout,
}

/// 作业提交客户端
///
/// 提交立即返回作业ID（fire-and-forget）；调用方通过查询面轮询
/// 或用 `wait_for_job` 等待。等待是睡眠轮询，适合管理/CLI调用方，
/// 不适合高并发请求路径。
pub struct JobClient {
    store: Arc<dyn ResultStore>,
    queue: Arc<dyn MessageQueue>,
    task_queue: String,
    ttl: Duration,
}

impl JobClient {
    pub fn new(
        store: Arc<dyn ResultStore>,
        queue: Arc<dyn MessageQueue>,
        task_queue: String,
        ttl: Duration,
    ) -> Self {
        Self {
            store,
            queue,
            task_queue,
            ttl,
        }
    }

    /// 构建并提交一个作业，返回作业ID
    ///
    /// 根记录以PROGRESS写入；终态由执行引擎在最后一个子任务结束后
    /// 写回（根任务自身没有函数体）。
    pub async fn submit_job(
        &self,
        job_name: impl Into<String>,
        steps: Vec<Step>,
        initial_context: serde_json::Value,
        identity: &CallerIdentity,
    ) -> BeehiveResult<String> {
        let plan = build_job(job_name, steps)?;
        let job_id = plan.job_id.clone();
        let now = Utc::now();

        let mut root = TaskRecord::new(job_id.clone(), plan.job_name.clone(), TaskKind::Job);
        root.status = TaskStatus::Progress;
        root.run_time = Some(now);
        root.start_time = Some(now);
        root.submitted_by = Some(identity.user.clone());

        self.store.put_plan(&plan, self.ttl).await?;
        if !initial_context.is_null() {
            let shared = SharedData {
                version: 0,
                data: initial_context,
            };
            self.store.set_shared(&job_id, &shared, self.ttl).await?;
        }
        self.store.put(&job_id, &root, self.ttl).await?;

        self.dispatch_first_node(&plan, identity).await?;

        info!(
            "作业 {} ({}) 已提交, 共 {} 个任务",
            job_id,
            plan.job_name,
            plan.task_count()
        );
        Ok(job_id)
    }

    /// 入队计划的首节点并把子任务挂到根记录
    async fn dispatch_first_node(
        &self,
        plan: &beehive_core::JobPlan,
        identity: &CallerIdentity,
    ) -> BeehiveResult<()> {
        let node = plan.node(0).ok_or_else(|| {
            BeehiveError::Internal(format!("作业 {} 的计划为空", plan.job_id))
        })?;

        let entry_tasks = node.entry_tasks();
        let patch = TaskPatch {
            append_children: entry_tasks
                .iter()
                .map(|task| task.task_id.clone())
                .collect(),
            ..Default::default()
        };
        self.store.merge_update(&plan.job_id, patch, self.ttl).await?;

        let is_group = matches!(node, beehive_core::PlanNode::Group { .. });
        for (branch_index, planned) in entry_tasks.iter().enumerate() {
            let message = TaskDispatchMessage {
                task_id: planned.task_id.clone(),
                name: planned.call.name.clone(),
                kind: TaskKind::JobTask,
                args: planned.call.args.clone(),
                kwargs: planned.call.kwargs.clone(),
                job_id: Some(plan.job_id.clone()),
                parent_id: Some(plan.job_id.clone()),
                node_index: Some(0),
                branch_index: is_group.then_some(branch_index),
                enqueued_at: Utc::now(),
                submitted_by: Some(identity.user.clone()),
            };
            self.queue
                .publish_message(&self.task_queue, &Message::task_dispatch(message))
                .await?;
        }
        Ok(())
    }

    /// 提交一个独立任务（非作业步骤）
    pub async fn submit_task(
        &self,
        name: impl Into<String>,
        args: serde_json::Value,
        kwargs: serde_json::Value,
        options: SubmitOptions,
        identity: &CallerIdentity,
    ) -> BeehiveResult<String> {
        let message = TaskDispatchMessage::standalone(
            name.into(),
            args,
            kwargs,
            Some(identity.user.clone()),
        );
        let task_id = message.task_id.clone();
        let queue_name = options.queue.as_deref().unwrap_or(&self.task_queue);

        self.queue
            .publish_message(queue_name, &Message::task_dispatch(message))
            .await?;
        debug!("独立任务 {} 已提交到队列 {}", task_id, queue_name);
        Ok(task_id)
    }

    /// 睡眠轮询直到作业终态或超时
    pub async fn wait_for_job(
        &self,
        job_id: &str,
        poll_interval: Duration,
        max_wait: Duration,
    ) -> BeehiveResult<JobWaitStatus> {
        let deadline = tokio::time::Instant::now() + max_wait;
        loop {
            let record = self.store.get(job_id).await?;
            match record.status {
                TaskStatus::Success => return Ok(JobWaitStatus::Success),
                TaskStatus::Failure => return Ok(JobWaitStatus::Failure),
                _ => {}
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(JobWaitStatus::Timeout);
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    /// 获取某作业的共享上下文句柄
    pub fn shared_context(&self, job_id: &str) -> SharedContext {
        SharedContext::new(self.store.clone(), job_id.to_string(), self.ttl)
    }
}
