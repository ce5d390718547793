use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use beehive_core::{
    BeehiveError, BeehiveResult, JobPlan, Message, MessageQueue, PlanNode, PlannedTask,
    ResultStore, TaskDispatchMessage, TaskKind, TaskPatch, TaskStatus,
};
use beehive_infrastructure::MetricsCollector;

/// 作业链推进器
///
/// 步骤结束后依据持久化的作业计划决定下一步：顺序步骤依次入队，
/// 并行组全部成功后恰好入队一次隐式汇合任务（存储侧标记作屏障），
/// 计划走完时将作业置为终态。任何步骤失败立即终止作业。
pub struct JobAdvancer {
    store: Arc<dyn ResultStore>,
    queue: Arc<dyn MessageQueue>,
    task_queue: String,
    ttl: Duration,
    metrics: MetricsCollector,
}

impl JobAdvancer {
    pub fn new(
        store: Arc<dyn ResultStore>,
        queue: Arc<dyn MessageQueue>,
        task_queue: String,
        ttl: Duration,
        metrics: MetricsCollector,
    ) -> Self {
        Self {
            store,
            queue,
            task_queue,
            ttl,
            metrics,
        }
    }

    fn planned_to_message(
        planned: &PlannedTask,
        job_id: &str,
        parent_id: &str,
        node_index: usize,
        branch_index: Option<usize>,
        submitted_by: Option<String>,
    ) -> TaskDispatchMessage {
        TaskDispatchMessage {
            task_id: planned.task_id.clone(),
            name: planned.call.name.clone(),
            kind: TaskKind::JobTask,
            args: planned.call.args.clone(),
            kwargs: planned.call.kwargs.clone(),
            job_id: Some(job_id.to_string()),
            parent_id: Some(parent_id.to_string()),
            node_index: Some(node_index),
            branch_index,
            enqueued_at: Utc::now(),
            submitted_by,
        }
    }

    /// 入队计划中的一个节点，并把子任务ID挂到父记录上
    pub async fn dispatch_node(
        &self,
        plan: &JobPlan,
        node_index: usize,
        parent_task_id: &str,
        submitted_by: Option<String>,
    ) -> BeehiveResult<()> {
        let node = plan.node(node_index).ok_or_else(|| {
            BeehiveError::Internal(format!(
                "作业 {} 的计划中不存在节点 {}",
                plan.job_id, node_index
            ))
        })?;

        let entry_tasks = node.entry_tasks();
        // 先写父子链接再入队，保证子任务开始执行时图的边已经存在
        let patch = TaskPatch {
            append_children: entry_tasks
                .iter()
                .map(|task| task.task_id.clone())
                .collect(),
            ..Default::default()
        };
        self.store
            .merge_update(parent_task_id, patch, self.ttl)
            .await?;

        let is_group = matches!(node, PlanNode::Group { .. });
        for (branch_index, planned) in entry_tasks.iter().enumerate() {
            let message = Self::planned_to_message(
                planned,
                &plan.job_id,
                parent_task_id,
                node_index,
                is_group.then_some(branch_index),
                submitted_by.clone(),
            );
            self.queue
                .publish_message(&self.task_queue, &Message::task_dispatch(message))
                .await?;
            debug!(
                "作业 {} 节点 {} 的任务 {} 已入队",
                plan.job_id, node_index, planned.task_id
            );
        }
        Ok(())
    }

    /// 作业内步骤结束后的推进入口
    pub async fn on_jobtask_finished(
        &self,
        message: &TaskDispatchMessage,
        success: bool,
    ) -> BeehiveResult<()> {
        let Some(job_id) = message.job_id.as_deref() else {
            return Ok(());
        };

        if !success {
            self.fail_job(job_id).await?;
            return Ok(());
        }

        let plan = match self.store.get_plan(job_id).await {
            Ok(plan) => plan,
            Err(BeehiveError::TaskNotFound { .. }) => {
                warn!("作业 {} 的计划已过期，无法继续推进", job_id);
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let Some(node_index) = message.node_index else {
            warn!("作业 {} 的消息缺少节点下标，忽略", job_id);
            return Ok(());
        };
        let Some(node) = plan.node(node_index) else {
            warn!("作业 {} 的计划中不存在节点 {}", job_id, node_index);
            return Ok(());
        };

        match node {
            PlanNode::Single(task) => {
                let exit_id = task.task_id.clone();
                self.advance(&plan, node_index, &exit_id, message.submitted_by.clone())
                    .await
            }
            PlanNode::Group { branches, join } => {
                if message.task_id == join.task_id {
                    let exit_id = join.task_id.clone();
                    return self
                        .advance(&plan, node_index, &exit_id, message.submitted_by.clone())
                        .await;
                }
                self.try_dispatch_join(
                    &plan,
                    node_index,
                    branches,
                    join,
                    message.submitted_by.clone(),
                )
                .await
            }
        }
    }

    /// 并行组分支结束后检查是否可以入队汇合任务
    async fn try_dispatch_join(
        &self,
        plan: &JobPlan,
        node_index: usize,
        branches: &[PlannedTask],
        join: &PlannedTask,
        submitted_by: Option<String>,
    ) -> BeehiveResult<()> {
        for branch in branches {
            match self.store.get(&branch.task_id).await {
                Ok(record) if record.status == TaskStatus::Success => {}
                Ok(record) if record.status == TaskStatus::Failure => {
                    return self.fail_job(&plan.job_id).await;
                }
                Ok(_) => return Ok(()),
                Err(BeehiveError::TaskNotFound { .. }) => return Ok(()),
                Err(e) => return Err(e),
            }
        }

        // 分支可能并发到达这里，屏障标记保证汇合任务只入队一次
        let marker = format!("join-{}-{}", plan.job_id, node_index);
        if !self.store.acquire_marker(&marker, self.ttl).await? {
            debug!("作业 {} 节点 {} 的汇合任务已由其他分支入队", plan.job_id, node_index);
            return Ok(());
        }

        for branch in branches {
            let patch = TaskPatch {
                append_children: vec![join.task_id.clone()],
                ..Default::default()
            };
            self.store
                .merge_update(&branch.task_id, patch, self.ttl)
                .await?;
        }

        let message = Self::planned_to_message(
            join,
            &plan.job_id,
            &branches[0].task_id,
            node_index,
            None,
            submitted_by,
        );
        self.queue
            .publish_message(&self.task_queue, &Message::task_dispatch(message))
            .await?;
        info!("作业 {} 节点 {} 的所有分支已完成，汇合任务入队", plan.job_id, node_index);
        Ok(())
    }

    async fn advance(
        &self,
        plan: &JobPlan,
        node_index: usize,
        exit_task_id: &str,
        submitted_by: Option<String>,
    ) -> BeehiveResult<()> {
        let next = node_index + 1;
        if next >= plan.nodes.len() {
            self.finalize_job(&plan.job_id, TaskStatus::Success).await
        } else {
            self.dispatch_node(plan, next, exit_task_id, submitted_by)
                .await
        }
    }

    /// 作业终态落盘，终态后的重复调用是空操作
    pub async fn finalize_job(&self, job_id: &str, status: TaskStatus) -> BeehiveResult<()> {
        match self.store.get(job_id).await {
            Ok(record) if record.is_finished() => return Ok(()),
            Ok(_) => {}
            Err(BeehiveError::TaskNotFound { .. }) => {
                warn!("作业 {} 的根记录已过期，跳过终态写入", job_id);
                return Ok(());
            }
            Err(e) => return Err(e),
        }

        let patch = TaskPatch {
            status: Some(status),
            stop_time: Some(Utc::now()),
            ..Default::default()
        };
        let merged = self.store.merge_update(job_id, patch, self.ttl).await?;
        if let Some(duration) = merged.execution_duration_ms() {
            let duration_patch = TaskPatch {
                duration_ms: Some(duration),
                ..Default::default()
            };
            self.store
                .merge_update(job_id, duration_patch, self.ttl)
                .await?;
        }

        self.metrics.record_job_finished(status);
        info!("作业 {} 已结束，状态: {}", job_id, status.as_str());
        Ok(())
    }

    pub async fn fail_job(&self, job_id: &str) -> BeehiveResult<()> {
        self.finalize_job(job_id, TaskStatus::Failure).await
    }

    /// 沿父链向上找到作业根并标记失败，用于撤销正在运行的作业步骤
    pub async fn fail_enclosing_job(&self, task_id: &str) -> BeehiveResult<()> {
        let mut current = task_id.to_string();
        let mut visited = HashSet::new();

        loop {
            if !visited.insert(current.clone()) {
                warn!("任务 {} 的父链中检测到环，停止回溯", task_id);
                return Ok(());
            }
            let record = match self.store.get(&current).await {
                Ok(record) => record,
                Err(BeehiveError::TaskNotFound { .. }) => {
                    warn!("任务 {} 的父链在 {} 处中断", task_id, current);
                    return Ok(());
                }
                Err(e) => return Err(e),
            };
            if record.kind == TaskKind::Job {
                return self.fail_job(&record.task_id).await;
            }
            match record.parent_id {
                Some(parent) => current = parent,
                None => return Ok(()),
            }
        }
    }
}
