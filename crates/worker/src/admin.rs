use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};

use beehive_core::{
    AdminAction, BeehiveError, BeehiveResult, CallerIdentity, Message, MessageQueue,
    PermissionChecker, ResultStore, TaskControlAction, TaskControlMessage,
};

use crate::registry::TaskRegistry;
use crate::runner::TaskRunner;

/// 任务管理操作
///
/// 撤销、删除、清空与时间上限设置。每个操作先经外部权限回调裁决，
/// 核心只消费布尔结论，不实现授权逻辑。
pub struct TaskControlService {
    store: Arc<dyn ResultStore>,
    queue: Arc<dyn MessageQueue>,
    task_queue: String,
    registry: Arc<TaskRegistry>,
    permission: Arc<dyn PermissionChecker>,
    ttl: Duration,
}

impl TaskControlService {
    pub fn new(
        store: Arc<dyn ResultStore>,
        queue: Arc<dyn MessageQueue>,
        task_queue: String,
        registry: Arc<TaskRegistry>,
        permission: Arc<dyn PermissionChecker>,
        ttl: Duration,
    ) -> Self {
        Self {
            store,
            queue,
            task_queue,
            registry,
            permission,
            ttl,
        }
    }

    fn check(&self, identity: &CallerIdentity, action: AdminAction) -> BeehiveResult<()> {
        if self.permission.allows(identity, action) {
            Ok(())
        } else {
            Err(BeehiveError::PermissionDenied {
                action: action.as_str().to_string(),
            })
        }
    }

    /// 尽力而为的协作式撤销
    ///
    /// 标记写入后未开始的任务不会再执行；正在运行的任务由持有它的
    /// Worker收到控制消息后中止，撤销调用本身不等待其生效。
    pub async fn revoke_task(
        &self,
        identity: &CallerIdentity,
        task_id: &str,
    ) -> BeehiveResult<()> {
        self.check(identity, AdminAction::Use)?;

        self.store
            .acquire_marker(&TaskRunner::revoked_marker(task_id), self.ttl)
            .await?;

        let control = TaskControlMessage {
            task_id: task_id.to_string(),
            action: TaskControlAction::Cancel,
            requester: identity.user.clone(),
            timestamp: Utc::now(),
        };
        self.queue
            .publish_message(&self.task_queue, &Message::task_control(control))
            .await?;

        info!("任务 {} 的撤销请求已发出 (操作者: {})", task_id, identity.user);
        Ok(())
    }

    /// 删除任务记录，可级联到整棵子树（先删子后删父）
    pub async fn delete_task(
        &self,
        identity: &CallerIdentity,
        task_id: &str,
        cascade: bool,
    ) -> BeehiveResult<u64> {
        self.check(identity, AdminAction::Delete)?;

        let mut to_delete = vec![task_id.to_string()];
        if cascade {
            let mut queue = VecDeque::from([task_id.to_string()]);
            while let Some(current) = queue.pop_front() {
                let record = match self.store.get(&current).await {
                    Ok(record) => record,
                    Err(BeehiveError::TaskNotFound { .. }) => continue,
                    Err(e) => return Err(e),
                };
                for child in record.children {
                    if !to_delete.contains(&child) {
                        to_delete.push(child.clone());
                        queue.push_back(child);
                    }
                }
            }
        }

        let mut deleted = 0u64;
        for id in to_delete.iter().rev() {
            if self.store.delete(id).await? {
                deleted += 1;
            }
        }
        info!(
            "已删除任务 {} (级联: {}, 共 {} 条记录)",
            task_id, cascade, deleted
        );
        Ok(deleted)
    }

    /// 清空全部任务数据，危险的管理操作
    pub async fn purge_all(&self, identity: &CallerIdentity) -> BeehiveResult<u64> {
        self.check(identity, AdminAction::Delete)?;
        let purged = self.store.purge_all().await?;
        warn!("任务存储已被清空 (操作者: {}, 共 {} 个键)", identity.user, purged);
        Ok(purged)
    }

    /// 设置或清除任务类别的执行时间上限
    pub async fn set_time_limit(
        &self,
        identity: &CallerIdentity,
        task_name: &str,
        limit: Option<Duration>,
    ) -> BeehiveResult<()> {
        self.check(identity, AdminAction::Update)?;
        self.registry.set_time_limit(task_name, limit).await;
        info!("任务类别 {} 的时间上限更新为 {:?}", task_name, limit);
        Ok(())
    }
}
