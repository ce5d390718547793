use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use tracing::{debug, warn};

use beehive_core::{
    BeehiveError, BeehiveResult, GraphEdge, GraphNode, GraphWarning, NodeRole, ResultStore,
    TaskArchive, TaskFilter, TaskGraph, TaskRecord, TaskStatus,
};

/// 任务查询服务
///
/// 面向外部API/CLI层的只读查询面。快速存储是事实来源；记录过期后
/// 状态查询回落到耐久归档（如有配置）。
pub struct TaskQueryService {
    store: Arc<dyn ResultStore>,
    archive: Option<Arc<dyn TaskArchive>>,
    /// 配置的记录TTL秒数，用于按剩余TTL推算任务的完成时间
    result_ttl_seconds: i64,
}

impl TaskQueryService {
    pub fn new(
        store: Arc<dyn ResultStore>,
        archive: Option<Arc<dyn TaskArchive>>,
        result_ttl_seconds: i64,
    ) -> Self {
        Self {
            store,
            archive,
            result_ttl_seconds,
        }
    }

    /// 读取任务记录，快速存储缺失时尝试归档
    pub async fn get_task(&self, task_id: &str) -> BeehiveResult<TaskRecord> {
        match self.store.get(task_id).await {
            Ok(record) => Ok(record),
            Err(BeehiveError::TaskNotFound { .. }) => {
                if let Some(archive) = &self.archive {
                    if let Some(record) = archive.get_record(task_id).await? {
                        debug!("任务 {} 从归档中恢复", task_id);
                        return Ok(record);
                    }
                }
                Err(BeehiveError::TaskNotFound {
                    id: task_id.to_string(),
                })
            }
            Err(e) => Err(e),
        }
    }

    /// 查询任务状态，容忍快速存储中的记录已经过期
    pub async fn get_task_status(&self, task_id: &str) -> BeehiveResult<TaskStatus> {
        match self.store.get(task_id).await {
            Ok(record) => Ok(record.status),
            Err(BeehiveError::TaskNotFound { .. }) => {
                if let Some(archive) = &self.archive {
                    if let Some(status) = archive.get_status(task_id).await? {
                        return Ok(status);
                    }
                }
                Err(BeehiveError::TaskNotFound {
                    id: task_id.to_string(),
                })
            }
            Err(e) => Err(e),
        }
    }

    /// 按种类与最近完成时间过滤列出存活任务
    pub async fn get_all_tasks(&self, filter: TaskFilter) -> BeehiveResult<Vec<TaskRecord>> {
        let entries = self.store.scan_with_ttl("").await?;
        let mut records = Vec::new();
        for (_, record, remaining_ttl) in entries {
            if let Some(kind) = filter.kind {
                if record.kind != kind {
                    continue;
                }
            }
            if let Some(max_age) = filter.max_age_seconds {
                // 每次写入都会重置TTL，剩余TTL反映最后一次写入距今的时长
                let elapsed = self.result_ttl_seconds - remaining_ttl;
                if elapsed > max_age {
                    continue;
                }
            }
            records.push(record);
        }
        records.sort_by(|a, b| a.task_id.cmp(&b.task_id));
        Ok(records)
    }

    pub async fn count_tasks(&self) -> BeehiveResult<usize> {
        Ok(self.store.scan("").await?.len())
    }

    /// 从根任务出发重建父→子执行依赖图
    ///
    /// 子记录缺失（已过期）时记一条警告并省略该子树，整个查询仍返回
    /// 部分图；访问集合保证即使存储中出现异常的环也不会死循环。
    pub async fn get_task_graph(&self, root_task_id: &str) -> BeehiveResult<TaskGraph> {
        let root = self.get_task(root_task_id).await?;

        let mut graph = TaskGraph::default();
        let mut visited: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<TaskRecord> = VecDeque::new();

        visited.insert(root.task_id.clone());
        queue.push_back(root);

        while let Some(record) = queue.pop_front() {
            let role = if record.parent_id.is_none() {
                NodeRole::Start
            } else if record.children.is_empty() {
                NodeRole::End
            } else {
                NodeRole::Inner
            };
            graph.nodes.push(GraphNode {
                id: record.task_id.clone(),
                label: record.name.clone(),
                kind: record.kind,
                status: record.status,
                role,
                worker: record.worker.clone(),
                duration_ms: record.duration_ms,
            });

            for child_id in &record.children {
                if !visited.insert(child_id.clone()) {
                    warn!(
                        "任务图中检测到重复访问的节点 {}，跳过该边",
                        child_id
                    );
                    continue;
                }
                match self.get_task(child_id).await {
                    Ok(child) => {
                        graph.edges.push(GraphEdge {
                            from: record.task_id.clone(),
                            to: child_id.clone(),
                        });
                        queue.push_back(child);
                    }
                    Err(BeehiveError::TaskNotFound { .. }) => {
                        warn!(
                            "任务 {} 的子记录 {} 缺失或已过期，省略该子树",
                            record.task_id, child_id
                        );
                        graph.warnings.push(GraphWarning {
                            task_id: child_id.clone(),
                            reason: "子记录缺失或已过期".to_string(),
                        });
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        Ok(graph)
    }
}
