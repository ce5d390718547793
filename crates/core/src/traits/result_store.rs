use std::time::Duration;

use async_trait::async_trait;

use crate::errors::BeehiveResult;
use crate::models::{JobPlan, SharedData, TaskPatch, TaskRecord};

/// 结果存储：带TTL的任务记录与作业上下文持久化
///
/// 任务记录是单写者模型——每个任务只写自己的记录。所有写入都会
/// 重置TTL。存储不可达时返回 `StoreUnavailable`，由调用方决定
/// 传播还是降级。
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// 覆盖写入记录并重置TTL，重复写入不报错
    async fn put(&self, task_id: &str, record: &TaskRecord, ttl: Duration) -> BeehiveResult<()>;

    /// 记录不存在或已过期时返回 `TaskNotFound`
    async fn get(&self, task_id: &str) -> BeehiveResult<TaskRecord>;

    /// 读-改-写合并：取出既有记录（缺失时从空记录起步）、应用补丁、
    /// 以新TTL写回，返回合并后的记录
    async fn merge_update(
        &self,
        task_id: &str,
        patch: TaskPatch,
        ttl: Duration,
    ) -> BeehiveResult<TaskRecord>;

    /// 按任务ID前缀列出当前存活的任务ID
    async fn scan(&self, prefix: &str) -> BeehiveResult<Vec<String>>;

    /// 同scan，附带记录与剩余TTL秒数，用于按完成时间过滤
    async fn scan_with_ttl(&self, prefix: &str)
        -> BeehiveResult<Vec<(String, TaskRecord, i64)>>;

    /// 删除单条记录，返回是否确实存在
    async fn delete(&self, task_id: &str) -> BeehiveResult<bool>;

    /// 按任务ID前缀批量删除，返回删除数量
    async fn delete_prefix(&self, prefix: &str) -> BeehiveResult<u64>;

    /// 清空全部任务记录、作业计划、共享上下文与标记（不含调度注册表）
    async fn purge_all(&self) -> BeehiveResult<u64>;

    /// 原子地占用一个标记，首个占用者返回true（SET NX语义）
    async fn acquire_marker(&self, key: &str, ttl: Duration) -> BeehiveResult<bool>;

    async fn marker_exists(&self, key: &str) -> BeehiveResult<bool>;

    async fn put_plan(&self, plan: &JobPlan, ttl: Duration) -> BeehiveResult<()>;

    async fn get_plan(&self, job_id: &str) -> BeehiveResult<JobPlan>;

    /// 缺失时返回默认空数据（version 0）
    async fn get_shared(&self, job_id: &str) -> BeehiveResult<SharedData>;

    async fn set_shared(
        &self,
        job_id: &str,
        data: &SharedData,
        ttl: Duration,
    ) -> BeehiveResult<()>;

    /// 原子追加到作业栈顶
    async fn push_stack(
        &self,
        job_id: &str,
        value: &serde_json::Value,
        ttl: Duration,
    ) -> BeehiveResult<()>;

    /// 弹出栈顶，空栈返回None
    async fn pop_stack(&self, job_id: &str) -> BeehiveResult<Option<serde_json::Value>>;
}
