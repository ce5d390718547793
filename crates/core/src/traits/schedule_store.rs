use async_trait::async_trait;

use crate::errors::BeehiveResult;
use crate::models::ScheduleEntry;

/// 调度注册表的持久化存储
///
/// 与任务记录不同，调度条目没有TTL，存活到被显式删除为止。
#[async_trait]
pub trait ScheduleStore: Send + Sync {
    /// 按名称覆盖写入
    async fn upsert_entry(&self, entry: &ScheduleEntry) -> BeehiveResult<()>;

    /// 不存在时返回 `ScheduleNotFound`
    async fn get_entry(&self, name: &str) -> BeehiveResult<ScheduleEntry>;

    async fn list_entries(&self) -> BeehiveResult<Vec<ScheduleEntry>>;

    /// 返回是否确实存在
    async fn delete_entry(&self, name: &str) -> BeehiveResult<bool>;

    async fn clear_entries(&self) -> BeehiveResult<u64>;
}
