use async_trait::async_trait;

use crate::errors::BeehiveResult;
use crate::models::{TaskRecord, TaskStatus};

/// 耐久的任务归档
///
/// 终态记录在快速存储过期之后仍可由归档回答状态查询。归档写入
/// 是尽力而为的：失败只记日志，不影响任务本身的结果。
#[async_trait]
pub trait TaskArchive: Send + Sync {
    /// 落库一条终态记录及其trace条目，按任务ID幂等覆盖
    async fn archive(&self, record: &TaskRecord) -> BeehiveResult<()>;

    async fn get_status(&self, task_id: &str) -> BeehiveResult<Option<TaskStatus>>;

    async fn get_record(&self, task_id: &str) -> BeehiveResult<Option<TaskRecord>>;
}
