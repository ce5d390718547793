use thiserror::Error;

/// 调度核心错误类型定义
#[derive(Debug, Error)]
pub enum BeehiveError {
    #[error("任务未找到: {id}")]
    TaskNotFound { id: String },

    #[error("调度条目未找到: {name}")]
    ScheduleNotFound { name: String },

    #[error("结果存储不可用: {0}")]
    StoreUnavailable(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("无效的CRON表达式: {expr} - {message}")]
    InvalidCron { expr: String, message: String },

    #[error("无效的任务参数: {0}")]
    InvalidTaskParams(String),

    #[error("任务执行错误: {0}")]
    TaskExecution(String),

    #[error("任务执行超时")]
    ExecutionTimeout,

    #[error("调度触发失败: {0}")]
    ScheduleDispatch(String),

    #[error("消息队列错误: {0}")]
    MessageQueue(String),

    #[error("权限不足: {action}")]
    PermissionDenied { action: String },

    #[error("归档存储错误: {0}")]
    Archive(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for BeehiveError {
    fn from(e: serde_json::Error) -> Self {
        BeehiveError::Serialization(e.to_string())
    }
}

/// 统一的Result类型
pub type BeehiveResult<T> = std::result::Result<T, BeehiveError>;
