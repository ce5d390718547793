use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, RwLock};
use tracing::warn;

use beehive_core::{
    BeehiveResult, CallerIdentity, ResultStore, SharedContext, TaskKind, TaskPatch, TraceEntry,
    JOIN_TASK_NAME,
};

/// 任务体可见的执行上下文
///
/// 取代全局可变的"当前操作"状态：调用方身份、作业共享数据句柄等
/// 全部显式传入，任务体不接触任何进程级全局量。
pub struct TaskContext {
    pub task_id: String,
    pub task_name: String,
    pub job_id: Option<String>,
    pub identity: CallerIdentity,
    shared: Option<SharedContext>,
    store: Arc<dyn ResultStore>,
    ttl: Duration,
    sub_jobs: Mutex<Vec<String>>,
}

impl TaskContext {
    pub fn new(
        task_id: String,
        task_name: String,
        job_id: Option<String>,
        identity: CallerIdentity,
        shared: Option<SharedContext>,
        store: Arc<dyn ResultStore>,
        ttl: Duration,
    ) -> Self {
        Self {
            task_id,
            task_name,
            job_id,
            identity,
            shared,
            store,
            ttl,
            sub_jobs: Mutex::new(Vec::new()),
        }
    }

    /// 作业内步骤的共享上下文，独立任务为None
    pub fn shared(&self) -> Option<&SharedContext> {
        self.shared.as_ref()
    }

    /// 追加一条进度说明到任务记录
    ///
    /// 尽力而为：存储不可用时记一条警告日志后继续，不影响任务执行。
    pub async fn progress(&self, message: impl Into<String>) {
        let patch = TaskPatch {
            append_trace: vec![TraceEntry {
                at: Utc::now(),
                message: message.into(),
            }],
            ..Default::default()
        };
        if let Err(e) = self.store.merge_update(&self.task_id, patch, self.ttl).await {
            warn!("任务 {} 追加进度失败: {}", self.task_id, e);
        }
    }

    /// 登记任务体派生出的子作业ID，结束钩子会写入任务记录
    pub async fn record_sub_job(&self, job_id: String) {
        self.sub_jobs.lock().await.push(job_id);
    }

    pub(crate) async fn take_sub_jobs(&self) -> Vec<String> {
        std::mem::take(&mut *self.sub_jobs.lock().await)
    }
}

/// 任务处理器：一个可执行的工作单元
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn run(
        &self,
        ctx: &TaskContext,
        args: &serde_json::Value,
        kwargs: &serde_json::Value,
    ) -> BeehiveResult<serde_json::Value>;
}

struct Registration {
    handler: Arc<dyn TaskHandler>,
    kind: TaskKind,
}

/// 编译期显式注册的任务表
///
/// 进程启动时一次性填充（取代按导入路径字符串的动态反射），之后
/// 只读；任务类别的时间上限是唯一的运行期可变项。
pub struct TaskRegistry {
    handlers: HashMap<String, Registration>,
    time_limits: RwLock<HashMap<String, Duration>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        let mut registry = Self {
            handlers: HashMap::new(),
            time_limits: RwLock::new(HashMap::new()),
        };
        // 并行组屏障是引擎自身的内置任务
        registry.register(JOIN_TASK_NAME, TaskKind::JobTask, Arc::new(JoinHandler));
        registry
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        kind: TaskKind,
        handler: Arc<dyn TaskHandler>,
    ) {
        self.handlers.insert(name.into(), Registration { handler, kind });
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(name).map(|r| Arc::clone(&r.handler))
    }

    pub fn kind_of(&self, name: &str) -> Option<TaskKind> {
        self.handlers.get(name).map(|r| r.kind)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    /// 设置或清除某任务类别的执行时间上限
    pub async fn set_time_limit(&self, name: &str, limit: Option<Duration>) {
        let mut limits = self.time_limits.write().await;
        match limit {
            Some(limit) => {
                limits.insert(name.to_string(), limit);
            }
            None => {
                limits.remove(name);
            }
        }
    }

    pub async fn time_limit(&self, name: &str) -> Option<Duration> {
        self.time_limits.read().await.get(name).copied()
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// 并行组的汇合屏障，本身不做任何工作
struct JoinHandler;

#[async_trait]
impl TaskHandler for JoinHandler {
    async fn run(
        &self,
        _ctx: &TaskContext,
        _args: &serde_json::Value,
        _kwargs: &serde_json::Value,
    ) -> BeehiveResult<serde_json::Value> {
        Ok(serde_json::Value::Null)
    }
}
