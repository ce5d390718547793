use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::BeehiveResult;
use crate::traits::ResultStore;

/// 调用方身份，仅用于审计归属与管理操作的权限判定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallerIdentity {
    pub user: String,
    /// 调用时刻的权限快照
    pub permissions: Vec<String>,
}

impl CallerIdentity {
    pub fn new(user: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            permissions: Vec::new(),
        }
    }

    pub fn system() -> Self {
        Self::new("system")
    }
}

/// 管理操作的动作类别，由外部权限回调裁决
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminAction {
    View,
    Insert,
    Update,
    Delete,
    Use,
}

impl AdminAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdminAction::View => "view",
            AdminAction::Insert => "insert",
            AdminAction::Update => "update",
            AdminAction::Delete => "delete",
            AdminAction::Use => "use",
        }
    }
}

/// 作业级共享数据的带版本封装
///
/// 版本号在每次整体替换时递增，使并发分支相互覆盖时（最后写入者
/// 获胜）可以被观察到，而不是悄悄丢失。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedData {
    pub version: u64,
    pub data: serde_json::Value,
}

impl Default for SharedData {
    fn default() -> Self {
        Self {
            version: 0,
            data: serde_json::json!({}),
        }
    }
}

/// 作业内协作步骤之间的共享上下文句柄
///
/// 整体替换的共享数据存在已知的读后写竞争：并行分支之间请改用
/// push/pop栈传递中间结果，每次push都是原子追加。
#[derive(Clone)]
pub struct SharedContext {
    store: Arc<dyn ResultStore>,
    job_id: String,
    ttl: Duration,
}

impl SharedContext {
    pub fn new(store: Arc<dyn ResultStore>, job_id: String, ttl: Duration) -> Self {
        Self { store, job_id, ttl }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub async fn get_shared_data(&self) -> BeehiveResult<serde_json::Value> {
        Ok(self.store.get_shared(&self.job_id).await?.data)
    }

    /// 整体替换共享数据
    ///
    /// 调用方必须先重新获取再修改，否则会覆盖并发写入者的更新。
    pub async fn set_shared_data(&self, data: serde_json::Value) -> BeehiveResult<u64> {
        let current = self.store.get_shared(&self.job_id).await?;
        let next = SharedData {
            version: current.version + 1,
            data,
        };
        self.store
            .set_shared(&self.job_id, &next, self.ttl)
            .await?;
        Ok(next.version)
    }

    pub async fn push_stack(&self, value: serde_json::Value) -> BeehiveResult<()> {
        self.store.push_stack(&self.job_id, &value, self.ttl).await
    }

    /// 栈为空时返回None而不是报错，汇合步骤据此判断已取尽
    pub async fn pop_stack(&self) -> BeehiveResult<Option<serde_json::Value>> {
        self.store.pop_stack(&self.job_id).await
    }
}

impl std::fmt::Debug for SharedContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedContext")
            .field("job_id", &self.job_id)
            .field("ttl", &self.ttl)
            .finish()
    }
}
