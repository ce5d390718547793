use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::TaskKind;

/// 经由消息队列投递的信封
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub message_type: MessageType,
    pub timestamp: DateTime<Utc>,
    pub retry_count: i32,
    pub correlation_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum MessageType {
    TaskDispatch(TaskDispatchMessage),
    TaskControl(TaskControlMessage),
}

/// 任务派发消息
///
/// 作业内步骤携带作业ID与计划内的节点位置，使Worker端可以在
/// 步骤结束后继续推进作业链。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDispatchMessage {
    pub task_id: String,
    pub name: String,
    pub kind: TaskKind,
    pub args: serde_json::Value,
    pub kwargs: serde_json::Value,
    pub job_id: Option<String>,
    pub parent_id: Option<String>,
    /// 所属计划节点下标
    pub node_index: Option<usize>,
    /// 并行组内分支下标
    pub branch_index: Option<usize>,
    pub enqueued_at: DateTime<Utc>,
    pub submitted_by: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskControlMessage {
    pub task_id: String,
    pub action: TaskControlAction,
    pub requester: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TaskControlAction {
    Cancel,
}

impl Message {
    pub fn task_dispatch(message: TaskDispatchMessage) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            message_type: MessageType::TaskDispatch(message),
            timestamp: Utc::now(),
            retry_count: 0,
            correlation_id: None,
        }
    }

    pub fn task_control(message: TaskControlMessage) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            message_type: MessageType::TaskControl(message),
            timestamp: Utc::now(),
            retry_count: 0,
            correlation_id: None,
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: String) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    pub fn increment_retry(&mut self) {
        self.retry_count += 1;
    }

    pub fn is_retry_exhausted(&self, max_retries: i32) -> bool {
        self.retry_count >= max_retries
    }

    pub fn message_type_str(&self) -> &'static str {
        match &self.message_type {
            MessageType::TaskDispatch(_) => "task_dispatch",
            MessageType::TaskControl(_) => "task_control",
        }
    }

    pub fn routing_key(&self) -> String {
        match &self.message_type {
            MessageType::TaskDispatch(msg) => format!("task.dispatch.{}", msg.name),
            MessageType::TaskControl(msg) => {
                format!("task.control.{:?}", msg.action).to_lowercase()
            }
        }
    }

    pub fn serialize(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn deserialize(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn serialize_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn deserialize_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

impl TaskDispatchMessage {
    /// 独立任务的派发消息，由Beat或外部调用方直接提交
    pub fn standalone(
        name: String,
        args: serde_json::Value,
        kwargs: serde_json::Value,
        submitted_by: Option<String>,
    ) -> Self {
        Self {
            task_id: Uuid::new_v4().to_string(),
            name,
            kind: TaskKind::Task,
            args,
            kwargs,
            job_id: None,
            parent_id: None,
            node_index: None,
            branch_index: None,
            enqueued_at: Utc::now(),
            submitted_by,
        }
    }
}
