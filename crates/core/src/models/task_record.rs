use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 任务种类
///
/// - `Task`: 独立任务，不属于任何作业
/// - `JobTask`: 作业图中的一个步骤，有且仅有一个父任务
/// - `Job`: 作业根任务，代表一次用户触发的流水线
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TaskKind {
    #[serde(rename = "TASK")]
    Task,
    #[serde(rename = "JOBTASK")]
    JobTask,
    #[serde(rename = "JOB")]
    Job,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Task => "TASK",
            TaskKind::JobTask => "JOBTASK",
            TaskKind::Job => "JOB",
        }
    }
}

/// 任务状态机: PENDING → PROGRESS → {SUCCESS, FAILURE}
///
/// 终态不可再转移。作业(JOB)在自身逻辑返回后仍保持 PROGRESS，
/// 直到最后一个子任务结束才进入终态。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    #[serde(rename = "PENDING")]
    Pending,
    #[serde(rename = "PROGRESS")]
    Progress,
    #[serde(rename = "SUCCESS")]
    Success,
    #[serde(rename = "FAILURE")]
    Failure,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Success | TaskStatus::Failure)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Progress => "PROGRESS",
            TaskStatus::Success => "SUCCESS",
            TaskStatus::Failure => "FAILURE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(TaskStatus::Pending),
            "PROGRESS" => Some(TaskStatus::Progress),
            "SUCCESS" => Some(TaskStatus::Success),
            "FAILURE" => Some(TaskStatus::Failure),
            _ => None,
        }
    }
}

/// 执行过程中追加的进度条目，供运维界面展示
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TraceEntry {
    pub at: DateTime<Utc>,
    pub message: String,
}

/// 任务执行记录
///
/// 每个被执行的工作单元对应一条记录，由执行引擎在生命周期钩子中写入
/// 结果存储。时间不变式: `stop_time >= start_time >= run_time`。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: String,
    pub name: String,
    pub kind: TaskKind,
    pub status: TaskStatus,
    /// 入队时间
    pub run_time: Option<DateTime<Utc>>,
    /// 开始执行时间
    pub start_time: Option<DateTime<Utc>>,
    /// 结束时间
    pub stop_time: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    /// 父任务ID，仅作业根任务为空
    pub parent_id: Option<String>,
    /// 运行期实际派生出的子任务ID，按入队顺序排列
    pub children: Vec<String>,
    /// 本任务派生的子作业ID
    pub sub_jobs: Vec<String>,
    pub args: serde_json::Value,
    pub kwargs: serde_json::Value,
    pub result: Option<serde_json::Value>,
    /// 失败时的结构化错误链
    pub traceback: Option<Vec<String>>,
    /// 执行该任务的Worker标识
    pub worker: Option<String>,
    /// 提交者标识，仅用于审计归属
    pub submitted_by: Option<String>,
    pub trace: Vec<TraceEntry>,
}

impl TaskRecord {
    pub fn new(task_id: String, name: String, kind: TaskKind) -> Self {
        Self {
            task_id,
            name,
            kind,
            status: TaskStatus::Pending,
            run_time: None,
            start_time: None,
            stop_time: None,
            duration_ms: None,
            parent_id: None,
            children: Vec::new(),
            sub_jobs: Vec::new(),
            args: serde_json::Value::Null,
            kwargs: serde_json::Value::Null,
            result: None,
            traceback: None,
            worker: None,
            submitted_by: None,
            trace: Vec::new(),
        }
    }

    pub fn with_new_id(name: String, kind: TaskKind) -> Self {
        Self::new(Uuid::new_v4().to_string(), name, kind)
    }

    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_successful(&self) -> bool {
        matches!(self.status, TaskStatus::Success)
    }

    /// 结束耗时，毫秒。两端时间戳齐备时才有值
    pub fn execution_duration_ms(&self) -> Option<i64> {
        match (self.start_time, self.stop_time) {
            (Some(started), Some(stopped)) => Some((stopped - started).num_milliseconds()),
            _ => None,
        }
    }
}

/// 任务记录的增量更新
///
/// 读-改-写合并时只覆盖显式给出的字段。终态记录拒绝状态回退，
/// `append_*` 族在原有列表上追加而不是整体替换。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskPatch {
    pub status: Option<TaskStatus>,
    pub run_time: Option<DateTime<Utc>>,
    pub start_time: Option<DateTime<Utc>>,
    pub stop_time: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub parent_id: Option<String>,
    pub args: Option<serde_json::Value>,
    pub kwargs: Option<serde_json::Value>,
    pub result: Option<serde_json::Value>,
    pub traceback: Option<Vec<String>>,
    pub worker: Option<String>,
    pub submitted_by: Option<String>,
    pub set_children: Option<Vec<String>>,
    pub append_children: Vec<String>,
    pub append_sub_jobs: Vec<String>,
    pub append_trace: Vec<TraceEntry>,
}

impl TaskPatch {
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    /// 把补丁应用到既有记录上。终态记录的状态字段保持不变。
    pub fn apply(&self, record: &mut TaskRecord) {
        if let Some(status) = self.status {
            if !record.status.is_terminal() {
                record.status = status;
            }
        }
        if let Some(t) = self.run_time {
            record.run_time = Some(t);
        }
        if let Some(t) = self.start_time {
            record.start_time = Some(t);
        }
        if let Some(t) = self.stop_time {
            record.stop_time = Some(t);
        }
        if let Some(d) = self.duration_ms {
            record.duration_ms = Some(d);
        }
        if let Some(ref p) = self.parent_id {
            record.parent_id = Some(p.clone());
        }
        if let Some(ref a) = self.args {
            record.args = a.clone();
        }
        if let Some(ref k) = self.kwargs {
            record.kwargs = k.clone();
        }
        if let Some(ref r) = self.result {
            record.result = Some(r.clone());
        }
        if let Some(ref t) = self.traceback {
            record.traceback = Some(t.clone());
        }
        if let Some(ref w) = self.worker {
            record.worker = Some(w.clone());
        }
        if let Some(ref s) = self.submitted_by {
            record.submitted_by = Some(s.clone());
        }
        if let Some(ref c) = self.set_children {
            record.children = c.clone();
        }
        for child in &self.append_children {
            if !record.children.contains(child) {
                record.children.push(child.clone());
            }
        }
        for sub_job in &self.append_sub_jobs {
            if !record.sub_jobs.contains(sub_job) {
                record.sub_jobs.push(sub_job.clone());
            }
        }
        record.trace.extend(self.append_trace.iter().cloned());
    }
}

/// 任务查询过滤器
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub kind: Option<TaskKind>,
    /// 仅保留在最近 max_age 秒内结束的任务，按剩余TTL推算
    pub max_age_seconds: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_terminal() {
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Progress.is_terminal());
        assert!(TaskStatus::Success.is_terminal());
        assert!(TaskStatus::Failure.is_terminal());
    }

    #[test]
    fn test_status_roundtrip() {
        for status in [
            TaskStatus::Pending,
            TaskStatus::Progress,
            TaskStatus::Success,
            TaskStatus::Failure,
        ] {
            assert_eq!(TaskStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(TaskStatus::parse("UNKNOWN"), None);
    }

    #[test]
    fn test_patch_does_not_leave_terminal_state() {
        let mut record = TaskRecord::with_new_id("demo".to_string(), TaskKind::Task);
        TaskPatch::status(TaskStatus::Progress).apply(&mut record);
        assert_eq!(record.status, TaskStatus::Progress);

        TaskPatch::status(TaskStatus::Failure).apply(&mut record);
        assert_eq!(record.status, TaskStatus::Failure);

        // 终态之后的状态更新被忽略
        TaskPatch::status(TaskStatus::Success).apply(&mut record);
        assert_eq!(record.status, TaskStatus::Failure);
    }

    #[test]
    fn test_patch_appends_children_without_duplicates() {
        let mut record = TaskRecord::with_new_id("demo".to_string(), TaskKind::Job);
        let patch = TaskPatch {
            append_children: vec!["a".to_string(), "b".to_string()],
            ..Default::default()
        };
        patch.apply(&mut record);
        patch.apply(&mut record);
        assert_eq!(record.children, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_execution_duration() {
        let mut record = TaskRecord::with_new_id("demo".to_string(), TaskKind::Task);
        assert_eq!(record.execution_duration_ms(), None);

        let start = Utc::now();
        record.start_time = Some(start);
        record.stop_time = Some(start + chrono::Duration::milliseconds(1500));
        assert_eq!(record.execution_duration_ms(), Some(1500));
    }

    #[test]
    fn test_record_serialization_roundtrip() {
        let mut record = TaskRecord::with_new_id("backup".to_string(), TaskKind::JobTask);
        record.status = TaskStatus::Success;
        record.parent_id = Some("root".to_string());
        record.result = Some(serde_json::json!({"rows": 42}));
        record.trace.push(TraceEntry {
            at: Utc::now(),
            message: "halfway".to_string(),
        });

        let json = serde_json::to_string(&record).expect("serialize");
        let parsed: TaskRecord = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed.task_id, record.task_id);
        assert_eq!(parsed.status, TaskStatus::Success);
        assert_eq!(parsed.parent_id.as_deref(), Some("root"));
        assert_eq!(parsed.trace.len(), 1);
    }
}
