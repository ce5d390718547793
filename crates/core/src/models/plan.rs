use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 内置的并行组汇合任务名，由执行引擎在注册表中预置
pub const JOIN_TASK_NAME: &str = "beehive.join";

/// 一次任务调用的声明
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskCall {
    pub name: String,
    pub args: serde_json::Value,
    pub kwargs: serde_json::Value,
}

impl TaskCall {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: serde_json::Value::Null,
            kwargs: serde_json::Value::Null,
        }
    }

    pub fn with_args(mut self, args: serde_json::Value) -> Self {
        self.args = args;
        self
    }

    pub fn with_kwargs(mut self, kwargs: serde_json::Value) -> Self {
        self.kwargs = kwargs;
        self
    }
}

/// 计划内的一个任务，ID在构建期分配，保证图的边是确定的
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlannedTask {
    pub task_id: String,
    pub call: TaskCall,
}

impl PlannedTask {
    pub fn new(call: TaskCall) -> Self {
        Self {
            task_id: Uuid::new_v4().to_string(),
            call,
        }
    }
}

/// 作业计划中的节点：顺序步骤或并行组
///
/// 并行组的所有分支结束后，隐式的汇合任务作为屏障先于后续
/// 顺序步骤执行。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum PlanNode {
    Single(PlannedTask),
    Group {
        branches: Vec<PlannedTask>,
        join: PlannedTask,
    },
}

impl PlanNode {
    /// 节点入口处需要入队的任务
    pub fn entry_tasks(&self) -> Vec<&PlannedTask> {
        match self {
            PlanNode::Single(task) => vec![task],
            PlanNode::Group { branches, .. } => branches.iter().collect(),
        }
    }

    /// 节点的出口任务：后续顺序步骤的前驱
    pub fn exit_task_id(&self) -> &str {
        match self {
            PlanNode::Single(task) => &task.task_id,
            PlanNode::Group { join, .. } => &join.task_id,
        }
    }
}

/// 可执行的作业计划
///
/// 与作业根记录一同写入结果存储，Worker端据此推进链条。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobPlan {
    pub job_id: String,
    pub job_name: String,
    pub nodes: Vec<PlanNode>,
}

impl JobPlan {
    pub fn node(&self, index: usize) -> Option<&PlanNode> {
        self.nodes.get(index)
    }

    /// 计划中的任务总数，含隐式汇合任务
    pub fn task_count(&self) -> usize {
        self.nodes
            .iter()
            .map(|node| match node {
                PlanNode::Single(_) => 1,
                PlanNode::Group { branches, .. } => branches.len() + 1,
            })
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_plan() -> JobPlan {
        JobPlan {
            job_id: "job-1".to_string(),
            job_name: "pipeline".to_string(),
            nodes: vec![
                PlanNode::Single(PlannedTask::new(TaskCall::new("a"))),
                PlanNode::Group {
                    branches: vec![
                        PlannedTask::new(TaskCall::new("b")),
                        PlannedTask::new(TaskCall::new("c")),
                    ],
                    join: PlannedTask::new(TaskCall::new(JOIN_TASK_NAME)),
                },
                PlanNode::Single(PlannedTask::new(TaskCall::new("d"))),
            ],
        }
    }

    #[test]
    fn test_task_count_includes_join() {
        assert_eq!(sample_plan().task_count(), 5);
    }

    #[test]
    fn test_entry_and_exit_tasks() {
        let plan = sample_plan();
        assert_eq!(plan.node(0).unwrap().entry_tasks().len(), 1);

        let group = plan.node(1).unwrap();
        assert_eq!(group.entry_tasks().len(), 2);
        if let PlanNode::Group { join, .. } = group {
            assert_eq!(group.exit_task_id(), join.task_id);
        } else {
            panic!("Expected group node");
        }
    }

    #[test]
    fn test_plan_serialization_roundtrip() {
        let plan = sample_plan();
        let json = serde_json::to_string(&plan).expect("serialize");
        let parsed: JobPlan = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed, plan);
    }
}
