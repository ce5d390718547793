use uuid::Uuid;

use beehive_core::{
    BeehiveError, BeehiveResult, JobPlan, PlanNode, PlannedTask, TaskCall, JOIN_TASK_NAME,
};

/// 流水线中的一个声明式步骤
///
/// 扁平序列里的元素要么是单个任务，要么是并行组；并行组的成员
/// 并发执行，组后隐式插入汇合屏障，之后才继续下一个顺序步骤。
#[derive(Debug, Clone)]
pub enum Step {
    Task(TaskCall),
    Group(Vec<TaskCall>),
}

impl Step {
    pub fn task(name: impl Into<String>) -> Self {
        Step::Task(TaskCall::new(name))
    }

    pub fn group(calls: Vec<TaskCall>) -> Self {
        Step::Group(calls)
    }
}

/// 把声明式步骤序列编译为可执行的作业计划
///
/// 所有任务ID（含隐式汇合任务）在此分配，保证图的边是确定的。
pub fn build_job(job_name: impl Into<String>, steps: Vec<Step>) -> BeehiveResult<JobPlan> {
    if steps.is_empty() {
        return Err(BeehiveError::InvalidTaskParams(
            "作业至少需要一个步骤".to_string(),
        ));
    }

    let mut nodes = Vec::with_capacity(steps.len());
    for step in steps {
        match step {
            Step::Task(call) => nodes.push(PlanNode::Single(PlannedTask::new(call))),
            Step::Group(calls) => {
                if calls.is_empty() {
                    return Err(BeehiveError::InvalidTaskParams(
                        "并行组不能为空".to_string(),
                    ));
                }
                nodes.push(PlanNode::Group {
                    branches: calls.into_iter().map(PlannedTask::new).collect(),
                    join: PlannedTask::new(TaskCall::new(JOIN_TASK_NAME)),
                });
            }
        }
    }

    Ok(JobPlan {
        job_id: Uuid::new_v4().to_string(),
        job_name: job_name.into(),
        nodes,
    })
}
