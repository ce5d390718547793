mod context;
mod graph;
mod message;
mod plan;
mod schedule;
mod task_record;

pub use context::{AdminAction, CallerIdentity, SharedContext, SharedData};
pub use graph::{GraphEdge, GraphNode, GraphWarning, NodeRole, TaskGraph};
pub use message::{
    Message, MessageType, TaskControlAction, TaskControlMessage, TaskDispatchMessage,
};
pub use plan::{JobPlan, PlanNode, PlannedTask, TaskCall, JOIN_TASK_NAME};
pub use schedule::{
    CrontabSpec, IntervalSpec, ScheduleEntry, ScheduleSpec, SubmitOptions,
};
pub use task_record::{TaskFilter, TaskKind, TaskPatch, TaskRecord, TaskStatus, TraceEntry};
