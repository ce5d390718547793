pub mod config;
pub mod errors;
pub mod models;
pub mod traits;

pub use self::config::{
    AppConfig, ArchiveConfig, BackendKind, BeatConfig, ObservabilityConfig, QueueConfig,
    StoreConfig, WorkerConfig,
};
pub use errors::{BeehiveError, BeehiveResult};
pub use models::{
    AdminAction, CallerIdentity, CrontabSpec, GraphEdge, GraphNode, GraphWarning, IntervalSpec,
    JobPlan, Message, MessageType, NodeRole, PlanNode, PlannedTask, ScheduleEntry, ScheduleSpec,
    SharedContext, SharedData, SubmitOptions, TaskCall, TaskControlAction, TaskControlMessage,
    TaskDispatchMessage, TaskFilter, TaskGraph, TaskKind, TaskPatch, TaskRecord, TaskStatus,
    TraceEntry, JOIN_TASK_NAME,
};
pub use traits::{
    AllowAll, MessageQueue, PermissionChecker, ResultStore, ScheduleStore, SnapshotPermissions,
    TaskArchive,
};
