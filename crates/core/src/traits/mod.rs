mod message_queue;
mod permission;
mod result_store;
mod schedule_store;
mod task_archive;

pub use message_queue::MessageQueue;
pub use permission::{AllowAll, PermissionChecker, SnapshotPermissions};
pub use result_store::ResultStore;
pub use schedule_store::ScheduleStore;
pub use task_archive::TaskArchive;
