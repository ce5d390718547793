pub mod archive;
pub mod memory;
pub mod metrics_collector;
pub mod redis;

pub use archive::SqliteTaskArchive;
pub use memory::{InMemoryMessageQueue, MemoryResultStore};
pub use metrics_collector::MetricsCollector;
pub use self::redis::{RedisConnectionManager, RedisResultStore, RedisStreamQueue};
