use std::sync::Arc;

use tracing::{debug, info};

use beehive_core::{BeehiveResult, ScheduleEntry, ScheduleStore};

/// 调度注册表
///
/// 名称到调度条目的持久映射。按名称幂等注册：重复注册同名条目
/// 只覆盖定义部分，运行期字段（上次触发时间、累计触发次数）保持
/// 不变，仍只由Beat在成功触发后推进。
pub struct ScheduleRegistry {
    store: Arc<dyn ScheduleStore>,
}

impl ScheduleRegistry {
    pub fn new(store: Arc<dyn ScheduleStore>) -> Self {
        Self { store }
    }

    /// 注册或覆盖一个调度条目，返回条目名称
    pub async fn upsert(&self, mut entry: ScheduleEntry) -> BeehiveResult<String> {
        entry.spec.validate()?;

        if let Ok(existing) = self.store.get_entry(&entry.name).await {
            entry.last_run_at = existing.last_run_at;
            entry.total_run_count = existing.total_run_count;
            debug!("覆盖既有调度条目: {}", entry.name);
        } else {
            info!("注册新调度条目: {} -> {}", entry.name, entry.task);
        }

        let name = entry.name.clone();
        self.store.upsert_entry(&entry).await?;
        Ok(name)
    }

    pub async fn get(&self, name: &str) -> BeehiveResult<ScheduleEntry> {
        self.store.get_entry(name).await
    }

    pub async fn list_all(&self) -> BeehiveResult<Vec<(String, ScheduleEntry)>> {
        Ok(self
            .store
            .list_entries()
            .await?
            .into_iter()
            .map(|entry| (entry.name.clone(), entry))
            .collect())
    }

    pub async fn delete(&self, name: &str) -> BeehiveResult<bool> {
        let deleted = self.store.delete_entry(name).await?;
        if deleted {
            info!("已删除调度条目: {}", name);
        }
        Ok(deleted)
    }

    pub async fn clear_all(&self) -> BeehiveResult<u64> {
        let cleared = self.store.clear_entries().await?;
        info!("已清空调度注册表, 共 {} 个条目", cleared);
        Ok(cleared)
    }

    /// Beat触发成功后回写运行期字段，不经过幂等合并
    pub(crate) async fn persist_runtime(&self, entry: &ScheduleEntry) -> BeehiveResult<()> {
        self.store.upsert_entry(entry).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beehive_core::{IntervalSpec, ScheduleSpec, SubmitOptions};
    use beehive_infrastructure::MemoryResultStore;
    use chrono::Utc;
    use serde_json::json;

    fn entry(name: &str, seconds: u64) -> ScheduleEntry {
        ScheduleEntry::new(
            name.to_string(),
            "nightly_cleanup".to_string(),
            ScheduleSpec::Interval(IntervalSpec::from_seconds(seconds)),
            json!([]),
            json!({}),
            SubmitOptions::default(),
            true,
        )
    }

    fn registry() -> (Arc<MemoryResultStore>, ScheduleRegistry) {
        let store = Arc::new(MemoryResultStore::new());
        (store.clone(), ScheduleRegistry::new(store))
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent_on_runtime_fields() {
        let (_, registry) = registry();

        registry.upsert(entry("cleanup", 60)).await.unwrap();

        // 模拟一次触发
        let mut fired = registry.get("cleanup").await.unwrap();
        fired.mark_fired(Utc::now());
        registry.persist_runtime(&fired).await.unwrap();

        // 相同定义重复注册不重置计数
        registry.upsert(entry("cleanup", 60)).await.unwrap();
        let after = registry.get("cleanup").await.unwrap();
        assert_eq!(after.total_run_count, 1);
        assert_eq!(after.last_run_at, fired.last_run_at);

        // 仍然只有一个条目
        assert_eq!(registry.list_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_upsert_overwrites_definition() {
        let (_, registry) = registry();
        registry.upsert(entry("cleanup", 60)).await.unwrap();
        registry.upsert(entry("cleanup", 120)).await.unwrap();

        let after = registry.get("cleanup").await.unwrap();
        match after.spec {
            ScheduleSpec::Interval(spec) => assert_eq!(spec.seconds, 120),
            _ => panic!("Expected interval spec"),
        }
    }

    #[tokio::test]
    async fn test_upsert_rejects_invalid_spec() {
        let (_, registry) = registry();
        let bad = ScheduleEntry::new(
            "bad".to_string(),
            "task".to_string(),
            ScheduleSpec::Interval(IntervalSpec::default()),
            json!([]),
            json!({}),
            SubmitOptions::default(),
            false,
        );
        assert!(registry.upsert(bad).await.is_err());
        assert!(registry.get("bad").await.is_err());
    }

    #[tokio::test]
    async fn test_delete_and_clear() {
        let (_, registry) = registry();
        registry.upsert(entry("a", 60)).await.unwrap();
        registry.upsert(entry("b", 60)).await.unwrap();

        assert!(registry.delete("a").await.unwrap());
        assert!(!registry.delete("a").await.unwrap());
        assert_eq!(registry.clear_all().await.unwrap(), 1);
        assert!(registry.list_all().await.unwrap().is_empty());
    }
}
