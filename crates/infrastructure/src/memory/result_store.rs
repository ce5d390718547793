use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use beehive_core::{
    BeehiveError, BeehiveResult, JobPlan, ResultStore, ScheduleEntry, ScheduleStore, SharedData,
    TaskKind, TaskPatch, TaskRecord,
};

/// An in-memory value with its own expiry deadline.
#[derive(Debug, Clone)]
struct Expiring<T> {
    value: T,
    expires_at: Instant,
}

impl<T> Expiring<T> {
    fn new(value: T, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }

    fn remaining_seconds(&self) -> i64 {
        self.expires_at
            .saturating_duration_since(Instant::now())
            .as_secs() as i64
    }
}

#[derive(Default)]
struct MemoryInner {
    records: HashMap<String, Expiring<TaskRecord>>,
    plans: HashMap<String, Expiring<JobPlan>>,
    shared: HashMap<String, Expiring<SharedData>>,
    stacks: HashMap<String, Expiring<Vec<serde_json::Value>>>,
    markers: HashMap<String, Expiring<()>>,
    schedules: HashMap<String, ScheduleEntry>,
}

/// In-memory result store for embedded deployments and tests.
///
/// Mirrors the TTL semantics of the Redis-backed store: expiry is
/// evaluated lazily on read, every write refreshes the deadline.
/// Schedule entries have no TTL and survive until deleted.
#[derive(Default)]
pub struct MemoryResultStore {
    inner: RwLock<MemoryInner>,
}

impl MemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ResultStore for MemoryResultStore {
    async fn put(&self, task_id: &str, record: &TaskRecord, ttl: Duration) -> BeehiveResult<()> {
        let mut inner = self.inner.write().await;
        inner
            .records
            .insert(task_id.to_string(), Expiring::new(record.clone(), ttl));
        Ok(())
    }

    async fn get(&self, task_id: &str) -> BeehiveResult<TaskRecord> {
        let inner = self.inner.read().await;
        match inner.records.get(task_id) {
            Some(entry) if !entry.is_expired() => Ok(entry.value.clone()),
            _ => Err(BeehiveError::TaskNotFound {
                id: task_id.to_string(),
            }),
        }
    }

    async fn merge_update(
        &self,
        task_id: &str,
        patch: TaskPatch,
        ttl: Duration,
    ) -> BeehiveResult<TaskRecord> {
        let mut inner = self.inner.write().await;
        let mut record = match inner.records.get(task_id) {
            Some(entry) if !entry.is_expired() => entry.value.clone(),
            _ => TaskRecord::new(task_id.to_string(), String::new(), TaskKind::Task),
        };
        patch.apply(&mut record);
        inner
            .records
            .insert(task_id.to_string(), Expiring::new(record.clone(), ttl));
        Ok(record)
    }

    async fn scan(&self, prefix: &str) -> BeehiveResult<Vec<String>> {
        let inner = self.inner.read().await;
        Ok(inner
            .records
            .iter()
            .filter(|(id, entry)| id.starts_with(prefix) && !entry.is_expired())
            .map(|(id, _)| id.clone())
            .collect())
    }

    async fn scan_with_ttl(
        &self,
        prefix: &str,
    ) -> BeehiveResult<Vec<(String, TaskRecord, i64)>> {
        let inner = self.inner.read().await;
        Ok(inner
            .records
            .iter()
            .filter(|(id, entry)| id.starts_with(prefix) && !entry.is_expired())
            .map(|(id, entry)| (id.clone(), entry.value.clone(), entry.remaining_seconds()))
            .collect())
    }

    async fn delete(&self, task_id: &str) -> BeehiveResult<bool> {
        let mut inner = self.inner.write().await;
        Ok(inner.records.remove(task_id).is_some())
    }

    async fn delete_prefix(&self, prefix: &str) -> BeehiveResult<u64> {
        let mut inner = self.inner.write().await;
        let to_remove: Vec<String> = inner
            .records
            .keys()
            .filter(|id| id.starts_with(prefix))
            .cloned()
            .collect();
        for id in &to_remove {
            inner.records.remove(id);
        }
        Ok(to_remove.len() as u64)
    }

    async fn purge_all(&self) -> BeehiveResult<u64> {
        let mut inner = self.inner.write().await;
        let purged = inner.records.len()
            + inner.plans.len()
            + inner.shared.len()
            + inner.stacks.len()
            + inner.markers.len();
        inner.records.clear();
        inner.plans.clear();
        inner.shared.clear();
        inner.stacks.clear();
        inner.markers.clear();
        debug!("Purged {} entries from in-memory store", purged);
        Ok(purged as u64)
    }

    async fn acquire_marker(&self, key: &str, ttl: Duration) -> BeehiveResult<bool> {
        let mut inner = self.inner.write().await;
        match inner.markers.get(key) {
            Some(entry) if !entry.is_expired() => Ok(false),
            _ => {
                inner.markers.insert(key.to_string(), Expiring::new((), ttl));
                Ok(true)
            }
        }
    }

    async fn marker_exists(&self, key: &str) -> BeehiveResult<bool> {
        let inner = self.inner.read().await;
        Ok(matches!(inner.markers.get(key), Some(entry) if !entry.is_expired()))
    }

    async fn put_plan(&self, plan: &JobPlan, ttl: Duration) -> BeehiveResult<()> {
        let mut inner = self.inner.write().await;
        inner
            .plans
            .insert(plan.job_id.clone(), Expiring::new(plan.clone(), ttl));
        Ok(())
    }

    async fn get_plan(&self, job_id: &str) -> BeehiveResult<JobPlan> {
        let inner = self.inner.read().await;
        match inner.plans.get(job_id) {
            Some(entry) if !entry.is_expired() => Ok(entry.value.clone()),
            _ => Err(BeehiveError::TaskNotFound {
                id: job_id.to_string(),
            }),
        }
    }

    async fn get_shared(&self, job_id: &str) -> BeehiveResult<SharedData> {
        let inner = self.inner.read().await;
        match inner.shared.get(job_id) {
            Some(entry) if !entry.is_expired() => Ok(entry.value.clone()),
            _ => Ok(SharedData::default()),
        }
    }

    async fn set_shared(
        &self,
        job_id: &str,
        data: &SharedData,
        ttl: Duration,
    ) -> BeehiveResult<()> {
        let mut inner = self.inner.write().await;
        inner
            .shared
            .insert(job_id.to_string(), Expiring::new(data.clone(), ttl));
        Ok(())
    }

    async fn push_stack(
        &self,
        job_id: &str,
        value: &serde_json::Value,
        ttl: Duration,
    ) -> BeehiveResult<()> {
        let mut inner = self.inner.write().await;
        let mut stack = match inner.stacks.get(job_id) {
            Some(entry) if !entry.is_expired() => entry.value.clone(),
            _ => Vec::new(),
        };
        stack.push(value.clone());
        inner
            .stacks
            .insert(job_id.to_string(), Expiring::new(stack, ttl));
        Ok(())
    }

    async fn pop_stack(&self, job_id: &str) -> BeehiveResult<Option<serde_json::Value>> {
        let mut inner = self.inner.write().await;
        match inner.stacks.get_mut(job_id) {
            Some(entry) if !entry.is_expired() => Ok(entry.value.pop()),
            _ => Ok(None),
        }
    }
}

#[async_trait]
impl ScheduleStore for MemoryResultStore {
    async fn upsert_entry(&self, entry: &ScheduleEntry) -> BeehiveResult<()> {
        let mut inner = self.inner.write().await;
        inner.schedules.insert(entry.name.clone(), entry.clone());
        Ok(())
    }

    async fn get_entry(&self, name: &str) -> BeehiveResult<ScheduleEntry> {
        let inner = self.inner.read().await;
        inner
            .schedules
            .get(name)
            .cloned()
            .ok_or_else(|| BeehiveError::ScheduleNotFound {
                name: name.to_string(),
            })
    }

    async fn list_entries(&self) -> BeehiveResult<Vec<ScheduleEntry>> {
        let inner = self.inner.read().await;
        let mut entries: Vec<ScheduleEntry> = inner.schedules.values().cloned().collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn delete_entry(&self, name: &str) -> BeehiveResult<bool> {
        let mut inner = self.inner.write().await;
        Ok(inner.schedules.remove(name).is_some())
    }

    async fn clear_entries(&self) -> BeehiveResult<u64> {
        let mut inner = self.inner.write().await;
        let count = inner.schedules.len() as u64;
        inner.schedules.clear();
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beehive_core::{IntervalSpec, ScheduleSpec, SubmitOptions, TaskStatus};
    use serde_json::json;

    fn record(id: &str) -> TaskRecord {
        TaskRecord::new(id.to_string(), "demo".to_string(), TaskKind::Task)
    }

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let store = MemoryResultStore::new();
        let mut rec = record("t-1");
        rec.status = TaskStatus::Success;
        rec.result = Some(json!({"ok": true}));

        store
            .put("t-1", &rec, Duration::from_secs(60))
            .await
            .unwrap();
        let fetched = store.get("t-1").await.unwrap();
        assert_eq!(fetched.task_id, "t-1");
        assert_eq!(fetched.status, TaskStatus::Success);
        assert_eq!(fetched.result, Some(json!({"ok": true})));
    }

    #[tokio::test]
    async fn test_get_after_expiry_is_not_found() {
        let store = MemoryResultStore::new();
        store
            .put("t-1", &record("t-1"), Duration::from_millis(20))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;

        assert!(matches!(
            store.get("t-1").await,
            Err(BeehiveError::TaskNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_merge_update_starts_from_empty_record() {
        let store = MemoryResultStore::new();
        let patch = TaskPatch {
            status: Some(TaskStatus::Progress),
            worker: Some("worker-1".to_string()),
            ..Default::default()
        };
        let merged = store
            .merge_update("t-9", patch, Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(merged.task_id, "t-9");
        assert_eq!(merged.status, TaskStatus::Progress);
        assert_eq!(merged.worker.as_deref(), Some("worker-1"));
    }

    #[tokio::test]
    async fn test_scan_and_delete_prefix() {
        let store = MemoryResultStore::new();
        let ttl = Duration::from_secs(60);
        store.put("job-1", &record("job-1"), ttl).await.unwrap();
        store.put("job-2", &record("job-2"), ttl).await.unwrap();
        store.put("other", &record("other"), ttl).await.unwrap();

        let mut ids = store.scan("job-").await.unwrap();
        ids.sort();
        assert_eq!(ids, vec!["job-1".to_string(), "job-2".to_string()]);

        let removed = store.delete_prefix("job-").await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.scan("").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_marker_acquired_exactly_once() {
        let store = MemoryResultStore::new();
        let ttl = Duration::from_secs(60);
        assert!(store.acquire_marker("join-1", ttl).await.unwrap());
        assert!(!store.acquire_marker("join-1", ttl).await.unwrap());
        assert!(store.marker_exists("join-1").await.unwrap());
        assert!(!store.marker_exists("join-2").await.unwrap());
    }

    #[tokio::test]
    async fn test_stack_is_lifo_with_none_sentinel() {
        let store = MemoryResultStore::new();
        let ttl = Duration::from_secs(60);
        store.push_stack("job-1", &json!(1), ttl).await.unwrap();
        store.push_stack("job-1", &json!(2), ttl).await.unwrap();

        assert_eq!(store.pop_stack("job-1").await.unwrap(), Some(json!(2)));
        assert_eq!(store.pop_stack("job-1").await.unwrap(), Some(json!(1)));
        assert_eq!(store.pop_stack("job-1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_shared_data_defaults_and_versions() {
        let store = MemoryResultStore::new();
        let initial = store.get_shared("job-1").await.unwrap();
        assert_eq!(initial.version, 0);
        assert_eq!(initial.data, json!({}));

        let next = SharedData {
            version: 1,
            data: json!({"key": "value"}),
        };
        store
            .set_shared("job-1", &next, Duration::from_secs(60))
            .await
            .unwrap();
        let fetched = store.get_shared("job-1").await.unwrap();
        assert_eq!(fetched.version, 1);
        assert_eq!(fetched.data, json!({"key": "value"}));
    }

    #[tokio::test]
    async fn test_schedule_store_crud() {
        let store = MemoryResultStore::new();
        let entry = ScheduleEntry::new(
            "cleanup".to_string(),
            "nightly_cleanup".to_string(),
            ScheduleSpec::Interval(IntervalSpec::from_seconds(60)),
            json!([]),
            json!({}),
            SubmitOptions::default(),
            false,
        );

        store.upsert_entry(&entry).await.unwrap();
        let fetched = store.get_entry("cleanup").await.unwrap();
        assert_eq!(fetched.task, "nightly_cleanup");

        assert_eq!(store.list_entries().await.unwrap().len(), 1);
        assert!(store.delete_entry("cleanup").await.unwrap());
        assert!(!store.delete_entry("cleanup").await.unwrap());
        assert!(matches!(
            store.get_entry("cleanup").await,
            Err(BeehiveError::ScheduleNotFound { .. })
        ));
    }
}
