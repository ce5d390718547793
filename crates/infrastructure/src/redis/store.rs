use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use beehive_core::{
    BeehiveError, BeehiveResult, JobPlan, ResultStore, ScheduleEntry, ScheduleStore, SharedData,
    StoreConfig, TaskKind, TaskPatch, TaskRecord,
};

use super::connection_manager::RedisConnectionManager;

/// Redis-backed result store.
///
/// Key layout under the configured namespace (default `beehive`):
/// `{ns}-task-{task_id}`, `{ns}-plan-{job_id}`, `{ns}-shared-{job_id}`,
/// `{ns}-stack-{job_id}`, `{ns}-marker-{key}` — all TTL-bounded — and the
/// schedule registry hash `{ns}-schedules` without TTL.
pub struct RedisResultStore {
    connection: Arc<RedisConnectionManager>,
    namespace: String,
}

impl RedisResultStore {
    pub async fn new(config: &StoreConfig) -> BeehiveResult<Self> {
        let connection = Arc::new(
            RedisConnectionManager::new(
                &config.redis_url,
                config.max_retry_attempts,
                Duration::from_secs(config.retry_delay_seconds),
            )
            .await?,
        );
        Ok(Self {
            connection,
            namespace: config.namespace.clone(),
        })
    }

    pub fn with_connection(connection: Arc<RedisConnectionManager>, namespace: String) -> Self {
        Self {
            connection,
            namespace,
        }
    }

    fn task_key(&self, task_id: &str) -> String {
        format!("{}-task-{}", self.namespace, task_id)
    }

    fn plan_key(&self, job_id: &str) -> String {
        format!("{}-plan-{}", self.namespace, job_id)
    }

    fn shared_key(&self, job_id: &str) -> String {
        format!("{}-shared-{}", self.namespace, job_id)
    }

    fn stack_key(&self, job_id: &str) -> String {
        format!("{}-stack-{}", self.namespace, job_id)
    }

    fn marker_key(&self, key: &str) -> String {
        format!("{}-marker-{}", self.namespace, key)
    }

    fn schedules_key(&self) -> String {
        format!("{}-schedules", self.namespace)
    }

    fn strip_task_prefix<'a>(&self, key: &'a str) -> &'a str {
        let prefix_len = self.namespace.len() + "-task-".len();
        &key[prefix_len.min(key.len())..]
    }

    async fn set_with_ttl(&self, key: &str, payload: &str, ttl: Duration) -> BeehiveResult<()> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(payload).arg("EX").arg(ttl.as_secs().max(1));
        let _: () = self.connection.execute_command(&mut cmd).await?;
        Ok(())
    }

    async fn get_string(&self, key: &str) -> BeehiveResult<Option<String>> {
        let mut cmd = redis::cmd("GET");
        cmd.arg(key);
        self.connection.execute_command(&mut cmd).await
    }

    async fn scan_keys(&self, pattern: &str) -> BeehiveResult<Vec<String>> {
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let mut cmd = redis::cmd("SCAN");
            cmd.arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(100);
            let (next_cursor, batch): (u64, Vec<String>) =
                self.connection.execute_command(&mut cmd).await?;
            keys.extend(batch);
            cursor = next_cursor;
            if cursor == 0 {
                break;
            }
        }
        Ok(keys)
    }

    async fn delete_keys(&self, keys: &[String]) -> BeehiveResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut deleted = 0u64;
        for chunk in keys.chunks(100) {
            let mut cmd = redis::cmd("DEL");
            for key in chunk {
                cmd.arg(key);
            }
            let count: u64 = self.connection.execute_command(&mut cmd).await?;
            deleted += count;
        }
        Ok(deleted)
    }
}

#[async_trait]
impl ResultStore for RedisResultStore {
    async fn put(&self, task_id: &str, record: &TaskRecord, ttl: Duration) -> BeehiveResult<()> {
        let payload = serde_json::to_string(record)?;
        self.set_with_ttl(&self.task_key(task_id), &payload, ttl)
            .await
    }

    async fn get(&self, task_id: &str) -> BeehiveResult<TaskRecord> {
        match self.get_string(&self.task_key(task_id)).await? {
            Some(payload) => Ok(serde_json::from_str(&payload)?),
            None => Err(BeehiveError::TaskNotFound {
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
        let mut record = match self.get_string(&self.task_key(task_id)).await? {
            Some(payload) => serde_json::from_str(&payload)?,
            None => TaskRecord::new(task_id.to_string(), String::new(), TaskKind::Task),
        };
        patch.apply(&mut record);
        self.put(task_id, &record, ttl).await?;
        Ok(record)
    }

    async fn scan(&self, prefix: &str) -> BeehiveResult<Vec<String>> {
        let pattern = format!("{}-task-{}*", self.namespace, prefix);
        let keys = self.scan_keys(&pattern).await?;
        Ok(keys
            .iter()
            .map(|key| self.strip_task_prefix(key).to_string())
            .collect())
    }

    async fn scan_with_ttl(
        &self,
        prefix: &str,
    ) -> BeehiveResult<Vec<(String, TaskRecord, i64)>> {
        let pattern = format!("{}-task-{}*", self.namespace, prefix);
        let keys = self.scan_keys(&pattern).await?;

        let mut results = Vec::with_capacity(keys.len());
        for key in keys {
            // The key may expire between SCAN and GET; skip it silently.
            let payload = match self.get_string(&key).await? {
                Some(payload) => payload,
                None => continue,
            };
            let record: TaskRecord = match serde_json::from_str(&payload) {
                Ok(record) => record,
                Err(e) => {
                    warn!("Skipping undecodable task record at {}: {}", key, e);
                    continue;
                }
            };
            let mut cmd = redis::cmd("TTL");
            cmd.arg(&key);
            let remaining: i64 = self.connection.execute_command(&mut cmd).await?;
            results.push((self.strip_task_prefix(&key).to_string(), record, remaining));
        }
        Ok(results)
    }

    async fn delete(&self, task_id: &str) -> BeehiveResult<bool> {
        let mut cmd = redis::cmd("DEL");
        cmd.arg(self.task_key(task_id));
        let deleted: i64 = self.connection.execute_command(&mut cmd).await?;
        Ok(deleted > 0)
    }

    async fn delete_prefix(&self, prefix: &str) -> BeehiveResult<u64> {
        let pattern = format!("{}-task-{}*", self.namespace, prefix);
        let keys = self.scan_keys(&pattern).await?;
        let deleted = self.delete_keys(&keys).await?;
        debug!("Deleted {} task records matching prefix '{}'", deleted, prefix);
        Ok(deleted)
    }

    async fn purge_all(&self) -> BeehiveResult<u64> {
        let mut deleted = 0u64;
        for family in ["task", "plan", "shared", "stack", "marker"] {
            let pattern = format!("{}-{}-*", self.namespace, family);
            let keys = self.scan_keys(&pattern).await?;
            deleted += self.delete_keys(&keys).await?;
        }
        debug!("Purged {} keys from Redis result store", deleted);
        Ok(deleted)
    }

    async fn acquire_marker(&self, key: &str, ttl: Duration) -> BeehiveResult<bool> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(self.marker_key(key))
            .arg("1")
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1));
        let reply: Option<String> = self.connection.execute_command(&mut cmd).await?;
        Ok(reply.is_some())
    }

    async fn marker_exists(&self, key: &str) -> BeehiveResult<bool> {
        let mut cmd = redis::cmd("EXISTS");
        cmd.arg(self.marker_key(key));
        let exists: i64 = self.connection.execute_command(&mut cmd).await?;
        Ok(exists > 0)
    }

    async fn put_plan(&self, plan: &JobPlan, ttl: Duration) -> BeehiveResult<()> {
        let payload = serde_json::to_string(plan)?;
        self.set_with_ttl(&self.plan_key(&plan.job_id), &payload, ttl)
            .await
    }

    async fn get_plan(&self, job_id: &str) -> BeehiveResult<JobPlan> {
        match self.get_string(&self.plan_key(job_id)).await? {
            Some(payload) => Ok(serde_json::from_str(&payload)?),
            None => Err(BeehiveError::TaskNotFound {
                id: job_id.to_string(),
            }),
        }
    }

    async fn get_shared(&self, job_id: &str) -> BeehiveResult<SharedData> {
        match self.get_string(&self.shared_key(job_id)).await? {
            Some(payload) => Ok(serde_json::from_str(&payload)?),
            None => Ok(SharedData::default()),
        }
    }

    async fn set_shared(
        &self,
        job_id: &str,
        data: &SharedData,
        ttl: Duration,
    ) -> BeehiveResult<()> {
        let payload = serde_json::to_string(data)?;
        self.set_with_ttl(&self.shared_key(job_id), &payload, ttl)
            .await
    }

    async fn push_stack(
        &self,
        job_id: &str,
        value: &serde_json::Value,
        ttl: Duration,
    ) -> BeehiveResult<()> {
        let key = self.stack_key(job_id);
        let payload = serde_json::to_string(value)?;
        let mut cmd = redis::cmd("LPUSH");
        cmd.arg(&key).arg(payload);
        let _: i64 = self.connection.execute_command(&mut cmd).await?;

        let mut expire = redis::cmd("EXPIRE");
        expire.arg(&key).arg(ttl.as_secs().max(1));
        let _: i64 = self.connection.execute_command(&mut expire).await?;
        Ok(())
    }

    async fn pop_stack(&self, job_id: &str) -> BeehiveResult<Option<serde_json::Value>> {
        let mut cmd = redis::cmd("LPOP");
        cmd.arg(self.stack_key(job_id));
        let payload: Option<String> = self.connection.execute_command(&mut cmd).await?;
        match payload {
            Some(payload) => Ok(Some(serde_json::from_str(&payload)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl ScheduleStore for RedisResultStore {
    async fn upsert_entry(&self, entry: &ScheduleEntry) -> BeehiveResult<()> {
        let payload = serde_json::to_string(entry)?;
        let mut cmd = redis::cmd("HSET");
        cmd.arg(self.schedules_key()).arg(&entry.name).arg(payload);
        let _: i64 = self.connection.execute_command(&mut cmd).await?;
        Ok(())
    }

    async fn get_entry(&self, name: &str) -> BeehiveResult<ScheduleEntry> {
        let mut cmd = redis::cmd("HGET");
        cmd.arg(self.schedules_key()).arg(name);
        let payload: Option<String> = self.connection.execute_command(&mut cmd).await?;
        match payload {
            Some(payload) => Ok(serde_json::from_str(&payload)?),
            None => Err(BeehiveError::ScheduleNotFound {
                name: name.to_string(),
            }),
        }
    }

    async fn list_entries(&self) -> BeehiveResult<Vec<ScheduleEntry>> {
        let mut cmd = redis::cmd("HGETALL");
        cmd.arg(self.schedules_key());
        let raw: std::collections::HashMap<String, String> =
            self.connection.execute_command(&mut cmd).await?;

        let mut entries = Vec::with_capacity(raw.len());
        for (name, payload) in raw {
            match serde_json::from_str(&payload) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!("Skipping undecodable schedule entry '{}': {}", name, e),
            }
        }
        entries.sort_by(|a: &ScheduleEntry, b: &ScheduleEntry| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn delete_entry(&self, name: &str) -> BeehiveResult<bool> {
        let mut cmd = redis::cmd("HDEL");
        cmd.arg(self.schedules_key()).arg(name);
        let deleted: i64 = self.connection.execute_command(&mut cmd).await?;
        Ok(deleted > 0)
    }

    async fn clear_entries(&self) -> BeehiveResult<u64> {
        let mut len_cmd = redis::cmd("HLEN");
        len_cmd.arg(self.schedules_key());
        let count: u64 = self.connection.execute_command(&mut len_cmd).await?;

        let mut cmd = redis::cmd("DEL");
        cmd.arg(self.schedules_key());
        let _: i64 = self.connection.execute_command(&mut cmd).await?;
        Ok(count)
    }
}
