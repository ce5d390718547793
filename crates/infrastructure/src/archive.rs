use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use tracing::debug;

use beehive_core::{
    BeehiveError, BeehiveResult, TaskArchive, TaskKind, TaskRecord, TaskStatus, TraceEntry,
};

/// SQLite-backed durable task archive.
///
/// Terminal records and their trace rows are written here so status
/// queries can still be answered after the fast store has expired the
/// record. Writes are idempotent per task id.
pub struct SqliteTaskArchive {
    pool: SqlitePool,
}

impl SqliteTaskArchive {
    pub async fn new(path: impl AsRef<Path>) -> BeehiveResult<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|e| BeehiveError::Archive(format!("打开归档数据库失败: {e}")))?;

        let archive = Self { pool };
        archive.ensure_schema().await?;
        Ok(archive)
    }

    async fn ensure_schema(&self) -> BeehiveResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS task_records (
                task_id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                kind TEXT NOT NULL,
                status TEXT NOT NULL,
                run_time TEXT,
                start_time TEXT,
                stop_time TEXT,
                duration_ms INTEGER,
                parent_id TEXT,
                children TEXT NOT NULL,
                sub_jobs TEXT NOT NULL,
                args TEXT NOT NULL,
                kwargs TEXT NOT NULL,
                result TEXT,
                traceback TEXT,
                worker TEXT,
                submitted_by TEXT,
                archived_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| BeehiveError::Archive(format!("创建task_records表失败: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS task_traces (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                task_id TEXT NOT NULL,
                at TEXT NOT NULL,
                message TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| BeehiveError::Archive(format!("创建task_traces表失败: {e}")))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_task_traces_task_id ON task_traces(task_id)")
            .execute(&self.pool)
            .await
            .map_err(|e| BeehiveError::Archive(format!("创建trace索引失败: {e}")))?;

        Ok(())
    }
}

fn format_time(t: Option<DateTime<Utc>>) -> Option<String> {
    t.map(|t| t.to_rfc3339())
}

fn parse_time(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|t| t.with_timezone(&Utc))
}

fn parse_kind(s: &str) -> TaskKind {
    match s {
        "JOB" => TaskKind::Job,
        "JOBTASK" => TaskKind::JobTask,
        _ => TaskKind::Task,
    }
}

#[async_trait]
impl TaskArchive for SqliteTaskArchive {
    async fn archive(&self, record: &TaskRecord) -> BeehiveResult<()> {
        let children = serde_json::to_string(&record.children)?;
        let sub_jobs = serde_json::to_string(&record.sub_jobs)?;
        let args = serde_json::to_string(&record.args)?;
        let kwargs = serde_json::to_string(&record.kwargs)?;
        let result = record
            .result
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let traceback = record
            .traceback
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO task_records
                (task_id, name, kind, status, run_time, start_time, stop_time,
                 duration_ms, parent_id, children, sub_jobs, args, kwargs,
                 result, traceback, worker, submitted_by, archived_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.task_id)
        .bind(&record.name)
        .bind(record.kind.as_str())
        .bind(record.status.as_str())
        .bind(format_time(record.run_time))
        .bind(format_time(record.start_time))
        .bind(format_time(record.stop_time))
        .bind(record.duration_ms)
        .bind(&record.parent_id)
        .bind(children)
        .bind(sub_jobs)
        .bind(args)
        .bind(kwargs)
        .bind(result)
        .bind(traceback)
        .bind(&record.worker)
        .bind(&record.submitted_by)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| BeehiveError::Archive(format!("归档任务 {} 失败: {e}", record.task_id)))?;

        sqlx::query("DELETE FROM task_traces WHERE task_id = ?")
            .bind(&record.task_id)
            .execute(&self.pool)
            .await
            .map_err(|e| BeehiveError::Archive(format!("清理旧trace失败: {e}")))?;

        for entry in &record.trace {
            sqlx::query("INSERT INTO task_traces (task_id, at, message) VALUES (?, ?, ?)")
                .bind(&record.task_id)
                .bind(entry.at.to_rfc3339())
                .bind(&entry.message)
                .execute(&self.pool)
                .await
                .map_err(|e| BeehiveError::Archive(format!("写入trace失败: {e}")))?;
        }

        debug!("Archived task {} ({})", record.task_id, record.status.as_str());
        Ok(())
    }

    async fn get_status(&self, task_id: &str) -> BeehiveResult<Option<TaskStatus>> {
        let row = sqlx::query("SELECT status FROM task_records WHERE task_id = ?")
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| BeehiveError::Archive(format!("查询归档状态失败: {e}")))?;

        Ok(row.and_then(|row| {
            let status: String = row.get("status");
            TaskStatus::parse(&status)
        }))
    }

    async fn get_record(&self, task_id: &str) -> BeehiveResult<Option<TaskRecord>> {
        let row = sqlx::query("SELECT * FROM task_records WHERE task_id = ?")
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| BeehiveError::Archive(format!("查询归档记录失败: {e}")))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let status: String = row.get("status");
        let kind: String = row.get("kind");
        let children: String = row.get("children");
        let sub_jobs: String = row.get("sub_jobs");
        let args: String = row.get("args");
        let kwargs: String = row.get("kwargs");
        let result: Option<String> = row.get("result");
        let traceback: Option<String> = row.get("traceback");

        let mut record = TaskRecord::new(
            row.get::<String, _>("task_id"),
            row.get::<String, _>("name"),
            parse_kind(&kind),
        );
        record.status = TaskStatus::parse(&status).unwrap_or(TaskStatus::Failure);
        record.run_time = parse_time(row.get("run_time"));
        record.start_time = parse_time(row.get("start_time"));
        record.stop_time = parse_time(row.get("stop_time"));
        record.duration_ms = row.get("duration_ms");
        record.parent_id = row.get("parent_id");
        record.children = serde_json::from_str(&children).unwrap_or_default();
        record.sub_jobs = serde_json::from_str(&sub_jobs).unwrap_or_default();
        record.args = serde_json::Value::from_str(&args).unwrap_or(serde_json::Value::Null);
        record.kwargs = serde_json::Value::from_str(&kwargs).unwrap_or(serde_json::Value::Null);
        record.result = result.and_then(|r| serde_json::from_str(&r).ok());
        record.traceback = traceback.and_then(|t| serde_json::from_str(&t).ok());
        record.worker = row.get("worker");
        record.submitted_by = row.get("submitted_by");

        let trace_rows = sqlx::query(
            "SELECT at, message FROM task_traces WHERE task_id = ? ORDER BY id ASC",
        )
        .bind(task_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| BeehiveError::Archive(format!("查询trace失败: {e}")))?;

        for trace_row in trace_rows {
            let at: String = trace_row.get("at");
            if let Some(at) = parse_time(Some(at)) {
                record.trace.push(TraceEntry {
                    at,
                    message: trace_row.get("message"),
                });
            }
        }

        Ok(Some(record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn temp_archive() -> (tempfile::TempDir, SqliteTaskArchive) {
        let dir = tempfile::tempdir().expect("temp dir");
        let archive = SqliteTaskArchive::new(dir.path().join("archive.db"))
            .await
            .expect("open archive");
        (dir, archive)
    }

    fn terminal_record(id: &str) -> TaskRecord {
        let mut record = TaskRecord::new(id.to_string(), "backup".to_string(), TaskKind::JobTask);
        record.status = TaskStatus::Success;
        record.parent_id = Some("job-1".to_string());
        record.result = Some(json!({"rows": 10}));
        record.worker = Some("worker-1".to_string());
        record.start_time = Some(Utc::now());
        record.stop_time = Some(Utc::now());
        record.trace.push(TraceEntry {
            at: Utc::now(),
            message: "step one done".to_string(),
        });
        record
    }

    #[tokio::test]
    async fn test_archive_and_get_status() {
        let (_dir, archive) = temp_archive().await;
        archive.archive(&terminal_record("t-1")).await.unwrap();

        assert_eq!(
            archive.get_status("t-1").await.unwrap(),
            Some(TaskStatus::Success)
        );
        assert_eq!(archive.get_status("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_archive_roundtrip_with_traces() {
        let (_dir, archive) = temp_archive().await;
        let original = terminal_record("t-2");
        archive.archive(&original).await.unwrap();

        let fetched = archive.get_record("t-2").await.unwrap().expect("record");
        assert_eq!(fetched.task_id, "t-2");
        assert_eq!(fetched.name, "backup");
        assert_eq!(fetched.kind, TaskKind::JobTask);
        assert_eq!(fetched.status, TaskStatus::Success);
        assert_eq!(fetched.parent_id.as_deref(), Some("job-1"));
        assert_eq!(fetched.result, Some(json!({"rows": 10})));
        assert_eq!(fetched.trace.len(), 1);
        assert_eq!(fetched.trace[0].message, "step one done");
    }

    #[tokio::test]
    async fn test_archive_is_idempotent_per_task() {
        let (_dir, archive) = temp_archive().await;
        let mut record = terminal_record("t-3");
        archive.archive(&record).await.unwrap();

        record.trace.push(TraceEntry {
            at: Utc::now(),
            message: "late entry".to_string(),
        });
        archive.archive(&record).await.unwrap();

        let fetched = archive.get_record("t-3").await.unwrap().expect("record");
        // 重复归档覆盖而不是累加
        assert_eq!(fetched.trace.len(), 2);
    }
}
