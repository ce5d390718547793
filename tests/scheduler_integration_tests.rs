use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tokio::sync::broadcast;

use beehive_core::{
    CallerIdentity, IntervalSpec, ResultStore, ScheduleEntry, ScheduleSpec, SubmitOptions,
    TaskFilter, TaskKind, TaskStatus,
};
use beehive_dispatcher::{BeatDispatcher, ScheduleRegistry};
use beehive_infrastructure::{
    InMemoryMessageQueue, MemoryResultStore, MetricsCollector, SqliteTaskArchive,
};
use beehive_orchestrator::{JobClient, Step};
use beehive_worker::{
    JobAdvancer, SleepHandler, TaskQueryService, TaskRegistry, TaskRunner, WorkerService,
};

const TTL: Duration = Duration::from_secs(3600);
const POLL: Duration = Duration::from_millis(10);

fn build_registry() -> Arc<TaskRegistry> {
    let mut registry = TaskRegistry::new();
    registry.register("sleep", TaskKind::Task, Arc::new(SleepHandler));
    Arc::new(registry)
}

fn start_worker(
    store: Arc<MemoryResultStore>,
    queue: Arc<InMemoryMessageQueue>,
    archive: Option<Arc<SqliteTaskArchive>>,
) -> broadcast::Sender<()> {
    let advancer = Arc::new(JobAdvancer::new(
        store.clone(),
        queue.clone(),
        "tasks".to_string(),
        TTL,
        MetricsCollector::new(),
    ));
    let runner = Arc::new(TaskRunner::new(
        store,
        build_registry(),
        advancer,
        archive.map(|a| a as Arc<dyn beehive_core::TaskArchive>),
        MetricsCollector::new(),
        "worker-sched".to_string(),
        TTL,
        Duration::from_secs(30),
    ));
    let service = WorkerService::new(
        "worker-sched".to_string(),
        queue,
        "tasks".to_string(),
        runner,
        MetricsCollector::new(),
        4,
        POLL,
    );
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    tokio::spawn(async move {
        let _ = service.run(shutdown_rx).await;
    });
    shutdown_tx
}

async fn wait_for_task(
    query: &TaskQueryService,
    predicate: impl Fn(&beehive_core::TaskRecord) -> bool,
) -> beehive_core::TaskRecord {
    for _ in 0..500 {
        let all = query.get_all_tasks(TaskFilter::default()).await.unwrap();
        if let Some(record) = all.into_iter().find(&predicate) {
            return record;
        }
        tokio::time::sleep(POLL).await;
    }
    panic!("expected task did not appear");
}

#[tokio::test]
async fn test_beat_fires_interval_schedule_into_worker() {
    let store = Arc::new(MemoryResultStore::new());
    let queue = Arc::new(InMemoryMessageQueue::new());
    let shutdown = start_worker(store.clone(), queue.clone(), None);

    let registry = Arc::new(ScheduleRegistry::new(store.clone()));
    let beat = BeatDispatcher::new(
        registry.clone(),
        queue,
        "tasks".to_string(),
        Duration::from_secs(1),
        MetricsCollector::new(),
    );

    let mut entry = ScheduleEntry::new(
        "heartbeat".to_string(),
        "sleep".to_string(),
        ScheduleSpec::Interval(IntervalSpec::from_seconds(60)),
        json!([]),
        json!({"millis": 1}),
        SubmitOptions::default(),
        true,
    );
    // 让条目立即到期
    entry.last_run_at = Utc::now() - chrono::Duration::seconds(120);
    registry.upsert(entry).await.unwrap();

    let fired = beat.tick_once(Utc::now()).await.unwrap();
    assert_eq!(fired, 1);

    let query = TaskQueryService::new(store.clone(), None, TTL.as_secs() as i64);
    let record = wait_for_task(&query, |r| r.name == "sleep" && r.is_finished()).await;
    assert_eq!(record.status, TaskStatus::Success);
    assert_eq!(record.submitted_by.as_deref(), Some("beat"));

    let after = registry.get("heartbeat").await.unwrap();
    assert_eq!(after.total_run_count, 1);

    let _ = shutdown.send(());
}

#[tokio::test]
async fn test_scenario_d_status_survives_fast_store_expiry() {
    let dir = tempfile::tempdir().unwrap();
    let archive = Arc::new(
        SqliteTaskArchive::new(dir.path().join("archive.db"))
            .await
            .unwrap(),
    );

    let store = Arc::new(MemoryResultStore::new());
    let queue = Arc::new(InMemoryMessageQueue::new());
    let shutdown = start_worker(store.clone(), queue.clone(), Some(archive.clone()));

    let client = JobClient::new(store.clone(), queue, "tasks".to_string(), TTL);
    let job_id = client
        .submit_job(
            "archived",
            vec![Step::task("sleep")],
            json!({}),
            &CallerIdentity::system(),
        )
        .await
        .unwrap();
    client
        .wait_for_job(&job_id, POLL, Duration::from_secs(10))
        .await
        .unwrap();

    let query = TaskQueryService::new(
        store.clone(),
        Some(archive as Arc<dyn beehive_core::TaskArchive>),
        TTL.as_secs() as i64,
    );
    let step = wait_for_task(&query, |r| r.name == "sleep" && r.is_finished()).await;

    // 模拟快速存储中的记录过期
    store.delete(&step.task_id).await.unwrap();
    assert!(store.get(&step.task_id).await.is_err());

    // 归档仍能回答最后已知状态
    let status = query.get_task_status(&step.task_id).await.unwrap();
    assert_eq!(status, TaskStatus::Success);

    let record = query.get_task(&step.task_id).await.unwrap();
    assert_eq!(record.worker.as_deref(), Some("worker-sched"));

    let _ = shutdown.send(());
}
