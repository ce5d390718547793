use metrics::{counter, gauge, histogram};

use beehive_core::TaskStatus;

/// 调度核心的指标采集入口
///
/// 仅负责打点，记录器由二进制入口安装（Prometheus exporter）。
#[derive(Debug, Default, Clone)]
pub struct MetricsCollector;

impl MetricsCollector {
    pub fn new() -> Self {
        Self
    }

    pub fn record_task_submitted(&self, task_name: &str) {
        counter!("beehive_tasks_submitted_total", "task" => task_name.to_string()).increment(1);
    }

    pub fn record_task_completed(&self, task_name: &str, status: TaskStatus, duration_ms: u64) {
        counter!(
            "beehive_tasks_completed_total",
            "task" => task_name.to_string(),
            "status" => status.as_str()
        )
        .increment(1);
        histogram!("beehive_task_duration_ms", "task" => task_name.to_string())
            .record(duration_ms as f64);
    }

    pub fn record_job_finished(&self, status: TaskStatus) {
        counter!("beehive_jobs_finished_total", "status" => status.as_str()).increment(1);
    }

    pub fn record_schedule_fired(&self, schedule_name: &str) {
        counter!("beehive_schedules_fired_total", "schedule" => schedule_name.to_string())
            .increment(1);
    }

    pub fn record_schedule_dispatch_error(&self, schedule_name: &str) {
        counter!(
            "beehive_schedule_dispatch_errors_total",
            "schedule" => schedule_name.to_string()
        )
        .increment(1);
    }

    pub fn record_beat_tick_duration(&self, seconds: f64) {
        histogram!("beehive_beat_tick_duration_seconds").record(seconds);
    }

    pub fn record_store_operation(&self, operation: &'static str, seconds: f64) {
        histogram!("beehive_store_operation_duration_seconds", "operation" => operation)
            .record(seconds);
    }

    pub fn set_running_tasks(&self, count: usize) {
        gauge!("beehive_worker_running_tasks").set(count as f64);
    }
}
