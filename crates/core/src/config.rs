use std::path::Path;

use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

/// 存储后端选择
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// 进程内存，适用于嵌入式部署与测试
    Memory,
    Redis,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub backend: BackendKind,
    pub redis_url: String,
    /// 所有键的公共命名空间前缀
    pub namespace: String,
    /// 任务记录TTL（秒）
    pub result_ttl_seconds: u64,
    pub max_retry_attempts: u32,
    pub retry_delay_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    pub backend: BackendKind,
    pub redis_url: String,
    pub task_queue: String,
    pub consumer_group_prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub enabled: bool,
    /// 为空时由进程按 hostname-pid 生成
    pub worker_id: String,
    pub max_concurrent_tasks: usize,
    pub poll_interval_ms: u64,
    /// 无类别覆盖时的任务超时
    pub default_task_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BeatConfig {
    pub enabled: bool,
    pub tick_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveConfig {
    pub enabled: bool,
    pub sqlite_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    pub log_level: String,
    pub metrics_enabled: bool,
}

/// 应用配置
///
/// TOML文件 + `BEEHIVE__` 前缀环境变量覆盖 + 内置默认值。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub store: StoreConfig,
    pub queue: QueueConfig,
    pub worker: WorkerConfig,
    pub beat: BeatConfig,
    pub archive: ArchiveConfig,
    pub observability: ObservabilityConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig {
                backend: BackendKind::Memory,
                redis_url: "redis://localhost:6379".to_string(),
                namespace: "beehive".to_string(),
                result_ttl_seconds: 3600,
                max_retry_attempts: 3,
                retry_delay_seconds: 2,
            },
            queue: QueueConfig {
                backend: BackendKind::Memory,
                redis_url: "redis://localhost:6379".to_string(),
                task_queue: "beehive-tasks".to_string(),
                consumer_group_prefix: "beehive".to_string(),
            },
            worker: WorkerConfig {
                enabled: true,
                worker_id: String::new(),
                max_concurrent_tasks: 5,
                poll_interval_ms: 500,
                default_task_timeout_seconds: 300,
            },
            beat: BeatConfig {
                enabled: true,
                tick_seconds: 1,
            },
            archive: ArchiveConfig {
                enabled: false,
                sqlite_path: "beehive-archive.db".to_string(),
            },
            observability: ObservabilityConfig {
                log_level: "info".to_string(),
                metrics_enabled: true,
            },
        }
    }
}

impl AppConfig {
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let defaults = AppConfig::default();
        let mut builder = ConfigBuilder::builder()
            .add_source(config::Config::try_from(&defaults).context("构造默认配置失败")?);

        if let Some(path) = config_path {
            if Path::new(path).exists() {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            } else {
                return Err(anyhow::anyhow!("配置文件不存在: {path}"));
            }
        } else {
            let default_paths = ["config/beehive.toml", "beehive.toml", "/etc/beehive/config.toml"];
            for path in &default_paths {
                if Path::new(path).exists() {
                    builder = builder.add_source(File::new(path, FileFormat::Toml));
                    break;
                }
            }
        }

        builder = builder.add_source(Environment::with_prefix("BEEHIVE").separator("__"));

        let config = builder.build().context("合并配置源失败")?;
        config.try_deserialize().context("解析配置失败")
    }

    pub fn result_ttl(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.store.result_ttl_seconds)
    }
}
