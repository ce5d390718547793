use std::collections::HashMap;
use std::process::Stdio;
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{error, info};

use beehive_core::{BeehiveError, BeehiveResult};

use crate::registry::{TaskContext, TaskHandler};

/// Shell任务参数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShellTaskParams {
    /// 要执行的命令
    pub command: String,
    /// 命令参数
    pub args: Option<Vec<String>>,
    /// 工作目录
    pub working_dir: Option<String>,
    /// 环境变量
    pub env_vars: Option<HashMap<String, String>>,
}

/// Shell任务处理器
pub struct ShellHandler;

#[async_trait]
impl TaskHandler for ShellHandler {
    async fn run(
        &self,
        ctx: &TaskContext,
        _args: &serde_json::Value,
        kwargs: &serde_json::Value,
    ) -> BeehiveResult<serde_json::Value> {
        let start_time = Instant::now();
        let params: ShellTaskParams = serde_json::from_value(kwargs.clone())
            .map_err(|e| BeehiveError::InvalidTaskParams(format!("解析Shell任务参数失败: {e}")))?;

        info!(
            "执行Shell任务: task_id={}, command={}",
            ctx.task_id, params.command
        );

        let mut cmd = Command::new(&params.command);
        cmd.args(params.args.unwrap_or_default());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        if let Some(ref dir) = params.working_dir {
            cmd.current_dir(dir);
        }
        for (key, value) in params.env_vars.unwrap_or_default() {
            cmd.env(key, value);
        }

        let output = cmd
            .output()
            .await
            .map_err(|e| BeehiveError::TaskExecution(format!("启动Shell命令失败: {e}")))?;

        let stdout = String::from_utf8_lossy(&output.stdout).trim_end().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim_end().to_string();
        let exit_code = output.status.code();

        if !output.status.success() {
            error!(
                "Shell任务失败: task_id={}, exit_code={:?}",
                ctx.task_id, exit_code
            );
            return Err(BeehiveError::TaskExecution(format!(
                "命令执行失败，退出码: {exit_code:?}, stderr: {stderr}"
            )));
        }

        info!(
            "Shell任务执行完成: task_id={}, duration={}ms",
            ctx.task_id,
            start_time.elapsed().as_millis()
        );

        Ok(serde_json::json!({
            "stdout": stdout,
            "stderr": stderr,
            "exit_code": exit_code,
        }))
    }
}

/// HTTP任务参数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpTaskParams {
    /// 请求URL
    pub url: String,
    /// HTTP方法
    pub method: Option<String>,
    /// 请求头
    pub headers: Option<HashMap<String, String>>,
    /// 请求体
    pub body: Option<String>,
}

/// HTTP任务处理器
pub struct HttpHandler {
    client: reqwest::Client,
}

impl HttpHandler {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskHandler for HttpHandler {
    async fn run(
        &self,
        ctx: &TaskContext,
        _args: &serde_json::Value,
        kwargs: &serde_json::Value,
    ) -> BeehiveResult<serde_json::Value> {
        let params: HttpTaskParams = serde_json::from_value(kwargs.clone())
            .map_err(|e| BeehiveError::InvalidTaskParams(format!("解析HTTP任务参数失败: {e}")))?;

        let method = params.method.unwrap_or_else(|| "GET".to_string());
        info!(
            "执行HTTP任务: task_id={}, method={}, url={}",
            ctx.task_id, method, params.url
        );

        let mut request = match method.to_uppercase().as_str() {
            "GET" => self.client.get(&params.url),
            "POST" => self.client.post(&params.url),
            "PUT" => self.client.put(&params.url),
            "DELETE" => self.client.delete(&params.url),
            "PATCH" => self.client.patch(&params.url),
            "HEAD" => self.client.head(&params.url),
            _ => {
                return Err(BeehiveError::InvalidTaskParams(format!(
                    "不支持的HTTP方法: {method}"
                )));
            }
        };

        for (key, value) in params.headers.unwrap_or_default() {
            request = request.header(&key, &value);
        }
        if let Some(body) = params.body {
            request = request.body(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| BeehiveError::TaskExecution(format!("HTTP请求失败: {e}")))?;

        let status = response.status().as_u16();
        let success = response.status().is_success();
        let body = response
            .text()
            .await
            .unwrap_or_else(|e| format!("读取响应体失败: {e}"));

        if !success {
            error!(
                "HTTP任务失败: task_id={}, status={}",
                ctx.task_id, status
            );
            return Err(BeehiveError::TaskExecution(format!(
                "HTTP请求失败，状态码: {status}"
            )));
        }

        info!(
            "HTTP任务执行完成: task_id={}, status={}",
            ctx.task_id, status
        );
        Ok(serde_json::json!({
            "status": status,
            "body": body,
        }))
    }
}

/// 休眠任务处理器，用于演示与测试
pub struct SleepHandler;

#[async_trait]
impl TaskHandler for SleepHandler {
    async fn run(
        &self,
        ctx: &TaskContext,
        args: &serde_json::Value,
        kwargs: &serde_json::Value,
    ) -> BeehiveResult<serde_json::Value> {
        let millis = kwargs
            .get("millis")
            .and_then(|v| v.as_u64())
            .or_else(|| args.get(0).and_then(|v| v.as_u64()))
            .unwrap_or(100);

        ctx.progress(format!("sleeping {millis}ms")).await;
        tokio::time::sleep(std::time::Duration::from_millis(millis)).await;
        Ok(serde_json::json!({ "slept_ms": millis }))
    }
}
