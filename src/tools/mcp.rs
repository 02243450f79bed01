//! 外部工具供给进程适配器（stdio JSON-RPC 2.0）
//!
//! 启动工具供给进程（默认 `npx @brightdata/mcp`），完成 initialize 握手后通过 tools/list 拉取工具，
//! 每个远端工具包装为 McpTool 注册到 ToolRegistry；tools/call 的文本内容作为工具结果返回。
//! 同一连接上的请求串行化（stdin/stdout 由一把 Mutex 保护）；每个请求（含排队等锁）受 request_timeout 约束。

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;

use crate::core::AgentError;
use crate::tools::{Tool, ToolProvider};

const PROTOCOL_VERSION: &str = "2024-11-05";

/// 工具供给进程配置
#[derive(Debug, Clone)]
pub struct McpServerConfig {
    /// 服务名（日志与错误信息用）
    pub name: String,
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    /// 单个 JSON-RPC 请求的等待上限
    pub request_timeout: Duration,
}

/// tools/list 返回的单个工具描述
#[derive(Debug, Clone, Deserialize)]
pub struct McpToolInfo {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "inputSchema", default)]
    pub input_schema: Value,
}

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<u64>,
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    id: Option<u64>,
    result: Option<Value>,
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

struct StdioTransport {
    // 持有子进程句柄；连接释放时随 kill_on_drop 一并结束
    _process: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

/// stdio 工具供给客户端
pub struct McpClient {
    name: String,
    request_timeout: Duration,
    transport: Mutex<StdioTransport>,
    request_id: AtomicU64,
}

impl McpClient {
    /// 启动进程并完成握手：initialize -> notifications/initialized
    pub async fn connect(config: &McpServerConfig) -> Result<Self, AgentError> {
        let mut cmd = Command::new(&config.command);
        cmd.args(&config.args)
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut process = cmd.spawn().map_err(|e| {
            AgentError::ToolExecutionFailed(format!(
                "failed to spawn tool server '{}' ({}): {}",
                config.name, config.command, e
            ))
        })?;
        let stdin = process.stdin.take().ok_or_else(|| {
            AgentError::ToolExecutionFailed(format!("no stdin for tool server '{}'", config.name))
        })?;
        let stdout = process.stdout.take().ok_or_else(|| {
            AgentError::ToolExecutionFailed(format!("no stdout for tool server '{}'", config.name))
        })?;

        let client = Self {
            name: config.name.clone(),
            request_timeout: config.request_timeout,
            transport: Mutex::new(StdioTransport {
                _process: process,
                stdin,
                stdout: BufReader::new(stdout),
            }),
            request_id: AtomicU64::new(1),
        };

        client
            .request(
                "initialize",
                serde_json::json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": { "name": env!("CARGO_PKG_NAME"), "version": env!("CARGO_PKG_VERSION") }
                }),
            )
            .await?;
        client.notify("notifications/initialized").await?;
        tracing::info!(server = %client.name, "tool server connected");
        Ok(client)
    }

    async fn write_line(transport: &mut StdioTransport, req: &JsonRpcRequest<'_>) -> Result<(), AgentError> {
        let mut line = serde_json::to_string(req)
            .map_err(|e| AgentError::ToolExecutionFailed(e.to_string()))?;
        line.push('\n');
        transport
            .stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| AgentError::ToolExecutionFailed(format!("write failed: {}", e)))?;
        transport
            .stdin
            .flush()
            .await
            .map_err(|e| AgentError::ToolExecutionFailed(format!("flush failed: {}", e)))
    }

    async fn notify(&self, method: &str) -> Result<(), AgentError> {
        let mut transport = self.transport.lock().await;
        let req = JsonRpcRequest {
            jsonrpc: "2.0",
            id: None,
            method,
            params: None,
        };
        Self::write_line(&mut transport, &req).await
    }

    /// 发送请求并读取匹配 id 的响应；超时记为 ToolTimeout
    async fn request(&self, method: &str, params: Value) -> Result<Value, AgentError> {
        tokio::time::timeout(self.request_timeout, self.exchange(method, params))
            .await
            .map_err(|_| AgentError::ToolTimeout(format!("{} {}", self.name, method)))?
    }

    /// 期间收到的通知与 id 不匹配的行（包括此前超时请求的迟到响应）被跳过
    async fn exchange(&self, method: &str, params: Value) -> Result<Value, AgentError> {
        let id = self.request_id.fetch_add(1, Ordering::SeqCst);
        let mut transport = self.transport.lock().await;
        let req = JsonRpcRequest {
            jsonrpc: "2.0",
            id: Some(id),
            method,
            params: Some(params),
        };
        Self::write_line(&mut transport, &req).await?;

        let mut line = String::new();
        loop {
            line.clear();
            let n = transport
                .stdout
                .read_line(&mut line)
                .await
                .map_err(|e| AgentError::ToolExecutionFailed(format!("read failed: {}", e)))?;
            if n == 0 {
                return Err(AgentError::ToolExecutionFailed(format!(
                    "tool server '{}' closed its output",
                    self.name
                )));
            }
            let Ok(resp) = serde_json::from_str::<JsonRpcResponse>(line.trim()) else {
                continue;
            };
            if resp.id != Some(id) {
                continue;
            }
            if let Some(err) = resp.error {
                return Err(AgentError::ToolExecutionFailed(format!(
                    "{} failed ({}): {}",
                    method, err.code, err.message
                )));
            }
            return Ok(resp.result.unwrap_or(Value::Null));
        }
    }

    pub async fn list_tools(&self) -> Result<Vec<McpToolInfo>, AgentError> {
        let result = self.request("tools/list", serde_json::json!({})).await?;
        let tools = result.get("tools").cloned().unwrap_or(Value::Array(vec![]));
        serde_json::from_value(tools)
            .map_err(|e| AgentError::ToolExecutionFailed(format!("malformed tools/list: {}", e)))
    }

    /// 调用远端工具；isError=true 视为工具失败
    pub async fn call_tool(&self, name: &str, args: Value) -> Result<String, String> {
        let result = self
            .request(
                "tools/call",
                serde_json::json!({ "name": name, "arguments": args }),
            )
            .await
            .map_err(|e| e.to_string())?;
        let text = content_text(&result);
        if result.get("isError").and_then(Value::as_bool).unwrap_or(false) {
            Err(text)
        } else {
            Ok(text)
        }
    }
}

/// 拼接 tools/call 结果中的文本块
fn content_text(result: &Value) -> String {
    result
        .get("content")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|c| c.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("\n")
        })
        .unwrap_or_default()
}

/// 远端工具在本地的代理
pub struct McpTool {
    client: Arc<McpClient>,
    info: McpToolInfo,
}

#[async_trait]
impl Tool for McpTool {
    fn name(&self) -> &str {
        &self.info.name
    }

    fn description(&self) -> &str {
        &self.info.description
    }

    fn parameters_schema(&self) -> Value {
        self.info.input_schema.clone()
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        self.client.call_tool(&self.info.name, args).await
    }
}

/// 通过 stdio 工具供给进程拉取工具
pub struct McpToolProvider {
    config: McpServerConfig,
}

impl McpToolProvider {
    pub fn new(config: McpServerConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ToolProvider for McpToolProvider {
    async fn fetch_tools(&self) -> Result<Vec<Arc<dyn Tool>>, AgentError> {
        let client = Arc::new(McpClient::connect(&self.config).await?);
        let infos = client.list_tools().await?;
        Ok(infos
            .into_iter()
            .map(|info| {
                Arc::new(McpTool {
                    client: Arc::clone(&client),
                    info,
                }) as Arc<dyn Tool>
            })
            .collect())
    }
}
