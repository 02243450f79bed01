//! 工具注册表
//!
//! 所有工具实现 Tool trait（name / description / execute）。工具列表由 ToolProvider 提供，
//! ToolRegistry 首次使用时拉取一次并缓存到进程结束；之后只读，多个智能体可并发 invoke 而无需协调。
//! 拉取受 fetch_timeout 约束，超时记为 ToolTimeout（工具级错误），等待中的调用方不会被挂起的供给进程卡住。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::OnceCell;

use crate::core::AgentError;

/// 工具 trait：名称、描述（供 LLM 理解）、参数 schema、异步执行（args 为 JSON）
#[async_trait]
pub trait Tool: Send + Sync {
    /// 工具名称（用于 JSON 中的 "tool" 字段）
    fn name(&self) -> &str;

    /// 工具描述（供 LLM 理解功能）
    fn description(&self) -> &str;

    /// 参数 JSON Schema（供 LLM 生成正确的参数格式）
    /// 默认返回空对象，表示无参数或参数格式不限
    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    /// 执行工具
    async fn execute(&self, args: Value) -> Result<String, String>;
}

/// 工具来源（外部工具供给进程、进程内静态列表等）
#[async_trait]
pub trait ToolProvider: Send + Sync {
    async fn fetch_tools(&self) -> Result<Vec<Arc<dyn Tool>>, AgentError>;
}

/// 进程内静态工具列表
#[derive(Default)]
pub struct StaticToolProvider {
    tools: Vec<Arc<dyn Tool>>,
}

impl StaticToolProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, tool: impl Tool + 'static) -> Self {
        self.tools.push(Arc::new(tool));
        self
    }
}

#[async_trait]
impl ToolProvider for StaticToolProvider {
    async fn fetch_tools(&self) -> Result<Vec<Arc<dyn Tool>>, AgentError> {
        Ok(self.tools.clone())
    }
}

/// 默认拉取超时（秒）
const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 60;

/// 工具注册表：惰性拉取、进程级缓存；拉取失败或超时不缓存，下次调用重试
pub struct ToolRegistry {
    provider: Arc<dyn ToolProvider>,
    tools: OnceCell<HashMap<String, Arc<dyn Tool>>>,
    fetch_timeout: Duration,
}

impl ToolRegistry {
    pub fn new(provider: Arc<dyn ToolProvider>) -> Self {
        Self {
            provider,
            tools: OnceCell::new(),
            fetch_timeout: Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECS),
        }
    }

    pub fn with_fetch_timeout(mut self, fetch_timeout: Duration) -> Self {
        self.fetch_timeout = fetch_timeout;
        self
    }

    /// 首次成功拉取后幂等
    pub async fn fetch(&self) -> Result<&HashMap<String, Arc<dyn Tool>>, AgentError> {
        self.tools
            .get_or_try_init(|| async {
                let tools = tokio::time::timeout(self.fetch_timeout, self.provider.fetch_tools())
                    .await
                    .map_err(|_| {
                        tracing::warn!(timeout_ms = self.fetch_timeout.as_millis() as u64, "tool provider fetch timed out");
                        AgentError::ToolTimeout("tool provider fetch".to_string())
                    })??;
                tracing::info!(count = tools.len(), "tool registry fetched");
                Ok::<_, AgentError>(
                    tools
                        .into_iter()
                        .map(|t| (t.name().to_string(), t))
                        .collect::<HashMap<_, _>>(),
                )
            })
            .await
    }

    pub fn is_initialized(&self) -> bool {
        self.tools.initialized()
    }

    pub async fn get(&self, name: &str) -> Result<Arc<dyn Tool>, AgentError> {
        self.fetch()
            .await?
            .get(name)
            .cloned()
            .ok_or_else(|| AgentError::ToolNotFound(name.to_string()))
    }

    pub async fn invoke(&self, name: &str, args: Value) -> Result<String, AgentError> {
        let tool = self.get(name).await?;
        tool.execute(args).await.map_err(AgentError::ToolExecutionFailed)
    }

    pub async fn tool_names(&self) -> Result<Vec<String>, AgentError> {
        let mut names: Vec<String> = self.fetch().await?.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    /// 返回 (name, description, parameters) 列表，用于生成 prompt 中的 Available tools 段落
    pub async fn tool_descriptions(
        &self,
        allowed: Option<&[String]>,
    ) -> Result<Vec<(String, String, Value)>, AgentError> {
        let tools = self.fetch().await?;
        let mut out: Vec<(String, String, Value)> = tools
            .iter()
            .filter(|(name, _)| allowed.map_or(true, |a| a.iter().any(|n| n == *name)))
            .map(|(name, tool)| {
                (
                    name.clone(),
                    tool.description().to_string(),
                    tool.parameters_schema(),
                )
            })
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::EchoTool;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingProvider {
        fetches: AtomicUsize,
        fail_first: bool,
    }

    #[async_trait]
    impl ToolProvider for CountingProvider {
        async fn fetch_tools(&self) -> Result<Vec<Arc<dyn Tool>>, AgentError> {
            let n = self.fetches.fetch_add(1, Ordering::SeqCst);
            if self.fail_first && n == 0 {
                return Err(AgentError::ToolExecutionFailed("provider down".into()));
            }
            Ok(vec![Arc::new(EchoTool) as Arc<dyn Tool>])
        }
    }

    #[tokio::test]
    async fn test_fetch_is_cached() {
        let provider = Arc::new(CountingProvider {
            fetches: AtomicUsize::new(0),
            fail_first: false,
        });
        let registry = ToolRegistry::new(provider.clone());
        assert!(!registry.is_initialized());

        registry.fetch().await.unwrap();
        registry.fetch().await.unwrap();
        registry.invoke("echo", serde_json::json!({"text": "hi"})).await.unwrap();

        assert!(registry.is_initialized());
        assert_eq!(provider.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_fetch_is_retried() {
        let provider = Arc::new(CountingProvider {
            fetches: AtomicUsize::new(0),
            fail_first: true,
        });
        let registry = ToolRegistry::new(provider.clone());
        assert!(registry.fetch().await.is_err());
        assert!(!registry.is_initialized());
        assert_eq!(registry.tool_names().await.unwrap(), vec!["echo".to_string()]);
        assert_eq!(provider.fetches.load(Ordering::SeqCst), 2);
    }

    struct HungProvider;

    #[async_trait]
    impl ToolProvider for HungProvider {
        async fn fetch_tools(&self) -> Result<Vec<Arc<dyn Tool>>, AgentError> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_hung_provider_times_out() {
        let registry = ToolRegistry::new(Arc::new(HungProvider)).with_fetch_timeout(Duration::from_millis(30));
        let err = tokio::time::timeout(Duration::from_secs(2), registry.fetch())
            .await
            .expect("fetch must not hang")
            .err()
            .unwrap();
        assert_eq!(err.kind(), "tool_timeout");
        assert!(err.is_tool_level());
        assert!(!registry.is_initialized());
    }

    #[tokio::test]
    async fn test_invoke_unknown_tool() {
        let registry = ToolRegistry::new(Arc::new(StaticToolProvider::new().with(EchoTool)));
        let err = registry.invoke("cat", serde_json::json!({})).await.unwrap_err();
        assert_eq!(err, AgentError::ToolNotFound("cat".to_string()));
    }

    #[tokio::test]
    async fn test_descriptions_respect_allow_list() {
        let registry = ToolRegistry::new(Arc::new(StaticToolProvider::new().with(EchoTool)));
        let none: Vec<String> = vec![];
        assert!(registry.tool_descriptions(Some(&none)).await.unwrap().is_empty());
        assert_eq!(registry.tool_descriptions(None).await.unwrap().len(), 1);
    }
}
