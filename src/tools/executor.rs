//! 工具执行器
//!
//! 持有共享的 ToolRegistry 与全局超时，execute(tool_name, args) 在超时内调用 registry.invoke，
//! 超时或失败时转为 AgentError（ToolTimeout / ToolExecutionFailed / ToolNotFound）；每次调用输出结构化审计日志（JSON）。

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::timeout;

use crate::core::AgentError;
use crate::tools::ToolRegistry;

/// 工具执行器：对每次调用施加超时，并将结果映射为 AgentError
#[derive(Clone)]
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    timeout: Duration,
}

impl ToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>, timeout_secs: u64) -> Self {
        Self::with_timeout(registry, Duration::from_secs(timeout_secs))
    }

    pub fn with_timeout(registry: Arc<ToolRegistry>, timeout: Duration) -> Self {
        Self { registry, timeout }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// 执行指定工具；输出 JSON 审计日志
    pub async fn execute(&self, tool_name: &str, args: serde_json::Value) -> Result<String, AgentError> {
        let start = Instant::now();
        let args_preview = args_preview(&args);
        let result = timeout(self.timeout, self.registry.invoke(tool_name, args)).await;

        let (ok, outcome): (bool, &str) = match &result {
            Ok(Ok(_)) => (true, "ok"),
            Ok(Err(_)) => (false, "error"),
            Err(_) => (false, "timeout"),
        };
        let duration_ms = start.elapsed().as_millis() as u64;
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": tool_name,
            "ok": ok,
            "outcome": outcome,
            "duration_ms": duration_ms,
            "args_preview": args_preview,
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        match result {
            Ok(r) => r,
            Err(_) => Err(AgentError::ToolTimeout(tool_name.to_string())),
        }
    }
}

fn args_preview(args: &serde_json::Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{StaticToolProvider, Tool};
    use async_trait::async_trait;
    use serde_json::Value;

    struct SlowTool;

    #[async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }

        fn description(&self) -> &str {
            "sleeps"
        }

        async fn execute(&self, _args: Value) -> Result<String, String> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("late".into())
        }
    }

    #[tokio::test]
    async fn test_timeout_maps_to_tool_timeout() {
        let registry = ToolRegistry::new(Arc::new(StaticToolProvider::new().with(SlowTool)));
        let executor = ToolExecutor::with_timeout(Arc::new(registry), Duration::from_millis(50));
        let err = executor.execute("slow", serde_json::json!({})).await.unwrap_err();
        assert_eq!(err, AgentError::ToolTimeout("slow".to_string()));
    }

    #[test]
    fn test_args_preview_truncates() {
        let long = serde_json::json!({ "q": "x".repeat(500) });
        let preview = args_preview(&long);
        assert!(preview.ends_with("..."));
        assert_eq!(preview.chars().count(), 203);
    }
}
