//! Planner：调用 LLM 并解析 Tool Call
//!
//! 调用 LLM 得到回复或 JSON Tool Call；parse_llm_output 从文本中提取 JSON 并解析为 ToolCall 或直接回复。

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::AgentError;
use crate::llm::LlmClient;
use crate::memory::{Message, ToolCallRecord};

/// LLM 返回的 Tool Call（简化 JSON：{"tool": "search_engine", "args": {"query": "..."}}）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

impl From<ToolCall> for ToolCallRecord {
    fn from(c: ToolCall) -> Self {
        ToolCallRecord {
            tool: c.tool,
            args: c.args,
        }
    }
}

/// Planner 输出
#[derive(Debug, Clone)]
pub enum PlannerOutput {
    /// 最终回复（本轮结束）
    Response(String),
    /// 需要执行工具
    ToolCall(ToolCall),
}

/// 从文本中取出 JSON 片段（```json ... ``` 或首个 `{` 到最后一个 `}`）
pub(crate) fn extract_json(text: &str) -> Option<&str> {
    if let Some(start) = text.find("```json") {
        let rest = &text[start + 7..];
        return Some(rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim()));
    }
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// 解析 LLM 输出：含合法 `{"tool": ..}` 且 tool 非空则为 ToolCall，否则整段作为 Response。
/// 报告正文常含花括号，JSON 不合法时按普通回复处理而非报错。
pub fn parse_llm_output(output: &str) -> PlannerOutput {
    let trimmed = output.trim();
    match extract_json(trimmed).and_then(|s| serde_json::from_str::<ToolCall>(s).ok()) {
        Some(call) if !call.tool.trim().is_empty() => PlannerOutput::ToolCall(call),
        _ => PlannerOutput::Response(trimmed.to_string()),
    }
}

/// Planner：持有 LLM，plan_with_system 拼 system + messages 后调用 LLM
pub struct Planner {
    llm: Arc<dyn LlmClient>,
}

impl Planner {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    /// LLM 失败统一映射为 UpstreamUnavailable（对当前 Run 致命）
    pub async fn plan_with_system(
        &self,
        messages: &[Message],
        system: &str,
    ) -> Result<String, AgentError> {
        let mut full_messages = vec![Message::system(system.to_string())];
        full_messages.extend(messages.iter().cloned());
        self.llm
            .complete(&full_messages)
            .await
            .map_err(|e| AgentError::UpstreamUnavailable(e.to_string()))
    }
}
