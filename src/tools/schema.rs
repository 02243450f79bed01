//! 工具调用 JSON Schema 生成（schemars 自动生成）
//!
//! 用于将「合法 tool call」的 JSON 结构注入智能体 system prompt，减少 LLM 输出格式错误。

use schemars::{schema_for, JsonSchema};
use std::collections::HashMap;

/// 工具调用请求格式：与 parse_llm_output 解析的 `{"tool": "...", "args": {...}}` 一致（仅用于 Schema 生成）
#[allow(dead_code)]
#[derive(JsonSchema)]
struct ToolCallFormat {
    /// 工具名，必须是 Available tools 中列出的名字
    pub tool: String,
    /// 工具参数，依工具的 parameters schema 而定
    pub args: HashMap<String, serde_json::Value>,
}

/// 返回工具调用的 JSON Schema 字符串，可拼入 system prompt
pub fn tool_call_schema_json() -> String {
    let schema = schema_for!(ToolCallFormat);
    serde_json::to_string_pretty(&schema).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_names_both_fields() {
        let schema = tool_call_schema_json();
        assert!(schema.contains("\"tool\""));
        assert!(schema.contains("\"args\""));
    }
}
