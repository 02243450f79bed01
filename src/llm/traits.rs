//! LLM 客户端抽象
//!
//! 所有后端（Azure OpenAI / OpenAI 兼容 / 脚本化）实现 LlmClient：接受消息列表，返回一条文本回复。
//! 对编排核心而言，模型是不透明的外部协作者。

use async_trait::async_trait;
use thiserror::Error;

use crate::memory::Message;

/// LLM 调用失败原因；编排层统一映射为 UpstreamUnavailable
#[derive(Error, Debug, Clone)]
pub enum LlmError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("request timed out after {0}s")]
    Timeout(u64),

    #[error("empty response from model")]
    EmptyResponse,
}

/// LLM 客户端 trait
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 非流式完成
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError>;

    /// 获取累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    /// 默认返回 (0, 0, 0)，具体实现可覆盖
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}
