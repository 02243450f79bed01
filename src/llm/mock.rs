//! 脚本化 LLM 客户端（用于测试，无需 API）
//!
//! ScriptedLlmClient 按顺序返回预设回复，并记录每次收到的 prompt，便于断言

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{LlmClient, LlmError};
use crate::memory::Message;

/// 脚本化客户端：每次 complete 弹出一条预设结果；Err 项模拟上游失败，脚本耗尽同样视为失败
#[derive(Debug, Default)]
pub struct ScriptedLlmClient {
    script: Mutex<VecDeque<Result<String, String>>>,
    prompts: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedLlmClient {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_results(replies.into_iter().map(|s| Ok(s.into())))
    }

    pub fn with_results(results: impl IntoIterator<Item = Result<String, String>>) -> Self {
        Self {
            script: Mutex::new(results.into_iter().collect()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// 已发生的调用次数
    pub fn calls(&self) -> usize {
        self.prompts.lock().map(|p| p.len()).unwrap_or(0)
    }

    /// 第 n 次调用收到的完整 prompt
    pub fn prompt(&self, n: usize) -> Option<Vec<Message>> {
        self.prompts.lock().ok().and_then(|p| p.get(n).cloned())
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(messages.to_vec());
        }
        let next = self
            .script
            .lock()
            .map_err(|e| LlmError::Request(e.to_string()))?
            .pop_front();
        match next {
            Some(Ok(reply)) => Ok(reply),
            Some(Err(e)) => Err(LlmError::Request(e)),
            None => Err(LlmError::Request("script exhausted".to_string())),
        }
    }
}
