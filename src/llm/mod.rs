//! LLM 层：客户端抽象与实现（Azure OpenAI / OpenAI 兼容 / 测试用脚本客户端）

pub mod mock;
pub mod openai;
pub mod traits;

pub use mock::ScriptedLlmClient;
pub use openai::{OpenAiClient, TokenUsage};
pub use traits::{LlmClient, LlmError};
