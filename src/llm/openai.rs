//! OpenAI 兼容 API 客户端
//!
//! 通过 async_openai 调用 Azure OpenAI 部署或任意 OpenAI 兼容端点（可配置 base_url）。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_openai::config::{AzureConfig, Config, OpenAIConfig};
use async_openai::error::OpenAIError;
use async_openai::types::chat::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequestArgs,
};
use async_openai::Client;
use async_trait::async_trait;

use crate::llm::{LlmClient, LlmError};
use crate::memory::{Message, Role};

/// Token 使用统计（累计值）
#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub prompt_tokens: Arc<AtomicU64>,
    pub completion_tokens: Arc<AtomicU64>,
    pub total_tokens: Arc<AtomicU64>,
}

impl TokenUsage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, prompt: u64, completion: u64) {
        self.prompt_tokens.fetch_add(prompt, Ordering::Relaxed);
        self.completion_tokens.fetch_add(completion, Ordering::Relaxed);
        self.total_tokens.fetch_add(prompt + completion, Ordering::Relaxed);
    }

    pub fn get(&self) -> (u64, u64, u64) {
        (
            self.prompt_tokens.load(Ordering::Relaxed),
            self.completion_tokens.load(Ordering::Relaxed),
            self.total_tokens.load(Ordering::Relaxed),
        )
    }
}

/// OpenAI 兼容客户端：持有 Client 与 model 名（Azure 下为 deployment 名），complete 时取首条 content
pub struct OpenAiClient<C: Config = OpenAIConfig> {
    client: Client<C>,
    model: String,
    timeout: Duration,
    /// 累计 token 使用统计
    pub usage: TokenUsage,
}

impl OpenAiClient<OpenAIConfig> {
    pub fn new(base_url: Option<&str>, model: &str, api_key: &str, timeout_secs: u64) -> Self {
        let config = match base_url {
            Some(url) => OpenAIConfig::new().with_api_base(url).with_api_key(api_key),
            None => OpenAIConfig::new().with_api_key(api_key),
        };
        Self::with_config(config, model, timeout_secs)
    }
}

impl OpenAiClient<AzureConfig> {
    /// Azure OpenAI 部署：endpoint + deployment + api_version + key
    pub fn azure(
        endpoint: &str,
        deployment: &str,
        api_version: &str,
        api_key: &str,
        timeout_secs: u64,
    ) -> Self {
        let config = AzureConfig::new()
            .with_api_base(endpoint)
            .with_deployment_id(deployment)
            .with_api_version(api_version)
            .with_api_key(api_key);
        Self::with_config(config, deployment, timeout_secs)
    }
}

impl<C: Config> OpenAiClient<C> {
    pub fn with_config(config: C, model: &str, timeout_secs: u64) -> Self {
        Self {
            client: Client::with_config(config),
            model: model.to_string(),
            timeout: Duration::from_secs(timeout_secs),
            usage: TokenUsage::new(),
        }
    }

    fn to_openai_messages(
        &self,
        messages: &[Message],
    ) -> Result<Vec<ChatCompletionRequestMessage>, OpenAIError> {
        messages
            .iter()
            .map(|m| {
                Ok(match m.role {
                    Role::System => ChatCompletionRequestMessage::System(
                        ChatCompletionRequestSystemMessageArgs::default()
                            .content(m.content.clone())
                            .build()?,
                    ),
                    Role::User | Role::Tool => ChatCompletionRequestMessage::User(
                        ChatCompletionRequestUserMessageArgs::default()
                            .content(m.content.clone())
                            .build()?,
                    ),
                    Role::Agent => ChatCompletionRequestMessage::Assistant(
                        ChatCompletionRequestAssistantMessageArgs::default()
                            .content(m.content.clone())
                            .build()?,
                    ),
                })
            })
            .collect()
    }
}

#[async_trait]
impl<C: Config + 'static> LlmClient for OpenAiClient<C> {
    fn token_usage(&self) -> (u64, u64, u64) {
        self.usage.get()
    }

    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(
                self.to_openai_messages(messages)
                    .map_err(|e| LlmError::Request(e.to_string()))?,
            )
            .build()
            .map_err(|e| LlmError::Request(e.to_string()))?;

        let response = tokio::time::timeout(self.timeout, self.client.chat().create(request))
            .await
            .map_err(|_| LlmError::Timeout(self.timeout.as_secs()))?
            .map_err(|e| LlmError::Request(e.to_string()))?;

        // 提取 token 使用统计
        if let Some(usage) = &response.usage {
            self.usage
                .add(usage.prompt_tokens as u64, usage.completion_tokens as u64);
        }

        response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .ok_or(LlmError::EmptyResponse)
    }
}
