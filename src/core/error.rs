//! 错误类型
//!
//! 工具级错误（ToolNotFound / ToolExecutionFailed / ToolTimeout）由智能体吸收为 tool 消息，Run 继续；
//! Run 级错误（UpstreamUnavailable / UnknownAgentSelected / TurnBudgetExceeded / ToolBudgetExceeded）
//! 使 Run 进入 failed，并按 kind() 原样记录在 Run.error 中。

use thiserror::Error;

/// 编排过程中可能出现的错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AgentError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Tool execution failed: {0}")]
    ToolExecutionFailed(String),

    #[error("Tool timeout: {0}")]
    ToolTimeout(String),

    /// 单个智能体一轮内的工具调用次数用尽
    #[error("Agent {agent} exceeded its tool-call budget ({budget})")]
    ToolBudgetExceeded { agent: String, budget: usize },

    #[error("Language model unavailable: {0}")]
    UpstreamUnavailable(String),

    /// Supervisor 选中了未知或已用尽调用次数的智能体
    #[error("Supervisor selected unknown or exhausted agent: {0}")]
    UnknownAgentSelected(String),

    #[error("Turn budget exceeded after {0} delegation turns")]
    TurnBudgetExceeded(usize),

    #[error("Run not found: {0}")]
    RunNotFound(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Run cancelled")]
    Cancelled,
}

impl AgentError {
    /// 稳定的机器可读错误类别（HTTP 错误体与 Run.error.kind 使用）
    pub fn kind(&self) -> &'static str {
        match self {
            AgentError::ConfigError(_) => "configuration_error",
            AgentError::ToolNotFound(_) => "tool_not_found",
            AgentError::ToolExecutionFailed(_) => "tool_execution_error",
            AgentError::ToolTimeout(_) => "tool_timeout",
            AgentError::ToolBudgetExceeded { .. } => "tool_budget_exceeded",
            AgentError::UpstreamUnavailable(_) => "upstream_unavailable",
            AgentError::UnknownAgentSelected(_) => "unknown_agent_selected",
            AgentError::TurnBudgetExceeded(_) => "turn_budget_exceeded",
            AgentError::RunNotFound(_) => "run_not_found",
            AgentError::InvalidRequest(_) => "invalid_request",
            AgentError::Cancelled => "cancelled",
        }
    }

    /// 工具级错误：由智能体写回对话，不终止 Run
    pub fn is_tool_level(&self) -> bool {
        matches!(
            self,
            AgentError::ToolNotFound(_)
                | AgentError::ToolExecutionFailed(_)
                | AgentError::ToolTimeout(_)
        )
    }
}

impl From<config::ConfigError> for AgentError {
    fn from(e: config::ConfigError) -> Self {
        AgentError::ConfigError(e.to_string())
    }
}
