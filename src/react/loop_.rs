//! ReAct 智能体：单个智能体一轮内的「思考 -> 工具 -> 观察」循环
//!
//! 固定 instructions + 可用工具段落 拼成 system，对话快照转换为该智能体视角的消息列表后调用 LLM；
//! 若输出为 Tool Call，则经 ToolExecutor 执行并把结果作为 tool 消息加入本轮历史，再次调用 LLM，
//! 直到得到不含工具调用的最终回复，或工具调用次数用尽（ToolBudgetExceeded）。
//! 工具级错误写成 tool 消息继续；LLM 失败（UpstreamUnavailable）直接返回给 RunController。

use std::sync::Arc;

use async_trait::async_trait;

use crate::agent::{Agent, AgentSpec, SUPERVISOR_NAME};
use crate::core::AgentError;
use crate::llm::LlmClient;
use crate::memory::{Message, Role};
use crate::react::{parse_llm_output, Planner, PlannerOutput};
use crate::tools::{tool_call_schema_json, ToolExecutor};

/// Observation 在日志中的预览长度
const OBSERVATION_PREVIEW_CHARS: usize = 200;

/// 基于 LLM + 工具的智能体
pub struct ReactAgent {
    spec: AgentSpec,
    planner: Planner,
    executor: ToolExecutor,
    tool_call_budget: usize,
}

impl ReactAgent {
    pub fn new(
        spec: AgentSpec,
        llm: Arc<dyn LlmClient>,
        executor: ToolExecutor,
        tool_call_budget: usize,
    ) -> Self {
        Self {
            spec,
            planner: Planner::new(llm),
            executor,
            tool_call_budget,
        }
    }

    fn tool_allowed(&self, tool: &str) -> bool {
        self.spec
            .tools
            .as_ref()
            .map_or(true, |allowed| allowed.iter().any(|t| t == tool))
    }

    /// instructions + Available tools + 调用格式；工具拉取失败时按无工具处理
    async fn system_prompt(&self) -> String {
        let tools = match self
            .executor
            .registry()
            .tool_descriptions(self.spec.tools.as_deref())
            .await
        {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!(agent = %self.spec.name, error = %e, "tools unavailable, prompting without tools");
                Vec::new()
            }
        };
        if tools.is_empty() {
            return format!(
                "{}\n\nYou have no tools available. Answer directly in plain text.",
                self.spec.instructions
            );
        }
        let tool_list = tools
            .iter()
            .map(|(name, desc, params)| format!("- {}: {} Parameters: {}", name, desc, params))
            .collect::<Vec<_>>()
            .join("\n");
        format!(
            "{}\n\n## Available tools\n{}\n\n\
             To call a tool, reply with ONLY one JSON object matching this schema:\n{}\n\
             When you have the final answer, reply in plain text without any tool JSON.",
            self.spec.instructions,
            tool_list,
            tool_call_schema_json()
        )
    }
}

/// 对话快照转为该智能体视角：自己的消息作 assistant，其它智能体与工具结果带来源前缀，
/// 路由记录只保留 Supervisor 的委派说明
pub fn history_view(conversation: &[Message], self_name: &str) -> Vec<Message> {
    conversation
        .iter()
        .filter_map(|m| match (m.role, m.is_routing()) {
            (Role::System, true) => None,
            (Role::Agent, true) => Some(Message::user(format!("[{}] {}", SUPERVISOR_NAME, m.content))),
            (Role::User, _) | (Role::System, false) => Some(m.clone()),
            (Role::Agent, false) if m.author == self_name => Some(m.clone()),
            (Role::Agent, false) => Some(Message::agent(
                m.author.clone(),
                format!("[{}] {}", m.author, m.content),
            )),
            (Role::Tool, _) => Some(Message::tool(
                m.author.clone(),
                format!("Observation from {}: {}", m.author, m.content),
            )),
        })
        .collect()
}

fn preview(s: &str) -> String {
    if s.chars().count() > OBSERVATION_PREVIEW_CHARS {
        format!("{}...", s.chars().take(OBSERVATION_PREVIEW_CHARS).collect::<String>())
    } else {
        s.to_string()
    }
}

#[async_trait]
impl Agent for ReactAgent {
    fn name(&self) -> &str {
        &self.spec.name
    }

    fn description(&self) -> &str {
        &self.spec.description
    }

    async fn respond(&self, conversation: &[Message]) -> Result<Vec<Message>, AgentError> {
        let name = self.spec.name.as_str();
        let system = self.system_prompt().await;
        let mut produced: Vec<Message> = Vec::new();
        let mut tool_calls = 0usize;

        loop {
            let mut view = history_view(conversation, name);
            view.extend(history_view(&produced, name));
            let output = self.planner.plan_with_system(&view, &system).await?;

            let call = match parse_llm_output(&output) {
                PlannerOutput::Response(text) => {
                    produced.push(Message::agent(name, text));
                    return Ok(produced);
                }
                PlannerOutput::ToolCall(call) => call,
            };

            if tool_calls >= self.tool_call_budget {
                return Err(AgentError::ToolBudgetExceeded {
                    agent: name.to_string(),
                    budget: self.tool_call_budget,
                });
            }
            tool_calls += 1;

            produced.push(Message::agent(name, output.trim()).with_tool_calls(vec![call.clone().into()]));

            let result = if self.tool_allowed(&call.tool) {
                self.executor.execute(&call.tool, call.args).await
            } else {
                Err(AgentError::ToolNotFound(call.tool.clone()))
            };

            match result {
                Ok(observation) => {
                    tracing::debug!(agent = %name, tool = %call.tool, observation = %preview(&observation), "tool ok");
                    produced.push(Message::tool(call.tool, observation));
                }
                Err(e) if e.is_tool_level() => {
                    tracing::warn!(agent = %name, tool = %call.tool, error = %e, "tool failed, reported to agent");
                    produced.push(Message::tool(call.tool, format!("Error: {}", e)));
                }
                Err(e) => return Err(e),
            }
        }
    }
}
