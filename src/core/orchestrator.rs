//! 编排上下文：进程启动时构建一次，注入到每个 HTTP handler / CLI 调用
//!
//! 负责：按配置创建 LLM 与工具来源、加载智能体定义、组装 ReactAgent 与 LlmSupervisor、
//! 创建 AnalysisStore 与 RunController，并预热工具注册表。
//! 另持有一个不经 Supervisor 的单智能体（chat），用于一问一答的直接对话。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::agent::{load_agents, Agent, AgentSpec, AgentsConfig};
use crate::config::AppConfig;
use crate::core::controller::{RunController, RunLimits};
use crate::core::store::AnalysisStore;
use crate::core::supervisor::LlmSupervisor;
use crate::core::AgentError;
use crate::llm::{LlmClient, OpenAiClient};
use crate::memory::{Message, Role};
use crate::react::ReactAgent;
use crate::tools::{McpServerConfig, McpToolProvider, StaticToolProvider, ToolExecutor, ToolProvider, ToolRegistry};

fn required<'a>(v: &'a Option<String>, name: &str) -> Result<&'a str, AgentError> {
    v.as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AgentError::ConfigError(format!("{} is not set", name)))
}

/// 根据配置选择 LLM 后端（Azure OpenAI / OpenAI 兼容）；凭据缺失是启动错误，不回退到 Mock
pub(crate) fn create_llm_from_config(cfg: &AppConfig) -> Result<Arc<dyn LlmClient>, AgentError> {
    let timeout = cfg.llm.timeouts.request;
    match cfg.llm.provider.to_lowercase().as_str() {
        "azure" => {
            let azure = &cfg.llm.azure;
            let endpoint = required(&azure.endpoint, "AZURE_OPENAI_ENDPOINT")?;
            let deployment = required(&azure.deployment, "AZURE_OPENAI_DEPLOYMENT_NAME")?;
            let key = required(&azure.api_key, "AZURE_OPENAI_API_KEY")?;
            tracing::info!(deployment, api_version = %azure.api_version, "Using Azure OpenAI LLM");
            Ok(Arc::new(OpenAiClient::azure(
                endpoint,
                deployment,
                &azure.api_version,
                key,
                timeout,
            )))
        }
        "openai" => {
            let key = required(&cfg.llm.api_key, "OPENAI_API_KEY")?;
            tracing::info!(model = %cfg.llm.model, "Using OpenAI LLM");
            Ok(Arc::new(OpenAiClient::new(
                cfg.llm.base_url.as_deref(),
                &cfg.llm.model,
                key,
                timeout,
            )))
        }
        other => Err(AgentError::ConfigError(format!("unknown llm provider '{}'", other))),
    }
}

/// 工具来源：mcp 启动外部工具供给进程；none 不提供工具
pub(crate) fn create_tool_provider(cfg: &AppConfig) -> Result<Arc<dyn ToolProvider>, AgentError> {
    match cfg.tools.provider.to_lowercase().as_str() {
        "mcp" => {
            let mcp = &cfg.tools.mcp;
            let token = required(&mcp.api_token, "BRIGHT_DATA_API_TOKEN")?;
            let env = HashMap::from([
                ("API_TOKEN".to_string(), token.to_string()),
                ("WEB_UNLOCKER_ZONE".to_string(), mcp.web_unlocker_zone.clone()),
                ("BROWSER_ZONE".to_string(), mcp.browser_zone.clone()),
            ]);
            Ok(Arc::new(McpToolProvider::new(McpServerConfig {
                name: "bright_data".to_string(),
                command: mcp.command.clone(),
                args: mcp.args.clone(),
                env,
                request_timeout: Duration::from_secs(cfg.tools.tool_timeout_secs),
            })))
        }
        "none" => Ok(Arc::new(StaticToolProvider::new())),
        other => Err(AgentError::ConfigError(format!("unknown tools provider '{}'", other))),
    }
}

const CHAT_AGENT_NAME: &str = "chat_agent";

const CHAT_INSTRUCTIONS: &str = "You are a web search agent with access to Bright Data tools \
to fetch real-time market and web information. Answer the user's question directly.";

/// 显式构造的编排上下文，替代进程级全局单例
pub struct OrchestrationContext {
    config: AppConfig,
    agents: AgentsConfig,
    llm: Arc<dyn LlmClient>,
    registry: Arc<ToolRegistry>,
    controller: RunController,
    chat_agent: ReactAgent,
}

impl OrchestrationContext {
    /// 从配置构建：校验 -> LLM -> 工具来源 -> 智能体定义 -> 组装 -> 预热工具
    pub async fn from_config(config: AppConfig) -> Result<Self, AgentError> {
        config.validate()?;
        let llm = create_llm_from_config(&config)?;
        let provider = create_tool_provider(&config)?;
        let agents = load_agents(config.app.agents_file.as_deref())?;
        let ctx = Self::from_parts(config, llm, provider, agents);
        ctx.warm_up().await;
        Ok(ctx)
    }

    /// 由已构造的组件组装（测试中注入脚本化 LLM 与静态工具）
    pub fn from_parts(
        config: AppConfig,
        llm: Arc<dyn LlmClient>,
        provider: Arc<dyn ToolProvider>,
        agents: AgentsConfig,
    ) -> Self {
        let registry = Arc::new(
            ToolRegistry::new(provider)
                .with_fetch_timeout(Duration::from_secs(config.tools.tool_timeout_secs)),
        );
        let executor = ToolExecutor::new(Arc::clone(&registry), config.tools.tool_timeout_secs);

        let members: Vec<Arc<dyn Agent>> = agents
            .agents
            .iter()
            .map(|spec| {
                Arc::new(ReactAgent::new(
                    spec.clone(),
                    Arc::clone(&llm),
                    executor.clone(),
                    config.app.tool_call_budget,
                )) as Arc<dyn Agent>
            })
            .collect();
        let roster = members
            .iter()
            .map(|a| (a.name().to_string(), a.description().to_string()))
            .collect();
        let supervisor = Arc::new(LlmSupervisor::new(
            Arc::clone(&llm),
            agents.supervisor.prompt.clone(),
            roster,
        ));
        let chat_agent = ReactAgent::new(
            AgentSpec {
                name: CHAT_AGENT_NAME.to_string(),
                description: "Direct question answering with web tools".to_string(),
                instructions: CHAT_INSTRUCTIONS.to_string(),
                tools: None,
            },
            Arc::clone(&llm),
            executor,
            config.app.tool_call_budget,
        );

        let limits = RunLimits {
            turn_budget: config.app.turn_budget,
            max_calls_per_agent: config.app.max_calls_per_agent,
        };
        let controller = RunController::new(supervisor, members, AnalysisStore::new(), limits);
        tracing::info!(agents = ?controller.agent_names(), turn_budget = limits.turn_budget, "orchestration context ready");

        Self {
            config,
            agents,
            llm,
            registry,
            controller,
            chat_agent,
        }
    }

    /// 预先拉取工具；失败只记录警告，首次使用时重试
    pub async fn warm_up(&self) {
        match self.registry.tool_names().await {
            Ok(names) => tracing::info!(tools = ?names, "tools ready"),
            Err(e) => tracing::warn!(error = %e, "tool fetch failed, will retry on first use"),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn controller(&self) -> &RunController {
        &self.controller
    }

    pub fn agents(&self) -> &AgentsConfig {
        &self.agents
    }

    /// Supervisor 在构造时即就绪；有下属智能体才视为可用
    pub fn supervisor_initialized(&self) -> bool {
        !self.controller.agent_names().is_empty()
    }

    pub fn tools_initialized(&self) -> bool {
        self.registry.is_initialized()
    }

    /// 工具供给方提供的工具名（按名排序）；必要时触发拉取
    pub async fn tool_names(&self) -> Result<Vec<String>, AgentError> {
        self.registry.tool_names().await
    }

    /// 进程启动以来的累计 token：(prompt, completion, total)
    pub fn token_usage(&self) -> (u64, u64, u64) {
        self.llm.token_usage()
    }

    /// 单智能体直接对话：不创建 Run，不经 Supervisor，返回智能体的最终回复
    pub async fn chat(&self, message: &str) -> Result<String, AgentError> {
        let message = message.trim();
        if message.is_empty() {
            return Err(AgentError::InvalidRequest("message must not be empty".to_string()));
        }
        let produced = self.chat_agent.respond(&[Message::user(message)]).await?;
        Ok(produced
            .iter()
            .rev()
            .find(|m| m.role == Role::Agent && !m.is_routing() && m.tool_calls.is_empty())
            .map(|m| m.content.clone())
            .unwrap_or_default())
    }
}
