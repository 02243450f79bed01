//! 智能体定义
//!
//! Agent trait：无状态的具名能力，给定对话快照产出新消息，不修改对话本身（追加由 RunController 负责）。
//! AgentSpec 从 config/agents.toml 加载（[supervisor] 策略 + [[agents]] 列表）；文件不存在时使用内置的四个股票分析智能体。

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;

use crate::core::AgentError;
use crate::memory::Message;

/// Supervisor 在对话中的保留名
pub const SUPERVISOR_NAME: &str = "supervisor";

/// 智能体 trait
#[async_trait]
pub trait Agent: Send + Sync {
    /// 本次 Run 内唯一的名字
    fn name(&self) -> &str;

    /// 供 Supervisor 路由参考的职责描述
    fn description(&self) -> &str {
        ""
    }

    /// 读取完整对话快照，返回本轮新产生的消息（可能含 tool 消息）
    async fn respond(&self, conversation: &[Message]) -> Result<Vec<Message>, AgentError>;
}

/// agents.toml 中单个智能体
#[derive(Debug, Clone, Deserialize)]
pub struct AgentSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// 固定的 system prompt
    pub instructions: String,
    /// 可用工具名列表；缺省则可用全部工具
    #[serde(default)]
    pub tools: Option<Vec<String>>,
}

/// [supervisor] 段
#[derive(Debug, Clone, Deserialize)]
pub struct SupervisorSpec {
    #[serde(default = "default_supervisor_prompt")]
    pub prompt: String,
}

impl Default for SupervisorSpec {
    fn default() -> Self {
        Self {
            prompt: default_supervisor_prompt(),
        }
    }
}

/// agents.toml 根
#[derive(Debug, Clone, Deserialize)]
pub struct AgentsConfig {
    #[serde(default)]
    pub supervisor: SupervisorSpec,
    pub agents: Vec<AgentSpec>,
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            supervisor: SupervisorSpec::default(),
            agents: default_agents(),
        }
    }
}

impl AgentsConfig {
    /// 名字非空、唯一，且不占用 supervisor 保留名
    pub fn validate(&self) -> Result<(), AgentError> {
        if self.agents.is_empty() {
            return Err(AgentError::ConfigError("no agents defined".to_string()));
        }
        let mut seen = HashSet::new();
        for a in &self.agents {
            let name = a.name.trim();
            if name.is_empty() {
                return Err(AgentError::ConfigError("agent name cannot be empty".to_string()));
            }
            if name == SUPERVISOR_NAME {
                return Err(AgentError::ConfigError(format!(
                    "agent name '{}' is reserved",
                    SUPERVISOR_NAME
                )));
            }
            if !seen.insert(name.to_string()) {
                return Err(AgentError::ConfigError(format!("duplicate agent name '{}'", name)));
            }
        }
        Ok(())
    }

    pub fn names(&self) -> Vec<String> {
        self.agents.iter().map(|a| a.name.clone()).collect()
    }
}

/// 加载智能体定义：显式路径 > config/agents.toml > ../config/agents.toml > 内置默认
pub fn load_agents(path: Option<&Path>) -> Result<AgentsConfig, AgentError> {
    let candidates: Vec<PathBuf> = match path {
        Some(p) => vec![p.to_path_buf()],
        None => vec![
            PathBuf::from("config/agents.toml"),
            PathBuf::from("../config/agents.toml"),
        ],
    };

    let Some(found) = candidates.into_iter().find(|p| p.exists()) else {
        if let Some(p) = path {
            return Err(AgentError::ConfigError(format!(
                "agents file not found: {}",
                p.display()
            )));
        }
        let cfg = AgentsConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    };

    let text = std::fs::read_to_string(&found)
        .map_err(|e| AgentError::ConfigError(format!("{}: {}", found.display(), e)))?;
    let cfg: AgentsConfig = toml::from_str(&text)
        .map_err(|e| AgentError::ConfigError(format!("{}: {}", found.display(), e)))?;
    cfg.validate()?;
    tracing::info!(path = %found.display(), agents = cfg.agents.len(), "agents loaded");
    Ok(cfg)
}

fn default_supervisor_prompt() -> String {
    "You are a supervisor managing four agents:\n\
     - a stock_finder_agent. Assign research-related tasks to this agent and pick 2 promising NSE stocks\n\
     - a market_data_agent. Assign tasks to fetch current market data (price, volume, trends)\n\
     - a news_analyst_agent. Assign task to search and summarize recent news\n\
     - a price_recommender_agent. Assign task to give buy/sell decision with target price.\n\
     Assign work to one agent at a time, do not call agents in parallel.\n\
     Do not do any work yourself.\n\
     Make sure you complete till end and do not ask for proceed in between the task."
        .to_string()
}

fn spec(name: &str, description: &str, instructions: &str) -> AgentSpec {
    AgentSpec {
        name: name.to_string(),
        description: description.to_string(),
        instructions: instructions.to_string(),
        tools: None,
    }
}

/// 内置的 NSE 短线分析流水线
pub fn default_agents() -> Vec<AgentSpec> {
    vec![
        spec(
            "stock_finder_agent",
            "Picks 2 promising, actively traded NSE stocks",
            "You are a stock research analyst specializing in the Indian Stock Market (NSE). \
             Your task is to select 2 promising, actively traded NSE-listed stocks for short term trading (buy/sell) \
             based on recent performance, news buzz, volume or technical strength.\n\
             Avoid penny stocks and illiquid companies.\n\
             Output should include stock names, tickers, and brief reasoning for each choice.\n\
             Respond in structured plain text format.",
        ),
        spec(
            "market_data_agent",
            "Fetches current market data (price, volume, trends)",
            "You are a market data analyst for Indian stocks listed on NSE. Given a list of stock tickers \
             (eg RELIANCE, INFY), your task is to gather recent market information for each stock, including:\n\
             - Current price\n\
             - Previous closing price\n\
             - Today's volume\n\
             - 7-day and 30-day price trend\n\
             - Basic Technical indicators (RSI, 50/200-day moving averages)\n\
             - Any notable spikes in volume or volatility\n\n\
             Return your findings in a structured and readable format for each stock, suitable for further \
             analysis by a recommendation engine. Use INR as the currency. Be concise but complete.",
        ),
        spec(
            "news_analyst_agent",
            "Searches and summarizes recent news",
            "You are a financial news analyst. Given the names or the tickers of Indian NSE listed stocks, your job is to:\n\
             - Search for the most recent news articles (past 3-5 days)\n\
             - Summarize key updates, announcements, and events for each stock\n\
             - Classify each piece of news as positive, negative or neutral\n\
             - Highlight how the news might affect short term stock price\n\n\
             Present your response in a clear, structured format - one section per stock.\n\
             Use bullet points where necessary. Keep it short, factual and analysis-oriented.",
        ),
        spec(
            "price_recommender_agent",
            "Gives buy/sell/hold decisions with target prices",
            "You are a trading strategy advisor for the Indian Stock Market. You are given:\n\
             - Recent market data (current price, volume, trend, indicators)\n\
             - News summaries and sentiment for each stock\n\n\
             Based on this info, for each stock:\n\
             1. Recommend an action: Buy, Sell or Hold\n\
             2. Suggest a specific target price for entry or exit (INR)\n\
             3. Briefly explain the reason behind your recommendation.\n\n\
             Your goal is to provide practical, near-term trading advice for the next trading day.\n\
             Keep the response concise and clearly structured.",
        ),
    ]
}
