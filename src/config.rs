//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `TRADEDESK__*` 覆盖（双下划线表示嵌套，如 `TRADEDESK__LLM__PROVIDER=openai`），
//! 最后叠加部署环境中约定俗成的变量名（AZURE_OPENAI_*、OPENAI_API_KEY、BRIGHT_DATA_API_TOKEN 等）。

use std::path::PathBuf;

use serde::Deserialize;

use crate::core::AgentError;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub tools: ToolsSection,
    pub web: WebSection,
}

/// [app] 段：轮数与调用上限、默认查询、智能体定义文件
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: Option<String>,
    /// 单次 Run 的最大委派轮数
    pub turn_budget: usize,
    /// 单个智能体一轮内最多工具调用次数
    pub tool_call_budget: usize,
    /// 单个智能体在一次 Run 中最多被委派几次
    pub max_calls_per_agent: Option<usize>,
    /// 请求未给出 query 时使用
    pub default_query: String,
    /// 智能体定义文件；未设置时查找 config/agents.toml
    pub agents_file: Option<PathBuf>,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: None,
            turn_budget: 10,
            tool_call_budget: 6,
            max_calls_per_agent: Some(3),
            default_query: DEFAULT_QUERY.to_string(),
            agents_file: None,
        }
    }
}

pub const DEFAULT_QUERY: &str = "Analyze promising NSE stocks for short-term trading";

/// [llm] 段：后端选择与超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// 后端：azure / openai
    pub provider: String,
    pub model: String,
    /// OpenAI 兼容端点（provider = openai 时可选）
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub azure: LlmAzureSection,
    pub timeouts: LlmTimeoutsSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "azure".to_string(),
            model: "gpt-4o".to_string(),
            base_url: None,
            api_key: None,
            azure: LlmAzureSection::default(),
            timeouts: LlmTimeoutsSection::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmAzureSection {
    pub api_key: Option<String>,
    pub endpoint: Option<String>,
    pub deployment: Option<String>,
    pub api_version: String,
}

impl Default for LlmAzureSection {
    fn default() -> Self {
        Self {
            api_key: None,
            endpoint: None,
            deployment: None,
            api_version: "2024-05-01-preview".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmTimeoutsSection {
    pub request: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self { request: 120 }
    }
}

/// [tools] 段：工具来源与单次调用超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    /// mcp：外部工具供给进程；none：不提供工具
    pub provider: String,
    pub tool_timeout_secs: u64,
    pub mcp: McpSection,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            provider: "mcp".to_string(),
            tool_timeout_secs: 60,
            mcp: McpSection::default(),
        }
    }
}

/// [tools.mcp] 段：工具供给进程命令与其凭据
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct McpSection {
    pub command: String,
    pub args: Vec<String>,
    pub api_token: Option<String>,
    pub web_unlocker_zone: String,
    pub browser_zone: String,
}

impl Default for McpSection {
    fn default() -> Self {
        Self {
            command: "npx".to_string(),
            args: vec!["@brightdata/mcp".to_string()],
            api_token: None,
            web_unlocker_zone: "unblocker".to_string(),
            browser_zone: "scraping_browser".to_string(),
        }
    }
}

/// [web] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WebSection {
    pub host: String,
    pub port: u16,
}

impl Default for WebSection {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

fn is_blank(v: &Option<String>) -> bool {
    v.as_deref().map_or(true, |s| s.trim().is_empty())
}

impl AppConfig {
    /// 启动前校验：所选 LLM 后端与工具供给的凭据齐全、上限非零
    pub fn validate(&self) -> Result<(), AgentError> {
        let err = |m: &str| Err(AgentError::ConfigError(m.to_string()));

        match self.llm.provider.to_lowercase().as_str() {
            "azure" => {
                if is_blank(&self.llm.azure.api_key) {
                    return err("AZURE_OPENAI_API_KEY is not set");
                }
                if is_blank(&self.llm.azure.endpoint) {
                    return err("AZURE_OPENAI_ENDPOINT is not set");
                }
                if is_blank(&self.llm.azure.deployment) {
                    return err("AZURE_OPENAI_DEPLOYMENT_NAME is not set");
                }
            }
            "openai" => {
                if is_blank(&self.llm.api_key) {
                    return err("OPENAI_API_KEY is not set");
                }
            }
            other => {
                return Err(AgentError::ConfigError(format!(
                    "unknown llm provider '{}' (expected azure or openai)",
                    other
                )))
            }
        }

        match self.tools.provider.to_lowercase().as_str() {
            "mcp" => {
                if is_blank(&self.tools.mcp.api_token) {
                    return err("BRIGHT_DATA_API_TOKEN is not set");
                }
                if self.tools.mcp.command.trim().is_empty() {
                    return err("tools.mcp.command is empty");
                }
            }
            "none" => {}
            other => {
                return Err(AgentError::ConfigError(format!(
                    "unknown tools provider '{}' (expected mcp or none)",
                    other
                )))
            }
        }

        if self.app.turn_budget == 0 {
            return err("app.turn_budget must be at least 1");
        }
        if self.app.tool_call_budget == 0 {
            return err("app.tool_call_budget must be at least 1");
        }
        if self.app.max_calls_per_agent == Some(0) {
            return err("app.max_calls_per_agent must be at least 1");
        }
        if self.tools.tool_timeout_secs == 0 || self.llm.timeouts.request == 0 {
            return err("timeouts must be at least 1 second");
        }
        Ok(())
    }
}

/// 约定俗成的环境变量 -> 配置键
const PLAIN_ENV_OVERRIDES: &[(&str, &str)] = &[
    ("AZURE_OPENAI_API_KEY", "llm.azure.api_key"),
    ("AZURE_OPENAI_ENDPOINT", "llm.azure.endpoint"),
    ("AZURE_OPENAI_DEPLOYMENT_NAME", "llm.azure.deployment"),
    ("AZURE_OPENAI_API_VERSION", "llm.azure.api_version"),
    ("OPENAI_API_KEY", "llm.api_key"),
    ("BRIGHT_DATA_API_TOKEN", "tools.mcp.api_token"),
    ("WEB_UNLOCKER_ZONE", "tools.mcp.web_unlocker_zone"),
    ("BROWSER_ZONE", "tools.mcp.browser_zone"),
    ("TRADEDESK_WEB_PORT", "web.port"),
];

/// 从 config 目录加载配置，环境变量可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 叠加环境变量 TRADEDESK__*（双下划线表示嵌套键）
/// 4. 最后叠加 AZURE_OPENAI_* 等约定变量
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    load_config_with(config_path, |key| std::env::var(key).ok())
}

/// 同 load_config，约定变量经 lookup 读取（测试中注入）
pub fn load_config_with<F>(config_path: Option<PathBuf>, lookup: F) -> Result<AppConfig, config::ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("TRADEDESK")
            .separator("__")
            .try_parsing(true),
    );

    for (var, key) in PLAIN_ENV_OVERRIDES {
        let value = lookup(var).filter(|v| !v.trim().is_empty());
        builder = builder.set_override_option(*key, value)?;
    }

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn valid() -> AppConfig {
        let mut cfg = AppConfig::default();
        cfg.llm.azure.api_key = Some("k".into());
        cfg.llm.azure.endpoint = Some("https://example.openai.azure.com".into());
        cfg.llm.azure.deployment = Some("gpt-4o".into());
        cfg.tools.mcp.api_token = Some("t".into());
        cfg
    }

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.app.turn_budget, 10);
        assert_eq!(cfg.app.max_calls_per_agent, Some(3));
        assert_eq!(cfg.app.default_query, DEFAULT_QUERY);
        assert_eq!(cfg.llm.azure.api_version, "2024-05-01-preview");
        assert_eq!(cfg.tools.mcp.web_unlocker_zone, "unblocker");
        assert_eq!(cfg.tools.mcp.browser_zone, "scraping_browser");
        assert_eq!(cfg.web.port, 8000);
    }

    #[test]
    fn test_missing_credentials_fail_validation() {
        let err = AppConfig::default().validate().unwrap_err();
        assert_eq!(err.kind(), "configuration_error");
        assert!(err.to_string().contains("AZURE_OPENAI_API_KEY"));

        let mut cfg = valid();
        cfg.tools.mcp.api_token = None;
        assert!(cfg.validate().unwrap_err().to_string().contains("BRIGHT_DATA_API_TOKEN"));

        cfg.tools.provider = "none".into();
        cfg.validate().unwrap();

        cfg.app.turn_budget = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_openai_provider_needs_key() {
        let mut cfg = valid();
        cfg.llm.provider = "openai".into();
        assert!(cfg.validate().is_err());
        cfg.llm.api_key = Some("sk-test".into());
        cfg.validate().unwrap();

        cfg.llm.provider = "deepseek".into();
        assert!(cfg.validate().unwrap_err().to_string().contains("deepseek"));
    }

    #[test]
    fn test_file_then_plain_env_overrides() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        write!(
            file,
            r#"
[app]
turn_budget = 4
default_query = "Analyze INFY"

[llm.azure]
endpoint = "https://from-file.openai.azure.com"
api_version = "2024-02-01"

[tools]
provider = "none"

[web]
port = 9000
"#
        )
        .unwrap();

        let env: HashMap<&str, &str> = [
            ("AZURE_OPENAI_API_KEY", "secret"),
            ("AZURE_OPENAI_DEPLOYMENT_NAME", "gpt-4o-prod"),
            ("TRADEDESK_WEB_PORT", "8123"),
            ("BROWSER_ZONE", ""),
        ]
        .into_iter()
        .collect();
        let cfg = load_config_with(Some(file.path().to_path_buf()), |k| {
            env.get(k).map(|v| v.to_string())
        })
        .unwrap();

        assert_eq!(cfg.app.turn_budget, 4);
        assert_eq!(cfg.app.tool_call_budget, 6);
        assert_eq!(cfg.app.default_query, "Analyze INFY");
        assert_eq!(cfg.llm.azure.api_key.as_deref(), Some("secret"));
        assert_eq!(cfg.llm.azure.deployment.as_deref(), Some("gpt-4o-prod"));
        assert_eq!(cfg.llm.azure.endpoint.as_deref(), Some("https://from-file.openai.azure.com"));
        assert_eq!(cfg.llm.azure.api_version, "2024-02-01");
        assert_eq!(cfg.web.port, 8123);
        // 空值不覆盖
        assert_eq!(cfg.tools.mcp.browser_zone, "scraping_browser");
        cfg.validate().unwrap();
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let cfg = load_config_with(Some(PathBuf::from("/nonexistent/tradedesk.toml")), no_env).unwrap();
        assert_eq!(cfg.app.turn_budget, 10);
        assert_eq!(cfg.tools.provider, "mcp");
    }
}
