//! Supervisor：每轮读取对话快照，选出下一个下属智能体或宣布完成
//!
//! 路由回复解析顺序：
//! 1. JSON `{"next": "<agent>" | ["a", "b"], "reason": ".."}`，next 为 FINISH / DONE / 空表示完成
//! 2. `transfer_to_<agent>` 形式的委派短语
//! 3. 按整词、按出现顺序提及的已知智能体名；若含独立的大写 FINISH / DONE，只看其后的部分
//! 4. 以上都没有则视为完成
//!
//! 多选由 RunController 处理（只执行第一个），这里原样返回。

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;

use crate::agent::SUPERVISOR_NAME;
use crate::core::AgentError;
use crate::llm::LlmClient;
use crate::memory::{Message, Role};
use crate::react::planner::extract_json;
use crate::react::Planner;

/// 路由决策
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutingDecision {
    /// 委派给下属智能体；多于一个即违反单智能体约束
    Delegate { agents: Vec<String>, rationale: String },
    /// 任务完成
    Done { rationale: String },
}

/// 路由器 trait：RunController 只依赖该接口，测试中可注入桩实现
#[async_trait]
pub trait Router: Send + Sync {
    async fn select_next(&self, conversation: &[Message]) -> Result<RoutingDecision, AgentError>;
}

/// 基于 LLM 的 Supervisor
pub struct LlmSupervisor {
    planner: Planner,
    policy: String,
    roster: Vec<(String, String)>,
}

impl LlmSupervisor {
    /// roster：(name, description)，顺序即 prompt 中的列举顺序
    pub fn new(llm: Arc<dyn LlmClient>, policy: impl Into<String>, roster: Vec<(String, String)>) -> Self {
        Self {
            planner: Planner::new(llm),
            policy: policy.into(),
            roster,
        }
    }

    pub fn roster(&self) -> impl Iterator<Item = &str> {
        self.roster.iter().map(|(n, _)| n.as_str())
    }

    fn system_prompt(&self) -> String {
        let agents = self
            .roster
            .iter()
            .map(|(name, desc)| {
                if desc.is_empty() {
                    format!("- {}", name)
                } else {
                    format!("- {}: {}", name, desc)
                }
            })
            .collect::<Vec<_>>()
            .join("\n");
        format!(
            "{}\n\n## Agents\n{}\n\n\
             Reply with ONLY one JSON object: {{\"next\": \"<agent name>\", \"reason\": \"<one sentence>\"}}.\n\
             Name exactly one agent. When the task is complete reply {{\"next\": \"FINISH\", \"reason\": \"...\"}}.",
            self.policy, agents
        )
    }
}

/// Supervisor 视角：用户消息、自己的路由决策、下属智能体的正文；工具往返与轮次记录不进入 prompt
fn supervisor_view(conversation: &[Message]) -> Vec<Message> {
    conversation
        .iter()
        .filter_map(|m| match (m.role, m.is_routing()) {
            (Role::User, _) => Some(m.clone()),
            (Role::Agent, true) => Some(Message::agent(SUPERVISOR_NAME, m.content.clone())),
            (Role::Agent, false) if m.tool_calls.is_empty() => Some(Message::agent(
                m.author.clone(),
                format!("[{}] {}", m.author, m.content),
            )),
            _ => None,
        })
        .collect()
}

#[async_trait]
impl Router for LlmSupervisor {
    async fn select_next(&self, conversation: &[Message]) -> Result<RoutingDecision, AgentError> {
        let output = self
            .planner
            .plan_with_system(&supervisor_view(conversation), &self.system_prompt())
            .await?;
        let names: Vec<&str> = self.roster().collect();
        let decision = parse_routing(&output, &names);
        tracing::debug!(?decision, "supervisor decision");
        Ok(decision)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NextField {
    One(String),
    Many(Vec<String>),
}

#[derive(Deserialize)]
struct RoutingReply {
    next: NextField,
    #[serde(default)]
    reason: String,
}

fn is_finish(s: &str) -> bool {
    let s = s.trim();
    s.is_empty() || s.eq_ignore_ascii_case("finish") || s.eq_ignore_ascii_case("done")
}

fn transfer_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"transfer_to_([A-Za-z0-9_\-]+)").ok())
        .as_ref()
}

fn finish_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(FINISH|DONE)\b").ok()).as_ref()
}

/// 解析 Supervisor 的回复
pub fn parse_routing(output: &str, roster: &[&str]) -> RoutingDecision {
    let text = output.trim();

    if let Some(reply) = extract_json(text).and_then(|s| serde_json::from_str::<RoutingReply>(s).ok()) {
        let agents: Vec<String> = match reply.next {
            NextField::One(s) => vec![s],
            NextField::Many(v) => v,
        }
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !is_finish(s))
        .collect();
        return if agents.is_empty() {
            RoutingDecision::Done {
                rationale: reply.reason,
            }
        } else {
            RoutingDecision::Delegate {
                agents,
                rationale: reply.reason,
            }
        };
    }

    if let Some(re) = transfer_regex() {
        let agents: Vec<String> = re
            .captures_iter(text)
            .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
            .collect();
        if !agents.is_empty() {
            return RoutingDecision::Delegate {
                agents,
                rationale: text.to_string(),
            };
        }
    }

    // 完成标记之后出现的智能体优先；标记之后无人被点名则视为完成
    let finish_end = finish_regex().and_then(|re| re.find_iter(text).last()).map(|m| m.end());
    let mentioned = roster_mentions(&text[finish_end.unwrap_or(0)..], roster);
    if mentioned.is_empty() {
        RoutingDecision::Done {
            rationale: text.to_string(),
        }
    } else {
        RoutingDecision::Delegate {
            agents: mentioned,
            rationale: text.to_string(),
        }
    }
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '-'
}

/// 文本中按整词出现的智能体名，按首次出现位置排序
fn roster_mentions(text: &str, roster: &[&str]) -> Vec<String> {
    let mut found: Vec<(usize, &str)> = roster
        .iter()
        .filter(|name| !name.is_empty())
        .filter_map(|name| {
            text.match_indices(*name)
                .find(|(pos, _)| {
                    let before = text[..*pos].chars().next_back();
                    let after = text[*pos + name.len()..].chars().next();
                    !before.map_or(false, is_name_char) && !after.map_or(false, is_name_char)
                })
                .map(|(pos, _)| (pos, *name))
        })
        .collect();
    found.sort_by_key(|(pos, _)| *pos);
    found.into_iter().map(|(_, n)| n.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedLlmClient;

    const ROSTER: &[&str] = &["stock_finder_agent", "market_data_agent", "news_analyst_agent"];

    fn delegated(d: &RoutingDecision) -> Vec<String> {
        match d {
            RoutingDecision::Delegate { agents, .. } => agents.clone(),
            RoutingDecision::Done { .. } => vec![],
        }
    }

    #[test]
    fn test_json_reply() {
        let d = parse_routing(r#"{"next": "market_data_agent", "reason": "need prices"}"#, ROSTER);
        assert_eq!(
            d,
            RoutingDecision::Delegate {
                agents: vec!["market_data_agent".into()],
                rationale: "need prices".into()
            }
        );
    }

    #[test]
    fn test_json_finish_and_empty() {
        assert!(matches!(
            parse_routing(r#"{"next": "FINISH", "reason": "all done"}"#, ROSTER),
            RoutingDecision::Done { ref rationale } if rationale == "all done"
        ));
        assert!(matches!(
            parse_routing(r#"{"next": []}"#, ROSTER),
            RoutingDecision::Done { .. }
        ));
    }

    #[test]
    fn test_json_multi_selection_is_preserved() {
        let d = parse_routing(r#"{"next": ["news_analyst_agent", "market_data_agent"]}"#, ROSTER);
        assert_eq!(delegated(&d), vec!["news_analyst_agent", "market_data_agent"]);
    }

    #[test]
    fn test_transfer_phrase_keeps_unknown_names() {
        let d = parse_routing("transfer_to_ghost_agent", ROSTER);
        assert_eq!(delegated(&d), vec!["ghost_agent"]);
    }

    #[test]
    fn test_plain_text_mentions_in_order() {
        let d = parse_routing(
            "Next, news_analyst_agent should look at headlines, then stock_finder_agent.",
            ROSTER,
        );
        assert_eq!(delegated(&d), vec!["news_analyst_agent", "stock_finder_agent"]);
    }

    #[test]
    fn test_finish_word_and_no_mention_are_done() {
        assert!(matches!(
            parse_routing("All agents reported. FINISH", ROSTER),
            RoutingDecision::Done { .. }
        ));
        assert!(matches!(
            parse_routing("Here is a summary of the market.", ROSTER),
            RoutingDecision::Done { .. }
        ));
    }

    #[test]
    fn test_agent_named_after_finish_word_is_delegated() {
        let d = parse_routing("stock_finder_agent is DONE; next market_data_agent", ROSTER);
        assert_eq!(delegated(&d), vec!["market_data_agent"]);
        assert!(matches!(
            parse_routing("market_data_agent reported, so we are DONE.", ROSTER),
            RoutingDecision::Done { .. }
        ));
    }

    #[test]
    fn test_mentions_match_whole_names_only() {
        let roster = &["data_agent", "market_data_agent"];
        let d = parse_routing("Ask market_data_agent for prices.", roster);
        assert_eq!(delegated(&d), vec!["market_data_agent"]);

        let d = parse_routing("Hand off to data_agent, then market_data_agent.", roster);
        assert_eq!(delegated(&d), vec!["data_agent", "market_data_agent"]);
    }

    #[tokio::test]
    async fn test_supervisor_prompt_lists_roster_and_hides_tool_traffic() {
        let llm = Arc::new(ScriptedLlmClient::new(vec![r#"{"next": "market_data_agent"}"#]));
        let sup = LlmSupervisor::new(
            llm.clone(),
            "Route stock work.",
            vec![
                ("stock_finder_agent".into(), "picks stocks".into()),
                ("market_data_agent".into(), String::new()),
            ],
        );
        let conv = vec![
            Message::user("analyze"),
            Message::agent("stock_finder_agent", "{\"tool\":\"search\"}").with_tool_calls(vec![
                crate::memory::ToolCallRecord {
                    tool: "search".into(),
                    args: serde_json::json!({}),
                },
            ]),
            Message::tool("search", "raw html"),
            Message::agent("stock_finder_agent", "INFY, TCS"),
        ];
        let d = sup.select_next(&conv).await.unwrap();
        assert_eq!(delegated(&d), vec!["market_data_agent"]);

        let prompt = llm.prompt(0).unwrap();
        assert!(prompt[0].content.starts_with("Route stock work."));
        assert!(prompt[0].content.contains("- stock_finder_agent: picks stocks"));
        assert_eq!(prompt.len(), 3);
        assert_eq!(prompt[2].content, "[stock_finder_agent] INFY, TCS");
    }
}
