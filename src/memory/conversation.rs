//! 对话日志：一次 Run 内所有智能体共享的只追加消息序列
//!
//! Message 是封闭的带标签结构（role + kind + 固定字段），追加后不可变；
//! Conversation 只提供 push / extend，不提供删除或修改，顺序即因果顺序。

use serde::{Deserialize, Serialize};

/// 消息角色
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Agent,
    Tool,
    System,
}

/// 消息类别：正文内容 / 路由元数据（Supervisor 决策与每轮路由记录）
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    #[default]
    Content,
    Routing,
}

/// 智能体在一条消息中请求的工具调用
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub tool: String,
    pub args: serde_json::Value,
}

/// 单条消息
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    #[serde(default)]
    pub kind: MessageKind,
    /// 产出该消息的智能体名；user / system 消息为空
    #[serde(default)]
    pub author: String,
    pub content: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolCallRecord>,
    /// RFC 3339 时间戳
    pub timestamp: String,
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

impl Message {
    fn new(role: Role, author: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role,
            kind: MessageKind::Content,
            author: author.into(),
            content: content.into(),
            tool_calls: Vec::new(),
            timestamp: now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, "", content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, "", content)
    }

    pub fn agent(author: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(Role::Agent, author, content)
    }

    /// 工具结果；author 为工具名
    pub fn tool(author: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(Role::Tool, author, content)
    }

    /// 路由消息（Supervisor 决策或「某智能体已执行」记录）
    pub fn routing(role: Role, author: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Routing,
            ..Self::new(role, author, content)
        }
    }

    pub fn with_tool_calls(mut self, calls: Vec<ToolCallRecord>) -> Self {
        self.tool_calls = calls;
        self
    }

    pub fn is_routing(&self) -> bool {
        self.kind == MessageKind::Routing
    }
}

/// 只追加的对话日志
#[derive(Clone, Debug, Default, Serialize)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    /// 以单条用户消息开始一次 Run
    pub fn from_query(query: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::user(query)],
        }
    }

    pub fn push(&mut self, msg: Message) {
        self.messages.push(msg);
    }

    pub fn extend(&mut self, msgs: impl IntoIterator<Item = Message>) {
        self.messages.extend(msgs);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// 最后一条由下属智能体产出的正文消息（作为最终建议）
    pub fn last_agent_content(&self) -> Option<&Message> {
        self.messages
            .iter()
            .rev()
            .find(|m| !m.is_routing() && m.role == Role::Agent)
    }
}
