//! Run：一次受监管的端到端执行
//!
//! 状态机 pending -> running -> {completed, failed}；终态不可再迁移。
//! Run 只由执行它的 RunController 修改，外部通过 AnalysisStore 读取快照。

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::core::AgentError;
use crate::memory::{Conversation, Message};

pub type RunId = String;

pub fn new_run_id() -> RunId {
    uuid::Uuid::new_v4().to_string()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }
}

/// Run 中记录的错误：机器可读 kind + 可读描述
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RunError {
    pub kind: String,
    pub message: String,
}

impl From<&AgentError> for RunError {
    fn from(e: &AgentError) -> Self {
        Self {
            kind: e.kind().to_string(),
            message: e.to_string(),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct Run {
    pub run_id: RunId,
    pub session_id: String,
    pub query: String,
    pub status: RunStatus,
    pub conversation: Conversation,
    pub progress_note: String,
    pub final_result: Option<String>,
    pub error: Option<RunError>,
    /// 已完成的委派轮数
    pub turns: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Run {
    pub fn new(run_id: RunId, session_id: impl Into<String>, query: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            run_id,
            session_id: session_id.into(),
            query: query.into(),
            status: RunStatus::Pending,
            conversation: Conversation::new(),
            progress_note: "Analysis queued".to_string(),
            final_result: None,
            error: None,
            turns: 0,
            created_at: now,
            updated_at: now,
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// pending -> running，对话以单条用户消息开始；其余状态下无效
    pub fn start(&mut self) -> bool {
        if self.status != RunStatus::Pending {
            return false;
        }
        self.status = RunStatus::Running;
        self.conversation = Conversation::from_query(self.query.clone());
        self.progress_note = "Starting analysis...".to_string();
        self.touch();
        true
    }

    /// 仅 running 状态下追加
    pub fn append(&mut self, msgs: impl IntoIterator<Item = Message>) {
        if self.status != RunStatus::Running {
            return;
        }
        self.conversation.extend(msgs);
        self.touch();
    }

    pub fn set_progress(&mut self, note: impl Into<String>) {
        if self.status.is_terminal() {
            return;
        }
        self.progress_note = note.into();
        self.touch();
    }

    pub fn complete(&mut self) -> bool {
        if self.status != RunStatus::Running {
            return false;
        }
        self.status = RunStatus::Completed;
        self.final_result = self.conversation.last_agent_content().map(|m| m.content.clone());
        self.progress_note = "Analysis completed successfully".to_string();
        self.touch();
        true
    }

    pub fn fail(&mut self, err: &AgentError) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = RunStatus::Failed;
        self.error = Some(RunError::from(err));
        self.progress_note = format!("Analysis failed: {}", err);
        self.touch();
        true
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            analysis_id: self.run_id.clone(),
            session_id: self.session_id.clone(),
            query: self.query.clone(),
            status: self.status,
            progress: self.progress_note.clone(),
            turns: self.turns,
            messages: self.conversation.len(),
            error: self.error.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// get_status 返回的摘要（不含完整对话）
#[derive(Clone, Debug, Serialize)]
pub struct RunSummary {
    pub analysis_id: RunId,
    pub session_id: String,
    pub query: String,
    pub status: RunStatus,
    pub progress: String,
    pub turns: usize,
    pub messages: usize,
    pub error: Option<RunError>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
