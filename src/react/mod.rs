//! 认知层：Planner（LLM 调用与 Tool Call 解析）与 ReAct 智能体循环

pub mod loop_;
pub mod planner;

pub use loop_::{history_view, ReactAgent};
pub use planner::{parse_llm_output, Planner, PlannerOutput, ToolCall};
