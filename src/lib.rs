//! TradeDesk - 多智能体 Supervisor 编排核心
//!
//! 模块划分：
//! - **agent**: Agent trait 与智能体定义（agents.toml / 内置股票分析智能体）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: Run 状态机、分析存储、Supervisor 路由、回合控制、编排上下文
//! - **llm**: LLM 客户端抽象与实现（Azure OpenAI / OpenAI 兼容 / Mock）
//! - **memory**: 一次 Run 内共享的只追加对话
//! - **react**: Planner 与单个智能体的工具调用循环
//! - **tools**: 工具注册表、执行器与外部工具供给适配器
//! - **web**: HTTP 接口（feature = "web"）

pub mod agent;
pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod react;
pub mod tools;
#[cfg(feature = "web")]
pub mod web;

pub use crate::core::{AgentError, OrchestrationContext, RunController};
