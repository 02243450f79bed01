//! 核心编排层：错误类型、Run 状态机、分析存储、Supervisor 路由、回合控制与编排上下文

pub mod controller;
pub mod error;
pub mod orchestrator;
pub mod run;
pub mod store;
pub mod supervisor;

pub use controller::{RunController, RunLimits};
pub use error::AgentError;
pub use orchestrator::OrchestrationContext;
pub use run::{Run, RunError, RunId, RunStatus, RunSummary};
pub use store::AnalysisStore;
pub use supervisor::{parse_routing, LlmSupervisor, Router, RoutingDecision};
