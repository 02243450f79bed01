pub mod echo;
pub mod executor;
pub mod mcp;
pub mod registry;
pub mod schema;

pub use echo::EchoTool;
pub use executor::ToolExecutor;
pub use mcp::{McpClient, McpServerConfig, McpToolProvider};
pub use registry::{StaticToolProvider, Tool, ToolProvider, ToolRegistry};
pub use schema::tool_call_schema_json;
