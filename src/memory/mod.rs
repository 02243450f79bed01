//! 记忆层：一次 Run 内的只追加对话日志（进程内，不持久化）

pub mod conversation;

pub use conversation::{Conversation, Message, MessageKind, Role, ToolCallRecord};
