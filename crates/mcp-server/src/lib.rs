//! 规则引擎 MCP 服务
//!
//! 通过 MCP 工具调用暴露规则集的管理与执行：
//!
//! - `store`：按名称寻址的规则集存储（内存 / PostgreSQL）
//! - `service`：协调存储与规则引擎的编排服务
//! - `mcp`：JSON-RPC 协议与工具分发
//! - `transport`：stdio、SSE、Streamable HTTP 三种传输绑定
//! - `server`：服务器生命周期状态机

pub mod cli;
pub mod dto;
pub mod error;
pub mod mcp;
pub mod models;
pub mod server;
pub mod service;
pub mod store;
pub mod transport;

pub use error::{Result, RulesetError, ServerError};
pub use models::{Ruleset, RulesetDraft};
pub use server::{McpServer, ServerState};
pub use service::RuleOrchestrator;
pub use store::{MemoryRulesetStore, PostgresRulesetStore, RulesetStore};
